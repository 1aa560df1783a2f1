//! HTTP API Server
//!
//! REST API for node health, membership and the singleton value.

use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cluster::{ClusterMembership, MembershipSummary};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::singleton::{SingletonCoordinator, SingletonService, SingletonStatus};

/// Shared application state
pub struct AppState<S: SingletonService> {
    /// Local node name
    pub node_name: String,
    /// Cluster membership
    pub membership: Arc<ClusterMembership>,
    /// Coordinator of the configured singleton
    pub coordinator: Arc<SingletonCoordinator<S>>,
}

/// HTTP API server
pub struct HttpServer<S: SingletonService> {
    config: ApiConfig,
    state: Arc<AppState<S>>,
}

impl<S: SingletonService> HttpServer<S> {
    /// Create a new HTTP server
    pub fn new(
        config: ApiConfig,
        membership: Arc<ClusterMembership>,
        coordinator: Arc<SingletonCoordinator<S>>,
    ) -> Self {
        let state = Arc::new(AppState {
            node_name: coordinator.local_node().name().to_string(),
            membership,
            coordinator,
        });

        Self { config, state }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(handle_health::<S>))
            .route("/status", get(handle_status::<S>))
            .route("/cluster/members", get(handle_members::<S>))
            .route("/singleton", get(handle_singleton::<S>))
            .route("/singleton/value", get(handle_value::<S>))
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node: String,
    pub primary: bool,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node: String,
    pub membership: MembershipSummary,
    pub singleton: SingletonStatus,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health<S: SingletonService>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node: state.node_name.clone(),
        primary: state.coordinator.is_primary(),
    })
}

async fn handle_status<S: SingletonService>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    Json(StatusResponse {
        node: state.node_name.clone(),
        membership: state.membership.summary().await,
        singleton: state.coordinator.status().await,
    })
}

async fn handle_members<S: SingletonService>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    Json(state.membership.members().await)
}

async fn handle_singleton<S: SingletonService>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    Json(state.coordinator.status().await)
}

async fn handle_value<S: SingletonService>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.coordinator.value().await {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: Error) -> Response {
    let (status, code) = match &error {
        Error::QuorumNotReached { .. } => (StatusCode::SERVICE_UNAVAILABLE, "QUORUM_NOT_REACHED"),
        Error::NotStarted(_) => (StatusCode::SERVICE_UNAVAILABLE, "NOT_STARTED"),
        Error::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        Error::MultiplePrimaries { .. } => (StatusCode::CONFLICT, "MULTIPLE_PRIMARIES"),
        Error::ShuttingDown | Error::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    if status == StatusCode::CONFLICT {
        tracing::error!("Value request failed: {}", error);
    } else {
        tracing::debug!("Value request failed: {}", error);
    }

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}
