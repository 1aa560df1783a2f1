//! Singleton Coordinator Builder

use std::sync::Arc;

use super::{QueryConfig, Quorum, SingletonCoordinator, SingletonService};
use crate::dispatcher::CommandDispatcherFactory;
use crate::election::{ElectionPolicy, SimpleElectionPolicy};
use crate::error::{Error, Result};
use crate::provider::ServiceProviderRegistry;

/// Configures and activates a [`SingletonCoordinator`]
pub struct SingletonBuilder<S: SingletonService> {
    name: String,
    service: Arc<S>,
    quorum: usize,
    policy: Arc<dyn ElectionPolicy>,
    query: QueryConfig,
}

impl<S: SingletonService> SingletonBuilder<S> {
    /// Builder for service `name` with quorum 1 and the first candidate elected
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self::from_arc(name, Arc::new(service))
    }

    /// Builder for a service the caller keeps a handle to
    pub fn from_arc(name: impl Into<String>, service: Arc<S>) -> Self {
        Self {
            name: name.into(),
            service,
            quorum: 1,
            policy: Arc::new(SimpleElectionPolicy::default()),
            query: QueryConfig::default(),
        }
    }

    /// Minimum number of providers before a primary is elected
    pub fn require_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn election_policy(mut self, policy: Arc<dyn ElectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn query_config(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    /// Register with `registry` and `dispatchers` and run the initial election
    pub async fn build(
        self,
        registry: &dyn ServiceProviderRegistry,
        dispatchers: &dyn CommandDispatcherFactory,
    ) -> Result<SingletonCoordinator<S>> {
        if self.name.is_empty() {
            return Err(Error::Config("singleton service name must not be empty".into()));
        }
        let quorum = Quorum::new(self.quorum)?;

        SingletonCoordinator::activate(
            self.name,
            self.service,
            self.policy,
            quorum,
            self.query,
            registry,
            dispatchers,
        )
        .await
    }
}
