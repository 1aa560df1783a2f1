//! WolfSingleton - Cluster-wide Singleton Service Coordinator
//!
//! Runs one node of a cluster that keeps a named service active on exactly
//! one member, re-electing on membership changes.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfsingleton::api::HttpServer;
use wolfsingleton::cluster::{ClusterMembership, Node};
use wolfsingleton::config::{LoggingConfig, WolfSingletonConfig};
use wolfsingleton::dispatcher::NetworkDispatcherFactory;
use wolfsingleton::error::Result;
use wolfsingleton::network::{Heartbeater, NetworkClient, NetworkServer, NodeEndpoint};
use wolfsingleton::provider::MembershipProviderRegistry;
use wolfsingleton::singleton::{SingletonBuilder, StampService};

/// WolfSingleton - Cluster-wide Singleton Service Coordinator
#[derive(Parser)]
#[command(name = "wolfsingleton")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfsingleton.toml")]
    config: PathBuf,

    /// Log level (overrides the configured level)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfSingleton node
    Start,

    /// Check node status
    Status {
        /// Node API address to query
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfsingleton.toml")]
        output: PathBuf,

        /// Node name
        #[arg(long, default_value = "node-1")]
        node_name: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = WolfSingletonConfig::from_file(&cli.config)
                .with_context(|| format!("failed to load {}", cli.config.display()))?;
            init_logging(&config.logging, cli.log_level.as_deref());
            run_start(config).await?;
        }
        Commands::Status { address } => run_status(address).await?,
        Commands::Init { output, node_name } => run_init(output, node_name)?,
        Commands::Validate => run_validate(cli.config)?,
    }

    Ok(())
}

/// Initialize logging
fn init_logging(config: &LoggingConfig, level: Option<&str>) {
    let level = level.unwrap_or(&config.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the WolfSingleton node
async fn run_start(config: WolfSingletonConfig) -> Result<()> {
    tracing::info!("Starting WolfSingleton node {}", config.node.name);

    let local = Node::new(config.node.name.clone(), config.advertise_address());

    // Initialize cluster membership with ourselves as the first member
    let membership = Arc::new(ClusterMembership::new(
        config.heartbeat_timeout(),
        config.drop_timeout(),
    ));
    membership.join(local.clone(), BTreeSet::new()).await;

    // Network client and command dispatch
    let client = Arc::new(NetworkClient::new(
        config.connect_timeout(),
        config.request_timeout(),
    ));
    let dispatchers = NetworkDispatcherFactory::new(
        local.clone(),
        Arc::clone(&membership),
        Arc::clone(&client),
    );

    // Inbound messages
    let endpoint = Arc::new(NodeEndpoint::new(Arc::clone(&membership), dispatchers.table()));
    let network_server = Arc::new(NetworkServer::new(config.node.bind_address.clone(), endpoint));
    let listener = match network_server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.node.bind_address, e);
            return Err(e);
        }
    };
    let serving = Arc::clone(&network_server);
    let network_server_handle = tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            tracing::error!("Network server error: {}", e);
        }
    });

    // Heartbeat gossip
    let cancel = CancellationToken::new();
    let heartbeater = Arc::new(Heartbeater::new(
        local.clone(),
        Arc::clone(&membership),
        Arc::clone(&client),
        config.cluster.peers.clone(),
        config.heartbeat_interval(),
    ));
    let gossip = Arc::clone(&heartbeater);
    let gossip_cancel = cancel.clone();
    let heartbeat_handle = tokio::spawn(async move { gossip.run(gossip_cancel).await });

    // Singleton coordinator
    let registry = MembershipProviderRegistry::new(local.clone(), Arc::clone(&membership));
    let coordinator = SingletonBuilder::new(
        config.singleton.name.clone(),
        StampService::new(local.clone()),
    )
    .require_quorum(config.singleton.quorum)
    .election_policy(config.singleton.election.build())
    .query_config(config.query_config())
    .build(&registry, &dispatchers)
    .await?;
    let coordinator = Arc::new(coordinator);
    tracing::info!(
        "Providing {} (quorum {}, {} configured peers)",
        coordinator.name(),
        coordinator.quorum(),
        config.cluster.peers.len()
    );

    // HTTP API
    let http_server = HttpServer::new(
        config.api.clone(),
        Arc::clone(&membership),
        Arc::clone(&coordinator),
    );
    let http_server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.start().await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");

    // Hand the singleton over before disappearing from the view
    coordinator.close().await;
    cancel.cancel();
    let _ = heartbeat_handle.await;
    heartbeater.leave().await;

    // Cleanup
    http_server_handle.abort();
    network_server.stop();
    network_server_handle.abort();
    client.close_all().await;

    tracing::info!("WolfSingleton shutdown complete");
    Ok(())
}

/// Check node status
async fn run_status(address: String) -> anyhow::Result<()> {
    let url = format!("http://{}/status", address);

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    let status: serde_json::Value = response
        .json()
        .await
        .context("invalid status response")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_name: String) -> Result<()> {
    let config_content = format!(r#"# WolfSingleton Configuration
# Generated configuration file

[node]
name = "{node_name}"
bind_address = "0.0.0.0:7654"
# advertise_address = "my-public-ip:7654"

[cluster]
peers = []
# peers = ["node-2.example.com:7654", "node-3.example.com:7654"]
heartbeat_interval_ms = 500
drop_timeout_ms = 5000

[singleton]
name = "stamp"
quorum = 1

[singleton.election]
policy = "simple"
position = 0
# policy = "preferred"
# preferences = ["node-1", "node-2"]

[query]
initial_backoff_ms = 10
max_backoff_ms = 500
timeout_ms = 5000

[api]
enabled = true
bind_address = "0.0.0.0:8080"
cors_enabled = false

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your cluster settings.");
    println!("Then start with: wolfsingleton start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfSingletonConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node:           {}", config.node.name);
            println!("  Bind Address:   {}", config.node.bind_address);
            println!("  Advertise:      {}", config.advertise_address());
            println!("  Peers:          {}", config.cluster.peers.len());
            println!("  Service:        {}", config.singleton.name);
            println!("  Quorum:         {}", config.singleton.quorum);
            println!("  Election:       {:?}", config.singleton.election.build());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
