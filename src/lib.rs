//! WolfSingleton - Cluster-wide Singleton Service Coordinator
//!
//! Keeps a named service running on exactly one member of a cluster. Every
//! member that can run the service registers as a provider; the first
//! provider in view order elects a primary once enough providers are present
//! and moves the service whenever membership changes. Readers on any member
//! obtain the value from whichever member is primary.
//!
//! # Architecture
//!
//! - [`cluster`]: members, views, and the topology feed
//! - [`provider`]: who provides which service
//! - [`dispatcher`]: Start/Stop/ValueQuery commands to one or all members
//! - [`election`]: deterministic primary selection
//! - [`singleton`]: the coordinator, quorum gate, and value queries
//! - [`network`]: TCP transport and heartbeat gossip
//! - [`api`]: HTTP status and value API

pub mod config;
pub mod error;
pub mod cluster;
pub mod provider;
pub mod dispatcher;
pub mod election;
pub mod singleton;
pub mod network;
pub mod api;

pub use config::WolfSingletonConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfSingletonConfig;
    pub use crate::error::{Error, Result};
    pub use crate::cluster::{ClusterMembership, Node, View};
    pub use crate::provider::{MembershipProviderRegistry, ServiceProviderRegistry};
    pub use crate::dispatcher::{CommandDispatcherFactory, LocalTransport, NetworkDispatcherFactory};
    pub use crate::election::{ElectionPolicy, PreferredElectionPolicy, SimpleElectionPolicy};
    pub use crate::singleton::{SingletonBuilder, SingletonCoordinator, SingletonService};
}
