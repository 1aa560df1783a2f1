//! Service Provider Registry
//!
//! Tracks, per singleton service name, which members have registered as able
//! to run it, and tells the local coordinator whenever that set changes.

mod registry;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cluster::Node;
use crate::error::Result;

pub use registry::MembershipProviderRegistry;

/// Receives provider changes for one registered service
#[async_trait::async_trait]
pub trait ProviderListener: Send + Sync {
    /// `candidates` are the registered providers present in the current
    /// view, in view order. `epoch` is the view they were computed from.
    async fn providers_changed(&self, candidates: Vec<Node>, epoch: u64);
}

/// Handle for one service registration
#[async_trait::async_trait]
pub trait Registration: Send + Sync {
    /// Registered service name
    fn service(&self) -> &str;

    /// Registered providers in the current view
    fn providers(&self) -> BTreeSet<Node>;

    /// Registered providers in view order
    fn candidates(&self) -> Vec<Node>;

    /// Withdraw the local registration and stop notifications
    async fn close(&self);
}

/// Registry of service providers across the cluster
#[async_trait::async_trait]
pub trait ServiceProviderRegistry: Send + Sync {
    /// The member this registry registers on behalf of
    fn local_node(&self) -> &Node;

    /// Register the local member as a provider of `service`.
    ///
    /// The listener is called once with the current candidates before this
    /// returns, then again after every change.
    async fn register(
        &self,
        service: &str,
        listener: Arc<dyn ProviderListener>,
    ) -> Result<Box<dyn Registration>>;
}
