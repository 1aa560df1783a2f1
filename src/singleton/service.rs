//! Singleton Service Lifecycle

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// The service a coordinator keeps running on exactly one member.
///
/// `start` and `stop` must tolerate being called when the service is
/// already in the target state. A failed `start` is followed by a `stop`.
#[async_trait::async_trait]
pub trait SingletonService: Send + Sync + 'static {
    /// Value readers obtain from the primary
    type Value: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Start the service on this member
    async fn start(&self) -> Result<()>;

    /// Stop the service on this member
    async fn stop(&self);

    /// Current value; only called while this member is primary
    async fn value(&self) -> Result<Self::Value>;
}
