//! Primary stamp service
//!
//! The service the `wolfsingleton` binary keeps running: it records which
//! member became primary and when, so readers anywhere can see who owns it.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::SingletonService;
use crate::cluster::Node;
use crate::error::{Error, Result};

/// Value served by the stamp service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryStamp {
    pub node: String,
    pub address: String,
    pub since: chrono::DateTime<chrono::Utc>,
}

/// Records its own promotion time while primary
pub struct StampService {
    local: Node,
    since: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

impl StampService {
    pub fn new(local: Node) -> Self {
        Self {
            local,
            since: RwLock::new(None),
        }
    }
}

#[async_trait::async_trait]
impl SingletonService for StampService {
    type Value = PrimaryStamp;

    async fn start(&self) -> Result<()> {
        let mut since = self.since.write().await;
        if since.is_none() {
            *since = Some(chrono::Utc::now());
        }
        Ok(())
    }

    async fn stop(&self) {
        *self.since.write().await = None;
    }

    async fn value(&self) -> Result<PrimaryStamp> {
        let since = self
            .since
            .read()
            .await
            .ok_or_else(|| Error::Internal("stamp service is not running".into()))?;

        Ok(PrimaryStamp {
            node: self.local.name().to_string(),
            address: self.local.address().to_string(),
            since,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stamp_lifecycle() {
        let service = StampService::new(Node::new("node-1", "localhost:7654"));
        assert!(service.value().await.is_err());

        service.start().await.unwrap();
        let first = service.value().await.unwrap();
        assert_eq!(first.node, "node-1");

        // Restarting a running service keeps the original promotion time
        service.start().await.unwrap();
        assert_eq!(service.value().await.unwrap().since, first.since);

        service.stop().await;
        assert!(service.value().await.is_err());
    }
}
