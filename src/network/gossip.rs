//! Heartbeat Gossip
//!
//! Keeps the membership view alive over TCP: every interval the local node
//! announces itself (with its epoch and advertised services) to the
//! configured peers and every member it knows of, then sweeps for members
//! that went silent.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use futures::future;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::client::NetworkClient;
use super::protocol::Message;
use crate::cluster::{ClusterMembership, Node};

/// Periodic heartbeat sender and timeout sweeper
pub struct Heartbeater {
    local: Node,
    membership: Arc<ClusterMembership>,
    client: Arc<NetworkClient>,
    peers: Vec<String>,
    interval: Duration,
}

impl Heartbeater {
    pub fn new(
        local: Node,
        membership: Arc<ClusterMembership>,
        client: Arc<NetworkClient>,
        peers: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            local,
            membership,
            client,
            peers,
            interval,
        }
    }

    /// Heartbeat until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Heartbeating every {:?} to {} configured peers", self.interval, self.peers.len());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.beat().await;
                    let dropped = self.membership.check_timeouts().await;
                    if !dropped.is_empty() {
                        tracing::warn!("Dropped {} silent members", dropped.len());
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("Heartbeat loop stopped");
    }

    /// Send one round of heartbeats
    pub async fn beat(&self) {
        let services = self
            .membership
            .services_of(&self.local)
            .await
            .into_iter()
            .collect();
        let message = Message::Heartbeat {
            from: self.local.clone(),
            epoch: self.membership.epoch(),
            services,
        };

        let targets = self.targets();
        let sends = targets.iter().map(|address| {
            let message = message.clone();
            async move {
                if let Err(e) = self.client.send_async(address, message).await {
                    tracing::trace!("Heartbeat to {} failed: {}", address, e);
                }
            }
        });
        future::join_all(sends).await;
    }

    /// Tell every known member we are leaving
    pub async fn leave(&self) {
        let message = Message::Leave {
            node: self.local.clone(),
        };
        let targets = self.targets();
        let sends = targets.iter().map(|address| {
            let message = message.clone();
            async move {
                if let Err(e) = self.client.send_async(address, message).await {
                    tracing::debug!("Leave notice to {} failed: {}", address, e);
                }
            }
        });
        future::join_all(sends).await;
    }

    /// Configured peers plus current view members, excluding ourselves
    fn targets(&self) -> BTreeSet<String> {
        self.peers
            .iter()
            .cloned()
            .chain(
                self.membership
                    .view()
                    .members()
                    .iter()
                    .map(|member| member.address().to_string()),
            )
            .filter(|address| address != self.local.address())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkServer, NodeEndpoint};
    use crate::dispatcher::CommandTable;

    #[tokio::test]
    async fn test_heartbeat_reaches_peer() {
        let remote_membership = Arc::new(ClusterMembership::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        let endpoint = NodeEndpoint::new(
            Arc::clone(&remote_membership),
            Arc::new(CommandTable::new(Node::new("remote", "127.0.0.1:0"))),
        );
        let server = Arc::new(NetworkServer::new("127.0.0.1:0".to_string(), Arc::new(endpoint)));
        let listener = server.bind().await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.serve(listener).await });

        let local = Node::new("local", "127.0.0.1:1");
        let membership = Arc::new(ClusterMembership::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        membership.join(local.clone(), ["stamp".to_string()].into_iter().collect()).await;
        let heartbeater = Heartbeater::new(
            local.clone(),
            membership,
            Arc::new(NetworkClient::new(Duration::from_secs(1), Duration::from_secs(1))),
            vec![address],
            Duration::from_millis(50),
        );

        heartbeater.beat().await;
        let mut joined = false;
        for _ in 0..100 {
            if remote_membership.get_member("local").await.is_some() {
                joined = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(joined);
        assert_eq!(remote_membership.topology().candidates("stamp"), vec![local]);

        server.stop();
    }
}
