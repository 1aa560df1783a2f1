//! Node Endpoint
//!
//! Routes inbound messages: membership traffic to [`ClusterMembership`],
//! singleton commands to the local [`CommandTable`].

use std::sync::Arc;

use super::protocol::{ErrorCode, Message};
use super::server::MessageHandler;
use crate::cluster::ClusterMembership;
use crate::dispatcher::CommandTable;

/// Inbound message router for one node
pub struct NodeEndpoint {
    membership: Arc<ClusterMembership>,
    commands: Arc<CommandTable>,
}

impl NodeEndpoint {
    pub fn new(membership: Arc<ClusterMembership>, commands: Arc<CommandTable>) -> Self {
        Self { membership, commands }
    }
}

#[async_trait::async_trait]
impl MessageHandler for NodeEndpoint {
    async fn handle(&self, peer: &str, message: Message) -> Option<Message> {
        match message {
            Message::Heartbeat { from, epoch, services } => {
                self.membership.observe_epoch(epoch);
                self.membership
                    .record_heartbeat(&from, services.into_iter().collect())
                    .await;
                None
            }
            Message::Leave { node } => {
                tracing::info!("{} is leaving the cluster", node);
                self.membership.leave(&node).await;
                None
            }
            Message::Command { service, command } => {
                tracing::debug!("{} for {} from {}", command.type_name(), service, peer);
                match self.commands.handle(&service, command).await {
                    Ok(response) => Some(Message::CommandReply { response }),
                    Err(e) => Some(Message::from_error(&e)),
                }
            }
            other => {
                tracing::warn!("Unexpected {} from {}", other.type_name(), peer);
                Some(Message::Error {
                    code: ErrorCode::BadRequest,
                    message: format!("unexpected {}", other.type_name()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Node;
    use crate::singleton::SingletonCommand;
    use std::time::Duration;

    fn endpoint() -> (NodeEndpoint, Arc<ClusterMembership>) {
        let membership = Arc::new(ClusterMembership::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        let commands = Arc::new(CommandTable::new(Node::new("node-1", "localhost:7654")));
        (NodeEndpoint::new(Arc::clone(&membership), commands), membership)
    }

    #[tokio::test]
    async fn test_heartbeat_joins_member() {
        let (endpoint, membership) = endpoint();
        let peer = Node::new("node-2", "localhost:7655");

        let reply = endpoint
            .handle(
                "localhost:50000",
                Message::Heartbeat {
                    from: peer.clone(),
                    epoch: 12,
                    services: vec!["stamp".into()],
                },
            )
            .await;
        assert!(reply.is_none());

        assert_eq!(membership.topology().candidates("stamp"), vec![peer.clone()]);
        assert!(membership.epoch() > 12);

        endpoint.handle("localhost:50000", Message::Leave { node: peer }).await;
        assert!(membership.view().is_empty());
    }

    #[tokio::test]
    async fn test_command_without_handler() {
        let (endpoint, _) = endpoint();
        let reply = endpoint
            .handle(
                "localhost:50000",
                Message::Command {
                    service: "stamp".into(),
                    command: SingletonCommand::ValueQuery,
                },
            )
            .await;

        match reply {
            Some(Message::Error { code, .. }) => assert_eq!(code, ErrorCode::NoHandler),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
