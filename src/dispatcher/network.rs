//! TCP command dispatch
//!
//! Commands for remote members travel as [`Message::Command`] frames through
//! the pooled [`NetworkClient`]; commands for the local member are handed to
//! the registered handler directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CommandDispatcher, CommandDispatcherFactory, CommandFuture, CommandHandler};
use crate::cluster::{ClusterMembership, Node};
use crate::error::{Error, Result};
use crate::network::{Message, NetworkClient};
use crate::singleton::{CommandResponse, SingletonCommand};

/// Command handlers registered on the local member, by service name
pub struct CommandTable {
    local: Node,
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandTable {
    pub fn new(local: Node) -> Self {
        Self {
            local,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Run `command` against the local handler for `service`
    pub async fn handle(&self, service: &str, command: SingletonCommand) -> Result<CommandResponse> {
        let handler = self
            .handlers
            .read()
            .await
            .get(service)
            .cloned()
            .ok_or_else(|| Error::NoHandler {
                service: service.to_string(),
                node: self.local.to_string(),
            })?;
        handler.handle(command).await
    }

    async fn insert(&self, service: &str, handler: Arc<dyn CommandHandler>) -> Result<()> {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(service) {
            return Err(Error::AlreadyRegistered(service.to_string()));
        }
        handlers.insert(service.to_string(), handler);
        Ok(())
    }

    async fn remove(&self, service: &str) {
        self.handlers.write().await.remove(service);
    }
}

/// Creates TCP dispatchers for the local member
pub struct NetworkDispatcherFactory {
    local: Node,
    membership: Arc<ClusterMembership>,
    client: Arc<NetworkClient>,
    table: Arc<CommandTable>,
}

impl NetworkDispatcherFactory {
    pub fn new(local: Node, membership: Arc<ClusterMembership>, client: Arc<NetworkClient>) -> Self {
        let table = Arc::new(CommandTable::new(local.clone()));
        Self {
            local,
            membership,
            client,
            table,
        }
    }

    /// Handlers inbound commands are routed to
    pub fn table(&self) -> Arc<CommandTable> {
        Arc::clone(&self.table)
    }
}

#[async_trait::async_trait]
impl CommandDispatcherFactory for NetworkDispatcherFactory {
    async fn create_dispatcher(
        &self,
        service: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Arc<dyn CommandDispatcher>> {
        self.table.insert(service, handler).await?;

        Ok(Arc::new(NetworkDispatcher {
            local: self.local.clone(),
            service: service.to_string(),
            membership: Arc::clone(&self.membership),
            client: Arc::clone(&self.client),
            table: Arc::clone(&self.table),
        }))
    }
}

struct NetworkDispatcher {
    local: Node,
    service: String,
    membership: Arc<ClusterMembership>,
    client: Arc<NetworkClient>,
    table: Arc<CommandTable>,
}

#[async_trait::async_trait]
impl CommandDispatcher for NetworkDispatcher {
    fn local_node(&self) -> &Node {
        &self.local
    }

    fn submit_on_member(&self, command: SingletonCommand, target: &Node) -> CommandFuture {
        let service = self.service.clone();

        if target == &self.local {
            let table = Arc::clone(&self.table);
            return Box::pin(async move { table.handle(&service, command).await });
        }

        let client = Arc::clone(&self.client);
        let target = target.clone();
        Box::pin(async move {
            let request = Message::Command {
                service: service.clone(),
                command,
            };
            let reply = client.send(target.address(), request).await?;
            into_response(&service, &target, reply)
        })
    }

    fn submit_on_group(
        &self,
        command: SingletonCommand,
        exclude: &[Node],
    ) -> BTreeMap<Node, CommandFuture> {
        self.membership
            .view()
            .members()
            .iter()
            .filter(|member| !exclude.contains(member))
            .map(|member| (member.clone(), self.submit_on_member(command.clone(), member)))
            .collect()
    }

    async fn close(&self) {
        self.table.remove(&self.service).await;
    }
}

fn into_response(service: &str, target: &Node, reply: Message) -> Result<CommandResponse> {
    match reply {
        Message::CommandReply { response } => Ok(response),
        Message::Error { code, message } => Err(code.into_error(service, target, message)),
        other => Err(Error::Dispatch {
            target: target.to_string(),
            reason: format!("unexpected reply {}", other.type_name()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ErrorCode;
    use crate::singleton::ValueReply;
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct NotPrimary;

    #[async_trait::async_trait]
    impl CommandHandler for NotPrimary {
        async fn handle(&self, _command: SingletonCommand) -> Result<CommandResponse> {
            Ok(CommandResponse::Value(ValueReply::NotPrimary))
        }
    }

    #[tokio::test]
    async fn test_local_target_uses_loopback() {
        let local = Node::new("node-1", "127.0.0.1:1");
        let membership = Arc::new(ClusterMembership::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        membership.join(local.clone(), BTreeSet::new()).await;
        let client = Arc::new(NetworkClient::new(
            Duration::from_millis(100),
            Duration::from_millis(200),
        ));
        let factory = NetworkDispatcherFactory::new(local.clone(), membership, client);

        let dispatcher = factory
            .create_dispatcher("stamp", Arc::new(NotPrimary))
            .await
            .unwrap();

        // Nothing listens on the local address; loopback must not touch the network
        let response = dispatcher
            .submit_on_member(SingletonCommand::ValueQuery, &local)
            .await
            .unwrap();
        assert_eq!(response, CommandResponse::Value(ValueReply::NotPrimary));

        assert!(matches!(
            factory.create_dispatcher("stamp", Arc::new(NotPrimary)).await,
            Err(Error::AlreadyRegistered(_))
        ));

        dispatcher.close().await;
        let missing = factory.table().handle("stamp", SingletonCommand::ValueQuery).await;
        assert!(matches!(missing, Err(Error::NoHandler { .. })));
    }

    #[test]
    fn test_reply_decoding() {
        let target = Node::new("node-2", "localhost:7655");
        let ok = into_response(
            "stamp",
            &target,
            Message::CommandReply {
                response: CommandResponse::Value(ValueReply::StartFailed),
            },
        );
        assert_eq!(ok.unwrap(), CommandResponse::Value(ValueReply::StartFailed));

        let err = into_response(
            "stamp",
            &target,
            Message::Error {
                code: ErrorCode::ShuttingDown,
                message: String::new(),
            },
        );
        assert!(matches!(err, Err(Error::ShuttingDown)));
    }
}
