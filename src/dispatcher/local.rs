//! In-process command transport
//!
//! Routes commands between coordinators living in the same process, using
//! a shared [`ClusterMembership`] as the group. Members can be isolated to
//! simulate lost messages.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CommandDispatcher, CommandDispatcherFactory, CommandFuture, CommandHandler};
use crate::cluster::{ClusterMembership, Node};
use crate::error::{Error, Result};
use crate::singleton::{CommandResponse, SingletonCommand};

type HandlerKey = (Node, String);

/// Shared in-process message bus
pub struct LocalTransport {
    membership: Arc<ClusterMembership>,
    handlers: RwLock<HashMap<HandlerKey, Arc<dyn CommandHandler>>>,
    isolated: RwLock<HashSet<Node>>,
}

impl LocalTransport {
    pub fn new(membership: Arc<ClusterMembership>) -> Arc<Self> {
        Arc::new(Self {
            membership,
            handlers: RwLock::new(HashMap::new()),
            isolated: RwLock::new(HashSet::new()),
        })
    }

    /// Dispatcher factory for one member
    pub fn factory(self: &Arc<Self>, local: Node) -> LocalDispatcherFactory {
        LocalDispatcherFactory {
            transport: Arc::clone(self),
            local,
        }
    }

    /// Drop every command to or from `node` (its own loopback still works)
    pub async fn isolate(&self, node: &Node) {
        tracing::debug!("Isolating {}", node);
        self.isolated.write().await.insert(node.clone());
    }

    /// Undo [`isolate`](Self::isolate)
    pub async fn heal(&self, node: &Node) {
        self.isolated.write().await.remove(node);
    }

    async fn deliver(
        &self,
        source: &Node,
        target: &Node,
        service: &str,
        command: SingletonCommand,
    ) -> Result<CommandResponse> {
        if source != target {
            let isolated = self.isolated.read().await;
            if isolated.contains(source) || isolated.contains(target) {
                return Err(Error::Cancelled);
            }
        }

        if source != target && !self.membership.view().contains(target) {
            return Err(Error::Cancelled);
        }

        let handler = self
            .handlers
            .read()
            .await
            .get(&(target.clone(), service.to_string()))
            .cloned()
            .ok_or_else(|| Error::NoHandler {
                service: service.to_string(),
                node: target.to_string(),
            })?;

        tracing::trace!("{} -> {}: {} for {}", source, target, command.type_name(), service);
        handler.handle(command).await
    }
}

/// Creates in-process dispatchers for one member
pub struct LocalDispatcherFactory {
    transport: Arc<LocalTransport>,
    local: Node,
}

#[async_trait::async_trait]
impl CommandDispatcherFactory for LocalDispatcherFactory {
    async fn create_dispatcher(
        &self,
        service: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Arc<dyn CommandDispatcher>> {
        let key = (self.local.clone(), service.to_string());
        let mut handlers = self.transport.handlers.write().await;
        if handlers.contains_key(&key) {
            return Err(Error::AlreadyRegistered(service.to_string()));
        }
        handlers.insert(key, handler);

        Ok(Arc::new(LocalDispatcher {
            transport: Arc::clone(&self.transport),
            local: self.local.clone(),
            service: service.to_string(),
        }))
    }
}

struct LocalDispatcher {
    transport: Arc<LocalTransport>,
    local: Node,
    service: String,
}

#[async_trait::async_trait]
impl CommandDispatcher for LocalDispatcher {
    fn local_node(&self) -> &Node {
        &self.local
    }

    fn submit_on_member(&self, command: SingletonCommand, target: &Node) -> CommandFuture {
        let transport = Arc::clone(&self.transport);
        let source = self.local.clone();
        let target = target.clone();
        let service = self.service.clone();

        Box::pin(async move { transport.deliver(&source, &target, &service, command).await })
    }

    fn submit_on_group(
        &self,
        command: SingletonCommand,
        exclude: &[Node],
    ) -> BTreeMap<Node, CommandFuture> {
        self.transport
            .membership
            .view()
            .members()
            .iter()
            .filter(|member| !exclude.contains(member))
            .map(|member| (member.clone(), self.submit_on_member(command.clone(), member)))
            .collect()
    }

    async fn close(&self) {
        self.transport
            .handlers
            .write()
            .await
            .remove(&(self.local.clone(), self.service.clone()));
    }
}
