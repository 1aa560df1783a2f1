//! Command Dispatcher Module
//!
//! Sends singleton commands to one member or to every member of the view.
//! Each target gets its own future, so targets fail and can be cancelled
//! independently of each other.

mod local;
mod network;

use std::collections::BTreeMap;
use std::sync::Arc;
use futures::future::{self, BoxFuture};

use crate::cluster::Node;
use crate::error::Result;
use crate::singleton::{CommandResponse, SingletonCommand};

pub use local::{LocalDispatcherFactory, LocalTransport};
pub use network::{CommandTable, NetworkDispatcherFactory};

/// Pending response from one target. Dropping it cancels the request.
pub type CommandFuture = BoxFuture<'static, Result<CommandResponse>>;

/// Executes commands addressed to the local coordinator of a service
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: SingletonCommand) -> Result<CommandResponse>;
}

/// Dispatches commands for one singleton service
#[async_trait::async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// The member this dispatcher sends from
    fn local_node(&self) -> &Node;

    /// Execute `command` on `target`
    fn submit_on_member(&self, command: SingletonCommand, target: &Node) -> CommandFuture;

    /// Execute `command` on every member of the current view except `exclude`
    fn submit_on_group(
        &self,
        command: SingletonCommand,
        exclude: &[Node],
    ) -> BTreeMap<Node, CommandFuture>;

    /// Unregister the local handler
    async fn close(&self);
}

/// Creates dispatchers bound to a service name
#[async_trait::async_trait]
pub trait CommandDispatcherFactory: Send + Sync {
    /// Register `handler` for `service` on the local member and return a
    /// dispatcher that addresses the same service elsewhere.
    async fn create_dispatcher(
        &self,
        service: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Arc<dyn CommandDispatcher>>;
}

/// Await every per-member future, keeping each member's outcome separate
pub async fn collect(
    pending: BTreeMap<Node, CommandFuture>,
) -> BTreeMap<Node, Result<CommandResponse>> {
    let (nodes, futures): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
    let results = future::join_all(futures).await;
    nodes.into_iter().zip(results).collect()
}
