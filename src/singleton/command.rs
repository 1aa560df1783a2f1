//! Singleton Commands
//!
//! Payloads exchanged between coordinators of the same singleton service.

use serde::{Deserialize, Serialize};

use crate::cluster::Node;

/// Election round a Start/Stop command belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Coordinator that ran the election
    pub origin: Node,
    /// Membership epoch the election was decided at
    pub epoch: u64,
}

impl Round {
    pub fn new(origin: Node, epoch: u64) -> Self {
        Self { origin, epoch }
    }
}

/// Command addressed to the coordinator of a singleton service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingletonCommand {
    /// Become the primary provider
    Start(Round),
    /// Stop being the primary provider
    Stop(Round),
    /// Report the singleton value if primary
    ValueQuery,
}

impl SingletonCommand {
    /// Get the command name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            SingletonCommand::Start(_) => "Start",
            SingletonCommand::Stop(_) => "Stop",
            SingletonCommand::ValueQuery => "ValueQuery",
        }
    }
}

/// Outcome of applying a Start or Stop command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The role changed
    Applied,
    /// The role already matched
    Unchanged,
    /// The command came from a round older than one already applied
    Stale,
}

/// Answer to a value query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueReply {
    /// Bincode-encoded value held by the primary
    Primary(Vec<u8>),
    /// Responder is not the primary
    NotPrimary,
    /// Responder was elected but its service failed to start
    StartFailed,
}

/// Response to a singleton command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResponse {
    Started(Transition),
    Stopped(Transition),
    Value(ValueReply),
}
