//! Wire Protocol
//!
//! Defines the messages exchanged between nodes.

use serde::{Deserialize, Serialize};

use crate::cluster::Node;
use crate::error::Error;
use crate::singleton::{CommandResponse, SingletonCommand};

/// Protocol messages for node communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // ========== Membership ==========
    /// Periodic liveness announcement
    Heartbeat {
        from: Node,
        epoch: u64,
        services: Vec<String>,
    },

    /// Graceful departure
    Leave {
        node: Node,
    },

    // ========== Singleton Commands ==========
    /// Command for the coordinator of `service` on the receiving node
    Command {
        service: String,
        command: SingletonCommand,
    },

    /// Successful command outcome
    CommandReply {
        response: CommandResponse,
    },

    // ========== Error ==========
    /// Error response
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No coordinator registered for the service
    NoHandler,
    /// The elected service failed to start
    StartFailed,
    /// Receiver is shutting down
    ShuttingDown,
    /// Malformed or unexpected request
    BadRequest,
    /// Internal error
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "Heartbeat",
            Message::Leave { .. } => "Leave",
            Message::Command { .. } => "Command",
            Message::CommandReply { .. } => "CommandReply",
            Message::Error { .. } => "Error",
        }
    }

    /// Encode a local command failure for the requester
    pub fn from_error(error: &Error) -> Self {
        let code = match error {
            Error::NoHandler { .. } => ErrorCode::NoHandler,
            Error::StartFailed { .. } => ErrorCode::StartFailed,
            Error::ShuttingDown => ErrorCode::ShuttingDown,
            _ => ErrorCode::Internal,
        };
        Message::Error {
            code,
            message: error.to_string(),
        }
    }
}

impl ErrorCode {
    /// Rebuild the requester-side error for a command sent to `target`
    pub fn into_error(self, service: &str, target: &Node, message: String) -> Error {
        match self {
            ErrorCode::NoHandler => Error::NoHandler {
                service: service.to_string(),
                node: target.to_string(),
            },
            ErrorCode::StartFailed => Error::StartFailed {
                service: service.to_string(),
                reason: message,
            },
            ErrorCode::ShuttingDown => Error::ShuttingDown,
            ErrorCode::BadRequest | ErrorCode::Internal => Error::Dispatch {
                target: target.to_string(),
                reason: message,
            },
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 10;

    /// Frame marker ("WS")
    pub const MAGIC: u16 = 0x5753;

    /// Largest accepted message body
    pub const MAX_LENGTH: u32 = 16 * 1024 * 1024;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&Self::MAGIC.to_le_bytes());
        bytes[2..6].copy_from_slice(&self.length.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes, rejecting foreign or oversized frames
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let length = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let checksum = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

        if magic != Self::MAGIC || length > Self::MAX_LENGTH {
            return None;
        }
        Some(Self { length, checksum })
    }
}
