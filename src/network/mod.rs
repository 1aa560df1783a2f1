//! Network Module
//!
//! Handles TCP communication between nodes: framed messages, pooled
//! request/response client, the accept loop, and heartbeat gossip.

pub mod protocol;
mod server;
mod client;
mod endpoint;
mod gossip;

pub use protocol::{ErrorCode, FrameHeader, Message};
pub use server::{MessageHandler, NetworkServer};
pub use client::NetworkClient;
pub use endpoint::NodeEndpoint;
pub use gossip::Heartbeater;

use crate::error::{Error, Result};

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes)
        .ok_or_else(|| Error::Network("Invalid frame header".into()))?;

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    Ok(Message::deserialize(&body)?)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Node;

    #[tokio::test]
    async fn test_framed_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let message = Message::Leave {
            node: Node::new("node-1", "localhost:7654"),
        };

        write_message(&mut client, &message).await.unwrap();
        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received.type_name(), "Leave");
    }

    #[tokio::test]
    async fn test_corrupted_body_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(1024);
        let body = Message::Leave {
            node: Node::new("node-1", "localhost:7654"),
        }
        .serialize()
        .unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 1;

        client.write_all(&header.to_bytes()).await.unwrap();
        client.write_all(&body).await.unwrap();

        let result = read_message(&mut server).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
