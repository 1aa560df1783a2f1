//! Network Client
//!
//! TCP client for request/response exchanges with other nodes.

use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{read_message, write_message};
use super::protocol::Message;
use crate::error::{Error, Result};

/// Network client for connecting to peer nodes
///
/// Idle connections are pooled per address. A connection is checked out for
/// the whole exchange and only returned after a complete reply, so a request
/// that is cancelled mid-flight takes its connection with it.
pub struct NetworkClient {
    /// Idle connections: address -> streams
    idle: Mutex<HashMap<String, Vec<TcpStream>>>,
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout
    request_timeout: Duration,
    /// Max idle connections kept per peer
    max_idle: usize,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            connect_timeout,
            request_timeout,
            max_idle: 4,
        }
    }

    /// Send a message to a peer and wait for response
    pub async fn send(&self, address: &str, message: Message) -> Result<Message> {
        match timeout(self.request_timeout, self.send_inner(address, &message)).await {
            Ok(inner_result) => inner_result,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Send without timeout wrapper
    async fn send_inner(&self, address: &str, message: &Message) -> Result<Message> {
        // A pooled connection may have been closed by the peer; retry once fresh
        if let Some(mut stream) = self.checkout(address).await {
            match exchange(&mut stream, message).await {
                Ok(response) => {
                    self.checkin(address, stream).await;
                    return Ok(response);
                }
                Err(e) => {
                    tracing::debug!("Pooled connection to {} failed: {}", address, e);
                }
            }
        }

        let mut stream = self.connect(address).await?;
        let response = exchange(&mut stream, message).await?;
        self.checkin(address, stream).await;
        Ok(response)
    }

    /// Send without waiting for response
    pub async fn send_async(&self, address: &str, message: Message) -> Result<()> {
        let mut stream = self.connect(address).await?;
        write_message(&mut stream, &message).await?;
        Ok(())
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    async fn checkout(&self, address: &str) -> Option<TcpStream> {
        self.idle.lock().await.get_mut(address)?.pop()
    }

    async fn checkin(&self, address: &str, stream: TcpStream) {
        let mut idle = self.idle.lock().await;
        let streams = idle.entry(address.to_string()).or_default();
        if streams.len() < self.max_idle {
            streams.push(stream);
        }
    }

    /// Close all idle connections
    pub async fn close_all(&self) {
        self.idle.lock().await.clear();
    }

    /// Get idle connection count
    pub async fn connection_count(&self) -> usize {
        self.idle.lock().await.values().map(Vec::len).sum()
    }
}

/// One request/response on an open stream
async fn exchange(stream: &mut TcpStream, message: &Message) -> Result<Message> {
    let (mut reader, mut writer) = stream.split();
    write_message(&mut writer, message).await?;
    read_message(&mut reader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Node;

    #[tokio::test]
    async fn test_client_creation() {
        let client = NetworkClient::new(Duration::from_secs(5), Duration::from_secs(10));
        assert_eq!(client.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let client = NetworkClient::new(Duration::from_millis(100), Duration::from_millis(500));

        // Nothing listens on a port we just released
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let message = Message::Leave {
            node: Node::new("node-1", "localhost:7654"),
        };
        let result = client.send(&address, message).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_member_unreachable());
    }
}
