//! Peer connection handling

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::protocol::Message;
use crate::sync::framing::{read_message, write_message};
use crate::{Error, Result};

/// A framed TCP connection to another member
pub struct PeerConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl PeerConnection {
    /// Wrap an accepted stream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self { stream, peer_addr }
    }

    /// Connect to a peer, giving up after `timeout`
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| Error::Network(format!("connect to {}: {}", addr, e)))?;

        stream.set_nodelay(true).ok();

        Ok(Self::new(stream, addr))
    }

    /// Send a message to the peer
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        write_message(&mut self.stream, message).await
    }

    /// Receive a message from the peer
    pub async fn recv(&mut self) -> Result<Message> {
        read_message(&mut self.stream).await
    }

    /// Receive with a deadline
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| Error::Timeout(format!("no reply from {}", self.peer_addr)))?
    }

    /// Send a message and wait for the reply
    pub async fn request(&mut self, message: &Message, timeout: Duration) -> Result<Message> {
        self.send(message).await?;
        self.recv_timeout(timeout).await
    }

    /// Remote address of the connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Open a connection, exchange one request/response and close it.
pub async fn request_once(addr: SocketAddr, message: &Message, timeout: Duration) -> Result<Message> {
    let mut conn = PeerConnection::connect(addr, timeout).await?;
    conn.request(message, timeout).await
}

/// Like [`request_once`] but expects an `Ack`.
pub async fn deliver(addr: SocketAddr, message: &Message, timeout: Duration) -> Result<()> {
    match request_once(addr, message, timeout).await? {
        Message::Ack => Ok(()),
        Message::Error { reason } => Err(Error::Network(format!("{} refused: {}", addr, reason))),
        other => Err(Error::InvalidMessage(format!(
            "expected ack from {}, got {}",
            addr,
            other.kind()
        ))),
    }
}
