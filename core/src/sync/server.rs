//! TCP server for accepting peer connections

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::sync::PeerConnection;
use crate::{Error, Result};

/// TCP sync server
pub struct SyncServer {
    listener: TcpListener,
    port: u16,
}

impl SyncServer {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind port {}: {}", port, e)))?;

        let actual_port = listener.local_addr()
            .map_err(|e| Error::Network(e.to_string()))?
            .port();

        tracing::info!("sync server listening on port {}", actual_port);

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Bind to `port`, or to a random port if it is taken
    pub async fn bind_or_fallback(port: u16) -> Result<Self> {
        match Self::bind(port).await {
            Ok(server) => Ok(server),
            Err(e) if port != 0 => {
                tracing::warn!("{}, falling back to a random port", e);
                Self::bind(0).await
            }
            Err(e) => Err(e),
        }
    }

    /// Get the port we're listening on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept connections forever, running `handler` on its own task for each
    pub fn start<F, Fut>(self, handler: F) -> SyncServerHandle
    where
        F: Fn(PeerConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        let task = tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!("incoming connection from {}", addr);
                        stream.set_nodelay(true).ok();
                        let handler = handler.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handler(PeerConnection::new(stream, addr)).await {
                                tracing::warn!("connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                    }
                }
            }
        });

        SyncServerHandle { task }
    }
}

/// Handle to the running sync server
pub struct SyncServerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SyncServerHandle {
    /// Stop the server
    pub fn abort(&self) {
        self.task.abort();
    }
}
