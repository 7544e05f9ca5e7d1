//! Dispatch of inbound connections
//!
//! Runs on the connection's own task. Anything that touches state goes
//! through the handle; only pairing and file serving stay on the socket.

use crate::pairing::respond;
use std::time::Duration;

use crate::protocol::constants::{FILE_CHUNK_TIMEOUT, INBOUND_IDLE_TIMEOUT, REQUEST_TIMEOUT};
use crate::protocol::Message;
use crate::sync::PeerConnection;
use crate::transfer::serve_file;
use crate::{Error, Result};

use super::actor::Command;
use super::ServiceHandle;

fn reply(result: Result<()>) -> Message {
    match result {
        Ok(()) => Message::Ack,
        Err(e) => Message::Error {
            reason: e.to_string(),
        },
    }
}

pub(super) async fn serve(conn: PeerConnection, handle: ServiceHandle) -> Result<()> {
    serve_until_idle(conn, handle, INBOUND_IDLE_TIMEOUT).await
}

async fn serve_until_idle(mut conn: PeerConnection, handle: ServiceHandle, idle: Duration) -> Result<()> {
    let source = conn.peer_addr();

    loop {
        let message = match conn.recv_timeout(idle).await {
            Ok(message) => message,
            // Peer hung up
            Err(Error::Network(_)) => return Ok(()),
            Err(Error::Timeout(_)) => {
                tracing::debug!("closing idle connection from {}", source);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        tracing::trace!("{} from {}", message.kind(), source);

        match message {
            Message::Hello(hello) => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                handle
                    .send(Command::Presence {
                        hello,
                        source,
                        manual: false,
                        respond_to: Some(tx),
                    })
                    .await?;
                if let Ok(Err(e)) = rx.await {
                    tracing::debug!("hello from {} not recorded: {}", source, e);
                }

                let (tx, rx) = tokio::sync::oneshot::channel();
                handle.send(Command::LocalHello { respond_to: tx }).await?;
                let ours = rx.await.map_err(|_| Error::ServiceStopped)??;
                conn.send(&Message::Hello(ours)).await?;
            }

            Message::PairRequest(request) => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                handle.send(Command::ResponderContext { respond_to: tx }).await?;
                let ctx = rx.await.map_err(|_| Error::ServiceStopped)?;

                tracing::info!("{} ({}) asks to join", request.hostname, request.device_id);
                let peer = respond(&mut conn, request, &ctx, REQUEST_TIMEOUT).await?;
                tracing::info!("{} joined the network", peer.hostname);

                handle
                    .send(Command::JoinerAccepted {
                        peer,
                        key: ctx.secret.key,
                    })
                    .await?;
                return Ok(());
            }

            Message::ClipboardSync { sender_id, sealed } => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                handle
                    .send(Command::RemoteClipboard {
                        sender_id,
                        sealed,
                        source,
                        respond_to: tx,
                    })
                    .await?;
                let result = rx.await.map_err(|_| Error::ServiceStopped)?;
                conn.send(&reply(result)).await?;
            }

            Message::HistoryDelete { sender_id, sealed } => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                handle
                    .send(Command::RemoteHistoryDelete {
                        sender_id,
                        sealed,
                        source,
                        respond_to: tx,
                    })
                    .await?;
                let result = rx.await.map_err(|_| Error::ServiceStopped)?;
                conn.send(&reply(result)).await?;
            }

            Message::Destruct { sender_id, sealed } => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                handle
                    .send(Command::Destruct {
                        sender_id,
                        sealed,
                        source,
                        respond_to: tx,
                    })
                    .await?;
                let result = rx.await.map_err(|_| Error::ServiceStopped)?;
                conn.send(&reply(result)).await?;
            }

            Message::FileRequest { sender_id, sealed } => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                handle
                    .send(Command::ResolveFileRequest {
                        sender_id: sender_id.clone(),
                        sealed,
                        source,
                        respond_to: tx,
                    })
                    .await?;

                match rx.await.map_err(|_| Error::ServiceStopped)? {
                    Ok(served) => {
                        serve_file(
                            &mut conn,
                            &served.key,
                            &served.path,
                            &sender_id,
                            served.request,
                            FILE_CHUNK_TIMEOUT,
                        )
                        .await?;
                    }
                    Err(e) => {
                        tracing::warn!("refused file request from {}: {}", sender_id, e);
                        conn.send(&reply(Err(e))).await?;
                    }
                }
                return Ok(());
            }

            other => {
                conn.send(&Message::Error {
                    reason: format!("unexpected {}", other.kind()),
                })
                .await?;
                return Ok(());
            }
        }
    }
}
