//! Ordered, per-peer outgoing delivery
//!
//! Each peer gets its own worker task and bounded queue, so a slow or
//! unreachable peer only delays its own messages. Within one peer, messages
//! are delivered in the order they were enqueued.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::constants::OUTBOX_CAPACITY;
use crate::protocol::Message;
use crate::sync::connection::deliver;

struct Delivery {
    addr: SocketAddr,
    message: Message,
}

enum Control {
    Enqueue { peer_id: String, delivery: Delivery },
    Forget { peer_id: String },
    ForgetAll,
}

struct Worker {
    queue: mpsc::Sender<Delivery>,
    task: JoinHandle<()>,
}

/// Cloneable handle to the delivery task
#[derive(Clone)]
pub struct Outbox {
    control: mpsc::UnboundedSender<Control>,
}

impl Outbox {
    /// Start the dispatcher. Every delivery attempt is bounded by `timeout`.
    pub fn spawn(timeout: Duration) -> (Self, JoinHandle<()>) {
        let (control, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut workers: HashMap<String, Worker> = HashMap::new();

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Control::Enqueue { peer_id, delivery } => {
                        let worker = workers
                            .entry(peer_id.clone())
                            .or_insert_with(|| spawn_worker(peer_id.clone(), timeout));

                        match worker.queue.try_send(delivery) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(d)) => {
                                tracing::warn!(
                                    "outbox for {} is full, dropping {}",
                                    peer_id,
                                    d.message.kind()
                                );
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                workers.remove(&peer_id);
                            }
                        }
                    }
                    Control::Forget { peer_id } => {
                        if let Some(worker) = workers.remove(&peer_id) {
                            worker.task.abort();
                        }
                    }
                    Control::ForgetAll => {
                        for (_, worker) in workers.drain() {
                            worker.task.abort();
                        }
                    }
                }
            }

            for (_, worker) in workers.drain() {
                worker.task.abort();
            }
        });

        (Self { control }, task)
    }

    /// Queue `message` for `peer_id` at `addr`. Never blocks.
    pub fn enqueue(&self, peer_id: &str, addr: SocketAddr, message: Message) {
        let cmd = Control::Enqueue {
            peer_id: peer_id.to_string(),
            delivery: Delivery { addr, message },
        };
        if self.control.send(cmd).is_err() {
            tracing::debug!("outbox stopped, dropping message for {}", peer_id);
        }
    }

    /// Drop everything queued for a peer
    pub fn forget(&self, peer_id: &str) {
        let _ = self.control.send(Control::Forget {
            peer_id: peer_id.to_string(),
        });
    }

    pub fn forget_all(&self) {
        let _ = self.control.send(Control::ForgetAll);
    }
}

fn spawn_worker(peer_id: String, timeout: Duration) -> Worker {
    let (queue, mut rx) = mpsc::channel::<Delivery>(OUTBOX_CAPACITY);

    let task = tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            let kind = delivery.message.kind();
            match deliver(delivery.addr, &delivery.message, timeout).await {
                Ok(()) => tracing::debug!("delivered {} to {}", kind, peer_id),
                Err(e) => tracing::warn!("failed to deliver {} to {}: {}", kind, peer_id, e),
            }
        }
    });

    Worker { queue, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PeerConnection;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let (stream, peer) = listener.accept().await.unwrap();
                let mut conn = PeerConnection::new(stream, peer);
                if let Ok(Message::Error { reason }) = conn.recv().await {
                    seen_tx.send(reason).unwrap();
                    conn.send(&Message::Ack).await.unwrap();
                }
            }
        });

        let (outbox, _task) = Outbox::spawn(Duration::from_secs(2));
        for i in 0..5 {
            outbox.enqueue("peer", addr, Message::Error { reason: i.to_string() });
        }

        for i in 0..5 {
            let got = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_block_others() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        // Accepts nothing: connections hang until the timeout.
        let _dead = dead;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = PeerConnection::new(stream, peer);
            conn.recv().await.unwrap();
            conn.send(&Message::Ack).await.unwrap();
            seen_tx.send(()).unwrap();
        });

        let (outbox, _task) = Outbox::spawn(Duration::from_secs(3));
        outbox.enqueue("slow", dead_addr, Message::Ack);
        outbox.enqueue("fast", addr, Message::Ack);

        tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
}
