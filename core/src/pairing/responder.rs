//! Member side of the pairing handshake

use std::net::SocketAddr;
use std::time::Duration;

use crate::crypto::PakeState;
use crate::error::PairingFailure;
use crate::pairing::{confirmation_text, ClusterSecret, REJECT_REASON};
use crate::peers::Peer;
use crate::protocol::{Message, PairRequestMessage, PairResponseMessage};
use crate::sync::PeerConnection;
use crate::{now_secs, Error, Result};

/// What the member needs to answer a join
#[derive(Debug, Clone)]
pub struct ResponderContext {
    pub device_id: String,
    pub hostname: String,
    pub pin: String,
    pub secret: ClusterSecret,
}

async fn reject(conn: &mut PeerConnection) -> Error {
    if let Err(e) = conn
        .send(&Message::PairReject {
            reason: REJECT_REASON.to_string(),
        })
        .await
    {
        tracing::debug!("could not send pairing rejection: {}", e);
    }
    Error::Pairing(PairingFailure::WrongPin)
}

/// Answer a `PairRequest` already read from `conn`. On success returns the
/// joiner as a trusted peer.
pub async fn respond(
    conn: &mut PeerConnection,
    request: PairRequestMessage,
    ctx: &ResponderContext,
    step_timeout: Duration,
) -> Result<Peer> {
    let (pake, outbound) = PakeState::start(&ctx.pin);
    conn.send(&Message::PairResponse(PairResponseMessage {
        device_id: ctx.device_id.clone(),
        hostname: ctx.hostname.clone(),
        pake: outbound,
    }))
    .await?;

    let confirmation = match conn.recv_timeout(step_timeout).await? {
        Message::PairConfirm { confirmation } => confirmation,
        other => {
            tracing::warn!("pairing with {} aborted by {}", request.device_id, other.kind());
            return Err(reject(conn).await);
        }
    };

    let expected = confirmation_text(&request.device_id, &ctx.device_id);
    let confirmed = pake
        .finish(&request.pake)
        .and_then(|session| {
            let opened = session.decrypt(&confirmation)?;
            Ok((session, opened))
        })
        .ok()
        .filter(|(_, opened)| *opened == expected);

    let Some((session, _)) = confirmed else {
        tracing::warn!(
            "pairing attempt from {} ({}) failed verification",
            request.hostname,
            conn.peer_addr()
        );
        return Err(reject(conn).await);
    };

    let sealed = session.encrypt(&serde_json::to_vec(&ctx.secret)?)?;
    conn.send(&Message::Welcome { sealed }).await?;

    tracing::info!("{} ({}) joined the network", request.hostname, request.device_id);

    Ok(Peer {
        id: request.device_id,
        address: SocketAddr::new(conn.peer_addr().ip(), request.port),
        hostname: request.hostname,
        network_name: Some(ctx.secret.network_name.clone()),
        is_trusted: true,
        is_manual: false,
        last_seen: now_secs(),
        online: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PairingFailure;
    use crate::identity::ClusterInfo;
    use crate::pairing::{initiate, LocalDevice};
    use tokio::net::TcpListener;

    async fn spawn_member(pin: &str, cluster: ClusterInfo) -> (SocketAddr, tokio::task::JoinHandle<Result<Peer>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = ResponderContext {
            device_id: "member".into(),
            hostname: "member-host".into(),
            pin: pin.to_string(),
            secret: ClusterSecret::new(&cluster, vec![]),
        };

        let task = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = PeerConnection::new(stream, peer);
            let Message::PairRequest(request) = conn.recv().await? else {
                panic!("expected pair request");
            };
            respond(&mut conn, request, &ctx, Duration::from_secs(5)).await
        });

        (addr, task)
    }

    fn joiner() -> LocalDevice {
        LocalDevice {
            device_id: "joiner".into(),
            hostname: "joiner-host".into(),
            port: 7000,
        }
    }

    #[tokio::test]
    async fn test_matching_pin_transfers_cluster() {
        let cluster = ClusterInfo::provisioned("alpha", "AB12CD").unwrap();
        let (addr, member) = spawn_member("AB12CD", cluster.clone()).await;

        let mut answered = false;
        let outcome = initiate(addr, &joiner(), "AB12CD", Duration::from_secs(5), || answered = true)
            .await
            .unwrap();

        assert!(answered);
        assert_eq!(outcome.secret.cluster(), cluster);
        assert_eq!(outcome.responder.id, "member");
        assert!(outcome.responder.is_trusted);

        let joined = member.await.unwrap().unwrap();
        assert_eq!(joined.id, "joiner");
        assert_eq!(joined.address.port(), 7000);
    }

    #[tokio::test]
    async fn test_wrong_pin_fails_uniformly() {
        let cluster = ClusterInfo::provisioned("alpha", "AB12CD").unwrap();
        let (addr, member) = spawn_member("AB12CD", cluster).await;

        let result = initiate(addr, &joiner(), "ZZ99ZZ", Duration::from_secs(5), || {}).await;
        assert_eq!(result.unwrap_err(), PairingFailure::WrongPin);

        let member_result = member.await.unwrap();
        assert!(matches!(member_result, Err(Error::Pairing(PairingFailure::WrongPin))));
    }

    #[tokio::test]
    async fn test_unreachable_member() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = initiate(addr, &joiner(), "AB12CD", Duration::from_secs(1), || {}).await;
        assert!(matches!(result, Err(PairingFailure::Unreachable(_))));
    }
}
