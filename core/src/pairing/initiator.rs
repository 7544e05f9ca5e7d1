//! Joining side of the pairing handshake

use std::net::SocketAddr;
use std::time::Duration;

use crate::crypto::PakeState;
use crate::error::PairingFailure;
use crate::pairing::{confirmation_text, ClusterSecret, LocalDevice};
use crate::peers::Peer;
use crate::protocol::{Message, PairRequestMessage, PairResponseMessage};
use crate::sync::PeerConnection;
use crate::{now_secs, Error};

/// A successful join: the member that answered and the secret it sent
#[derive(Debug, Clone)]
pub struct PairingOutcome {
    pub responder: Peer,
    pub secret: ClusterSecret,
}

fn failure(e: Error) -> PairingFailure {
    match e {
        Error::Timeout(_) => PairingFailure::Timeout,
        Error::Network(reason) => PairingFailure::Unreachable(reason),
        Error::Pairing(f) => f,
        other => PairingFailure::Protocol(other.to_string()),
    }
}

fn unexpected(message: Message) -> PairingFailure {
    match message {
        Message::PairReject { .. } => PairingFailure::WrongPin,
        Message::Error { reason } => PairingFailure::Protocol(reason),
        other => PairingFailure::Protocol(format!("unexpected {}", other.kind())),
    }
}

/// Pair with the member at `addr` using `pin`. `on_response` runs once the
/// member has answered with its PAKE message. The caller bounds the whole
/// exchange with its own deadline; `step_timeout` bounds each network step.
pub async fn initiate(
    addr: SocketAddr,
    me: &LocalDevice,
    pin: &str,
    step_timeout: Duration,
    on_response: impl FnOnce(),
) -> Result<PairingOutcome, PairingFailure> {
    let mut conn = PeerConnection::connect(addr, step_timeout)
        .await
        .map_err(|e| match e {
            Error::Timeout(_) => PairingFailure::Unreachable(format!("{} did not accept", addr)),
            other => failure(other),
        })?;

    let (pake, outbound) = PakeState::start(pin);
    let request = Message::PairRequest(PairRequestMessage {
        device_id: me.device_id.clone(),
        hostname: me.hostname.clone(),
        port: me.port,
        pake: outbound,
    });

    let response: PairResponseMessage = match conn.request(&request, step_timeout).await.map_err(failure)? {
        Message::PairResponse(response) => response,
        other => return Err(unexpected(other)),
    };
    on_response();

    // A malformed PAKE message is indistinguishable from a wrong PIN.
    let session = pake.finish(&response.pake).map_err(|_| PairingFailure::WrongPin)?;

    let confirmation = session
        .encrypt(&confirmation_text(&me.device_id, &response.device_id))
        .map_err(failure)?;

    let sealed = match conn
        .request(&Message::PairConfirm { confirmation }, step_timeout)
        .await
        .map_err(failure)?
    {
        Message::Welcome { sealed } => sealed,
        other => return Err(unexpected(other)),
    };

    let plaintext = session.decrypt(&sealed).map_err(|_| PairingFailure::WrongPin)?;
    let secret: ClusterSecret = serde_json::from_slice(&plaintext)
        .map_err(|e| PairingFailure::Protocol(format!("invalid cluster secret: {}", e)))?;

    tracing::info!(
        "joined network {} via {} ({})",
        secret.network_name,
        response.hostname,
        response.device_id
    );

    let responder = Peer {
        id: response.device_id,
        address: addr,
        hostname: response.hostname,
        network_name: Some(secret.network_name.clone()),
        is_trusted: true,
        is_manual: false,
        last_seen: now_secs(),
        online: true,
    };

    Ok(PairingOutcome { responder, secret })
}
