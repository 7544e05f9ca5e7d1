use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Clusterclip error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Pairing failed: {0}")]
    Pairing(PairingFailure),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Peer is not trusted: {0}")]
    NotTrusted(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service is not running")]
    ServiceStopped,
}

impl Error {
    /// Failures worth retrying on the next broadcast or discovery cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Timeout(_)
                | Error::Pairing(PairingFailure::Timeout)
                | Error::Pairing(PairingFailure::Unreachable(_))
        )
    }
}

/// Reason reported to the host when a pairing attempt fails.
///
/// `WrongPin` covers every authentication divergence so a failed attempt
/// never reveals which step went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PairingFailure {
    WrongPin,
    Timeout,
    Unreachable(String),
    Superseded,
    Protocol(String),
}

impl std::fmt::Display for PairingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingFailure::WrongPin => write!(f, "authentication failed, check the PIN and try again"),
            PairingFailure::Timeout => write!(f, "peer did not answer in time"),
            PairingFailure::Unreachable(e) => write!(f, "peer unreachable: {}", e),
            PairingFailure::Superseded => write!(f, "superseded by a newer pairing attempt"),
            PairingFailure::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

impl From<PairingFailure> for Error {
    fn from(failure: PairingFailure) -> Self {
        Error::Pairing(failure)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
