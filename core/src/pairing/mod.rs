//! PIN pairing
//!
//! A joiner and any existing member run SPAKE2 keyed by the PIN over one TCP
//! connection. The joiner proves it derived the same session key before the
//! member releases the cluster secret, sealed under that key. Every failure
//! that could depend on the PIN looks the same from the outside.
//!
//! ```text
//! joiner                         member
//!   PairRequest { pake }   ->
//!                          <-    PairResponse { pake }
//!   PairConfirm { mac }    ->
//!                          <-    Welcome { sealed secret } | PairReject
//! ```

mod initiator;
mod registry;
mod responder;

pub use initiator::{initiate, PairingOutcome};
pub use registry::{PairingRegistry, PairingState};
pub use responder::{respond, ResponderContext};

use serde::{Deserialize, Serialize};

use crate::crypto::ClusterKey;
use crate::identity::{ClusterInfo, ClusterMode};
use crate::peers::Peer;

/// Reason sent with every `PairReject`
pub const REJECT_REASON: &str = "pairing rejected";

/// This device as the other side of a pairing sees it
#[derive(Debug, Clone)]
pub struct LocalDevice {
    pub device_id: String,
    pub hostname: String,
    pub port: u16,
}

/// What a new member receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSecret {
    pub network_name: String,
    pub network_pin: String,
    pub mode: ClusterMode,
    #[serde(with = "crate::crypto::serde_utils::base64_array")]
    pub key: [u8; 32],
    /// The responder's other trusted members
    pub members: Vec<Peer>,
}

impl ClusterSecret {
    pub fn new(cluster: &ClusterInfo, members: Vec<Peer>) -> Self {
        Self {
            network_name: cluster.network_name.clone(),
            network_pin: cluster.network_pin.clone(),
            mode: cluster.mode,
            key: cluster.key.to_bytes(),
            members,
        }
    }

    pub fn cluster(&self) -> ClusterInfo {
        ClusterInfo {
            network_name: self.network_name.clone(),
            network_pin: self.network_pin.clone(),
            key: ClusterKey::from_bytes(&self.key),
            mode: self.mode,
        }
    }
}

/// Plaintext the joiner seals to prove it holds the session key
pub(crate) fn confirmation_text(joiner_id: &str, responder_id: &str) -> Vec<u8> {
    format!("confirm:{}:{}", joiner_id, responder_id).into_bytes()
}
