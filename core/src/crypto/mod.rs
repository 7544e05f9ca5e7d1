//! Cryptographic primitives
//!
//! - AES-256-GCM under the cluster key for everything exchanged between members
//! - SPAKE2 to turn a typed PIN into a pairing session key
//! - Sealed, time-bounded claims for presence proofs and destruct commands

mod claims;
mod encryption;
mod pake;
pub mod serde_utils;

pub use claims::{Claim, ClaimPurpose};
pub use encryption::{ClusterKey, EncryptedPayload, SessionKey};
pub use pake::PakeState;
