//! PIN-authenticated key exchange (SPAKE2 over Ed25519, symmetric mode)
//!
//! Both sides run the same role. If the PINs differ the exchange still
//! completes but the derived session keys differ, so every use of the key
//! must be confirmed before anything secret is released.

use spake2::{Ed25519Group, Identity, Password, Spake2};

use crate::crypto::SessionKey;
use crate::protocol::constants::PAKE_IDENTITY;
use crate::{Error, Result};

/// One side of an in-flight SPAKE2 exchange
pub struct PakeState {
    inner: Spake2<Ed25519Group>,
}

impl std::fmt::Debug for PakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakeState").finish_non_exhaustive()
    }
}

impl PakeState {
    /// Start an exchange for `pin`, returning the message to send to the peer
    pub fn start(pin: &str) -> (Self, Vec<u8>) {
        let (inner, outbound) = Spake2::<Ed25519Group>::start_symmetric(
            &Password::new(pin.as_bytes()),
            &Identity::new(PAKE_IDENTITY),
        );
        (Self { inner }, outbound)
    }

    /// Finish with the peer's message and derive the session key
    pub fn finish(self, inbound: &[u8]) -> Result<SessionKey> {
        let shared = self
            .inner
            .finish(inbound)
            .map_err(|e| Error::Crypto(format!("spake2 failed: {:?}", e)))?;
        Ok(SessionKey::from_shared_secret(&shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_pins_agree() {
        let (a, msg_a) = PakeState::start("AB12CD");
        let (b, msg_b) = PakeState::start("AB12CD");

        let key_a = a.finish(&msg_b).unwrap();
        let key_b = b.finish(&msg_a).unwrap();

        let sealed = key_a.encrypt(b"cluster key").unwrap();
        assert_eq!(key_b.decrypt(&sealed).unwrap(), b"cluster key");
    }

    #[test]
    fn test_mismatched_pins_disagree() {
        let (a, msg_a) = PakeState::start("AB12CD");
        let (b, msg_b) = PakeState::start("ZZ99ZZ");

        let key_a = a.finish(&msg_b).unwrap();
        let key_b = b.finish(&msg_a).unwrap();

        let sealed = key_a.encrypt(b"cluster key").unwrap();
        assert!(key_b.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_garbage_message_rejected() {
        let (a, _) = PakeState::start("AB12CD");
        assert!(a.finish(b"not a spake message").is_err());
    }
}
