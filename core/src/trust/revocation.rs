//! Destruct ("kick") commands
//!
//! Any member may expel any other. The command is a destruct claim sealed
//! with the cluster key and addressed to one device; only that device acts
//! on it, and only if it opens under its own key.

use crate::crypto::{Claim, ClaimPurpose, ClusterKey, EncryptedPayload};
use crate::protocol::Message;
use crate::{Error, Result};

/// Build the command telling `target` to leave the cluster
pub fn destruct_command(key: &ClusterKey, issuer: &str, target: &str) -> Result<Message> {
    let sealed = Claim::new(ClaimPurpose::Destruct, issuer, target).seal(key)?;
    Ok(Message::Destruct {
        sender_id: issuer.to_string(),
        sealed,
    })
}

/// Check a received destruct command. `Ok` means this device must reset.
pub fn verify_destruct(
    key: &ClusterKey,
    my_id: &str,
    sender_id: &str,
    sealed: &EncryptedPayload,
    now: u64,
) -> Result<Claim> {
    let claim = Claim::open(key, sealed, ClaimPurpose::Destruct, now)?;

    if claim.subject != my_id {
        return Err(Error::Authentication(format!(
            "destruct addressed to {}, not this device",
            claim.subject
        )));
    }
    if claim.issuer != sender_id {
        return Err(Error::Authentication(format!(
            "destruct issued by {} but sent by {}",
            claim.issuer, sender_id
        )));
    }

    Ok(claim)
}
