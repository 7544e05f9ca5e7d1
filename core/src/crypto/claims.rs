//! Cluster-key sealed claims
//!
//! A claim states who issued it, what it is about and when. Sealing it with
//! the cluster key proves the issuer holds the key; the timestamp bounds how
//! long a captured claim can be replayed.

use serde::{Deserialize, Serialize};

use crate::crypto::{ClusterKey, EncryptedPayload};
use crate::protocol::constants::{CLAIM_MAX_AGE_SECS, CLAIM_MAX_SKEW_SECS};
use crate::{now_secs, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPurpose {
    /// "I am a member of this cluster"
    Presence,
    /// "The subject must leave the cluster"
    Destruct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub purpose: ClaimPurpose,
    pub issuer: String,
    pub subject: String,
    pub issued_at: u64,
}

impl Claim {
    pub fn new(purpose: ClaimPurpose, issuer: &str, subject: &str) -> Self {
        Self {
            purpose,
            issuer: issuer.to_string(),
            subject: subject.to_string(),
            issued_at: now_secs(),
        }
    }

    pub fn seal(&self, key: &ClusterKey) -> Result<EncryptedPayload> {
        key.seal_json(self)
    }

    /// Open a sealed claim and check its purpose and age against `now`.
    pub fn open(
        key: &ClusterKey,
        payload: &EncryptedPayload,
        purpose: ClaimPurpose,
        now: u64,
    ) -> Result<Self> {
        let claim: Claim = key.open_json(payload)?;

        if claim.purpose != purpose {
            return Err(Error::Authentication(format!(
                "expected {:?} claim, got {:?}",
                purpose, claim.purpose
            )));
        }
        if !claim.is_fresh(now) {
            return Err(Error::Authentication(format!(
                "stale claim issued at {} (now {})",
                claim.issued_at, now
            )));
        }

        Ok(claim)
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        if self.issued_at > now {
            self.issued_at - now <= CLAIM_MAX_SKEW_SECS
        } else {
            now - self.issued_at <= CLAIM_MAX_AGE_SECS
        }
    }
}
