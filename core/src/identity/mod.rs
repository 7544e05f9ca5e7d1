//! Device identity and cluster secret
//!
//! The device id is created once and survives restarts. The cluster (name,
//! PIN and key) is generated on first run in auto mode, replaced when the
//! user provisions one or when this device joins another cluster, and wiped
//! by a factory reset.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::ClusterKey;
use crate::protocol::constants::{MIN_PIN_LENGTH, PIN_CHARSET};
use crate::storage::{read_json, remove_file, write_json};
use crate::{now_secs, Error, Result};

const IDENTITY_FILE: &str = "identity.json";
const CLUSTER_FILE: &str = "cluster.json";

/// Public facts about this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub hostname: String,
    pub platform: String,
}

/// How the current cluster secret came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// Randomly generated on this device
    Auto,
    /// Set explicitly from a name and PIN
    Provisioned,
}

/// The active cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub network_name: String,
    pub network_pin: String,
    pub key: ClusterKey,
    pub mode: ClusterMode,
}

impl ClusterInfo {
    /// A fresh random cluster
    pub fn generate() -> Self {
        Self {
            network_name: generate_network_name(),
            network_pin: generate_pin(),
            key: ClusterKey::generate(),
            mode: ClusterMode::Auto,
        }
    }

    /// A cluster whose key is derived from name and PIN
    pub fn provisioned(network_name: &str, network_pin: &str) -> Result<Self> {
        let network_name = network_name.trim();
        if network_name.is_empty() {
            return Err(Error::InvalidState("network name must not be empty".to_string()));
        }
        validate_pin(network_pin)?;

        Ok(Self {
            network_name: network_name.to_string(),
            network_pin: network_pin.to_string(),
            key: ClusterKey::derive_provisioned(network_name, network_pin),
            mode: ClusterMode::Provisioned,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    device_id: String,
    created_at: u64,
}

#[derive(Serialize, Deserialize)]
struct ClusterFile {
    network_name: String,
    network_pin: String,
    #[serde(with = "crate::crypto::serde_utils::base64_array")]
    key: [u8; 32],
    mode: ClusterMode,
}

impl From<&ClusterInfo> for ClusterFile {
    fn from(info: &ClusterInfo) -> Self {
        Self {
            network_name: info.network_name.clone(),
            network_pin: info.network_pin.clone(),
            key: info.key.to_bytes(),
            mode: info.mode,
        }
    }
}

impl From<ClusterFile> for ClusterInfo {
    fn from(file: ClusterFile) -> Self {
        Self {
            network_name: file.network_name,
            network_pin: file.network_pin,
            key: ClusterKey::from_bytes(&file.key),
            mode: file.mode,
        }
    }
}

/// Owner of the persisted identity and cluster files
#[derive(Debug)]
pub struct IdentityStore {
    data_dir: PathBuf,
    device_id: String,
    hostname: String,
    cluster: ClusterInfo,
}

impl IdentityStore {
    /// Load identity and cluster from `data_dir`, generating (and saving)
    /// whatever is missing or unreadable.
    pub fn open(data_dir: &Path, hostname: String) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let identity_path = data_dir.join(IDENTITY_FILE);
        let device_id = match read_json::<IdentityFile>(&identity_path) {
            Ok(Some(file)) if !file.device_id.is_empty() => file.device_id,
            Ok(_) => Self::write_new_identity(&identity_path)?,
            Err(e) => {
                tracing::warn!("identity unreadable, generating a new one: {}", e);
                Self::write_new_identity(&identity_path)?
            }
        };

        let cluster_path = data_dir.join(CLUSTER_FILE);
        let cluster = match read_json::<ClusterFile>(&cluster_path) {
            Ok(Some(file)) => file.into(),
            Ok(None) => {
                let cluster = ClusterInfo::generate();
                write_json(&cluster_path, &ClusterFile::from(&cluster))?;
                tracing::info!("created network {}", cluster.network_name);
                cluster
            }
            Err(e) => {
                tracing::warn!("cluster file unreadable, generating a new network: {}", e);
                let cluster = ClusterInfo::generate();
                write_json(&cluster_path, &ClusterFile::from(&cluster))?;
                cluster
            }
        };

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            device_id,
            hostname,
            cluster,
        })
    }

    fn write_new_identity(path: &Path) -> Result<String> {
        let file = IdentityFile {
            device_id: uuid::Uuid::new_v4().to_string(),
            created_at: now_secs(),
        };
        write_json(path, &file)?;
        tracing::info!("generated device id {}", file.device_id);
        Ok(file.device_id)
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            device_id: self.device_id.clone(),
            hostname: self.hostname.clone(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn set_hostname(&mut self, hostname: String) {
        self.hostname = hostname;
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    /// Switch to a provisioned cluster bound to (name, pin).
    pub fn set_cluster_identity(&mut self, network_name: &str, network_pin: &str) -> Result<()> {
        let cluster = ClusterInfo::provisioned(network_name, network_pin)?;
        self.install(cluster)
    }

    /// Back to a fresh random (auto) cluster
    pub fn regenerate_cluster_identity(&mut self) -> Result<()> {
        self.install(ClusterInfo::generate())
    }

    /// Adopt a cluster received from a member
    pub fn install(&mut self, cluster: ClusterInfo) -> Result<()> {
        write_json(&self.data_dir.join(CLUSTER_FILE), &ClusterFile::from(&cluster))?;
        tracing::info!(
            "network is now {} (key {})",
            cluster.network_name,
            cluster.key.fingerprint()
        );
        self.cluster = cluster;
        Ok(())
    }

    /// Forget identity and cluster; start over as a network of one.
    pub fn factory_reset(&mut self) -> Result<()> {
        let identity_path = self.data_dir.join(IDENTITY_FILE);
        remove_file(&identity_path)?;
        remove_file(&self.data_dir.join(CLUSTER_FILE))?;

        self.device_id = Self::write_new_identity(&identity_path)?;
        self.install(ClusterInfo::generate())
    }
}

/// Random 6-character PIN from A-Z0-9
pub fn generate_pin() -> String {
    let mut rng = rand::thread_rng();
    (0..MIN_PIN_LENGTH)
        .map(|_| PIN_CHARSET[rng.gen_range(0..PIN_CHARSET.len())] as char)
        .collect()
}

/// Random human-readable network name
pub fn generate_network_name() -> String {
    names::Generator::default()
        .next()
        .unwrap_or_else(|| format!("network-{}", generate_pin().to_lowercase()))
}

pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.chars().count() < MIN_PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidState(format!(
            "PIN must be at least {} letters or digits",
            MIN_PIN_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let first = IdentityStore::open(dir.path(), "desk".into()).unwrap();
        let second = IdentityStore::open(dir.path(), "desk".into()).unwrap();

        assert_eq!(first.device_id(), second.device_id());
        assert_eq!(first.cluster(), second.cluster());
        assert_eq!(second.identity().platform, std::env::consts::OS);
    }

    #[test]
    fn test_corrupt_identity_regenerates() {
        let dir = tempfile::tempdir().unwrap();
        let first = IdentityStore::open(dir.path(), "desk".into()).unwrap();

        std::fs::write(dir.path().join(IDENTITY_FILE), b"garbage").unwrap();
        std::fs::write(dir.path().join(CLUSTER_FILE), b"{\"network_name\": 3}").unwrap();

        let second = IdentityStore::open(dir.path(), "desk".into()).unwrap();
        assert_ne!(first.device_id(), second.device_id());
        assert_ne!(first.cluster().key, second.cluster().key);

        // and the regenerated state is what the next start sees
        let third = IdentityStore::open(dir.path(), "desk".into()).unwrap();
        assert_eq!(second.device_id(), third.device_id());
    }

    #[test]
    fn test_auto_cluster_shape() {
        let cluster = ClusterInfo::generate();
        assert_eq!(cluster.mode, ClusterMode::Auto);
        assert!(!cluster.network_name.is_empty());
        assert_eq!(cluster.network_pin.len(), 6);
        assert!(validate_pin(&cluster.network_pin).is_ok());
    }

    #[test]
    fn test_provisioned_cluster_is_deterministic() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let mut a = IdentityStore::open(dir_a.path(), "a".into()).unwrap();
        let mut b = IdentityStore::open(dir_b.path(), "b".into()).unwrap();

        a.set_cluster_identity("alpha", "AB12CD").unwrap();
        b.set_cluster_identity("alpha", "AB12CD").unwrap();

        assert_eq!(a.cluster().key, b.cluster().key);
        assert_eq!(a.cluster().mode, ClusterMode::Provisioned);
    }

    #[test]
    fn test_provisioning_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::open(dir.path(), "a".into()).unwrap();
        let before = store.cluster().clone();

        assert!(store.set_cluster_identity("", "AB12CD").is_err());
        assert!(store.set_cluster_identity("alpha", "AB1").is_err());
        assert!(store.set_cluster_identity("alpha", "AB 12CD").is_err());
        assert_eq!(store.cluster(), &before);
    }

    #[test]
    fn test_factory_reset_replaces_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdentityStore::open(dir.path(), "a".into()).unwrap();
        store.set_cluster_identity("alpha", "AB12CD").unwrap();
        let old_id = store.device_id().to_string();

        store.factory_reset().unwrap();

        assert_ne!(store.device_id(), old_id);
        assert_ne!(store.cluster().network_name, "alpha");
        assert_eq!(store.cluster().mode, ClusterMode::Auto);

        let reopened = IdentityStore::open(dir.path(), "a".into()).unwrap();
        assert_eq!(reopened.device_id(), store.device_id());
        assert_eq!(reopened.cluster(), store.cluster());
    }
}
