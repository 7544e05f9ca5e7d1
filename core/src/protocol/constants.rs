//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

use std::time::Duration;

/// Default TCP port for discovery probes and direct connections
pub const DEFAULT_PORT: u16 = 4654;

/// mDNS service type for discovery
pub const SERVICE_TYPE: &str = "_clusterclip._tcp.local.";

/// URL prefix for join invites
pub const INVITE_URL_PREFIX: &str = "clusterclip://join?";

/// Info string used in session key derivation (HKDF-like)
pub const SESSION_KEY_INFO: &[u8] = b"clusterclip-session-key";

/// Domain separator for provisioned cluster keys
pub const PROVISIONED_KEY_INFO: &[u8] = b"clusterclip-provisioned-v1";

/// SPAKE2 identity shared by both sides of the symmetric exchange
pub const PAKE_IDENTITY: &[u8] = b"clusterclip-pairing";

/// Maximum message size (10 MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Current protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;

/// Minimum number of characters in a network PIN
pub const MIN_PIN_LENGTH: usize = 6;

/// Characters used for generated PINs
pub const PIN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Sealed claims older than this are rejected
pub const CLAIM_MAX_AGE_SECS: u64 = 60;

/// Tolerated clock skew for claims issued "in the future"
pub const CLAIM_MAX_SKEW_SECS: u64 = 10;

/// Deadline for a whole pairing exchange
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a single request/response exchange with a peer
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound connections silent for this long are closed
pub const INBOUND_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a manual/CIDR probe
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Peers not seen for this long are considered offline
pub const PEER_LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

/// How often stale peers are pruned
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

/// How often manual and trusted peers are pinged
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Concurrent probes per batch when scanning a CIDR range
pub const SCAN_BATCH_SIZE: usize = 50;

/// Largest CIDR range accepted for a manual scan
pub const MAX_SCAN_HOSTS: u128 = 4096;

/// Bytes per file chunk
pub const FILE_CHUNK_SIZE: u64 = 256 * 1024;

/// Deadline for a single file chunk round trip
pub const FILE_CHUNK_TIMEOUT: Duration = Duration::from_secs(10);

/// Pending messages per peer before the outbox starts dropping
pub const OUTBOX_CAPACITY: usize = 32;

/// Capacity of the host notification queue
pub const NOTIFICATION_CAPACITY: usize = 256;

/// Default number of history entries kept
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Default size limit for automatic downloads (50 MB)
pub const DEFAULT_MAX_AUTO_DOWNLOAD: u64 = 50 * 1024 * 1024;
