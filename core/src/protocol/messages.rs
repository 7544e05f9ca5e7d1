//! Protocol message definitions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::EncryptedPayload;

/// All core-to-core messages.
///
/// Everything after the pairing handshake carries its payload sealed under
/// the cluster key, so only members can produce or read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Presence announcement, answered with the receiver's own `Hello`
    Hello(HelloMessage),

    /// Pairing step 1: joiner's PAKE message
    PairRequest(PairRequestMessage),

    /// Pairing step 2: responder's PAKE message
    PairResponse(PairResponseMessage),

    /// Pairing step 3: proof that the joiner derived the same session key
    PairConfirm { confirmation: EncryptedPayload },

    /// Pairing step 4: cluster secret sealed under the session key
    Welcome { sealed: EncryptedPayload },

    /// Pairing failed. The reason is deliberately uninformative.
    PairReject { reason: String },

    /// A clipboard entry sealed under the cluster key
    ClipboardSync { sender_id: String, sealed: EncryptedPayload },

    /// Delete a history entry on every member
    HistoryDelete { sender_id: String, sealed: EncryptedPayload },

    /// Ask for a chunk of an offered file
    FileRequest { sender_id: String, sealed: EncryptedPayload },

    /// A chunk of file data
    FileChunk { sealed: EncryptedPayload },

    /// Sealed destruct claim: the receiver must leave the cluster
    Destruct { sender_id: String, sealed: EncryptedPayload },

    /// Generic acknowledgement
    Ack,

    /// Request refused
    Error { reason: String },
}

impl Message {
    /// Serialize message to bytes using JSON
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes (JSON)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::PairRequest(_) => "pair_request",
            Message::PairResponse(_) => "pair_response",
            Message::PairConfirm { .. } => "pair_confirm",
            Message::Welcome { .. } => "welcome",
            Message::PairReject { .. } => "pair_reject",
            Message::ClipboardSync { .. } => "clipboard_sync",
            Message::HistoryDelete { .. } => "history_delete",
            Message::FileRequest { .. } => "file_request",
            Message::FileChunk { .. } => "file_chunk",
            Message::Destruct { .. } => "destruct",
            Message::Ack => "ack",
            Message::Error { .. } => "error",
        }
    }
}

/// Presence announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub device_id: String,
    pub hostname: String,
    /// Port the sender accepts connections on
    pub port: u16,
    pub network_name: String,
    pub protocol_version: u16,
    /// Presence claim sealed under the sender's cluster key
    pub proof: Option<EncryptedPayload>,
}

/// Pairing request (step 1 of pairing handshake)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequestMessage {
    pub device_id: String,
    pub hostname: String,
    pub port: u16,
    #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
    pub pake: Vec<u8>,
}

/// Pairing response (step 2 of pairing handshake)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairResponseMessage {
    pub device_id: String,
    pub hostname: String,
    #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
    pub pake: Vec<u8>,
}

/// Sealed body of `HistoryDelete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDeleteBody {
    pub entry_id: Uuid,
}

/// Sealed body of `FileRequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequestBody {
    pub entry_id: Uuid,
    pub file_index: usize,
    pub offset: u64,
    pub max_len: u64,
}

/// Sealed body of `FileChunk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkBody {
    pub offset: u64,
    pub total_size: u64,
    #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
    pub data: Vec<u8>,
    pub eof: bool,
}

/// SHA256 of file or clipboard content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(#[serde(with = "crate::crypto::serde_utils::base64_array")] pub [u8; 32]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        ContentHash(Sha256::digest(data).into())
    }

    pub fn from_hasher(hasher: Sha256) -> Self {
        ContentHash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ClusterKey;

    #[test]
    fn test_message_is_tagged_json() {
        let msg = Message::Hello(HelloMessage {
            device_id: "abc".to_string(),
            hostname: "desk".to_string(),
            port: 4654,
            network_name: "alpha".to_string(),
            protocol_version: 1,
            proof: None,
        });

        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["network_name"], "alpha");

        match Message::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            Message::Hello(h) => assert_eq!(h.hostname, "desk"),
            other => panic!("wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_sealed_message_roundtrip() {
        let key = ClusterKey::generate();
        let body = HistoryDeleteBody { entry_id: Uuid::new_v4() };
        let msg = Message::HistoryDelete {
            sender_id: "abc".to_string(),
            sealed: key.seal_json(&body).unwrap(),
        };

        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        let Message::HistoryDelete { sealed, .. } = decoded else {
            panic!("wrong message type");
        };
        let opened: HistoryDeleteBody = key.open_json(&sealed).unwrap();
        assert_eq!(opened.entry_id, body.entry_id);
    }

    #[test]
    fn test_hello_with_proof_compares_by_value() {
        let key = ClusterKey::generate();
        let hello = HelloMessage {
            device_id: "abc".to_string(),
            hostname: "desk".to_string(),
            port: 4654,
            network_name: "alpha".to_string(),
            protocol_version: 1,
            proof: Some(key.encrypt(b"presence").unwrap()),
        };

        let decoded = match Message::from_bytes(&Message::Hello(hello.clone()).to_bytes().unwrap()).unwrap() {
            Message::Hello(h) => h,
            other => panic!("wrong message type: {}", other.kind()),
        };
        assert_eq!(decoded, hello);

        let resealed = HelloMessage {
            proof: Some(key.encrypt(b"presence").unwrap()),
            ..hello.clone()
        };
        assert_ne!(resealed, hello);
    }

    #[test]
    fn test_unit_variant_roundtrip() {
        let bytes = Message::Ack.to_bytes().unwrap();
        assert_eq!(bytes, br#"{"type":"ack"}"#);
        assert!(matches!(Message::from_bytes(&bytes).unwrap(), Message::Ack));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(ContentHash::of(b"hello"), ContentHash::of(b"hello"));
        assert_ne!(ContentHash::of(b"hello"), ContentHash::of(b"world"));
    }
}
