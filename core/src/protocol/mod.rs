//! Core-to-core wire contract

pub mod constants;
mod invite;
mod messages;

pub use invite::JoinInvite;
pub use messages::{
    ContentHash, FileChunkBody, FileRequestBody, HelloMessage, HistoryDeleteBody, Message,
    PairRequestMessage, PairResponseMessage,
};
