//! TCP transport between members

pub mod connection;
pub mod framing;
pub mod outbox;
pub mod server;

pub use connection::PeerConnection;
pub use framing::{read_framed_message, read_message, write_framed_message, write_message};
pub use outbox::Outbox;
pub use server::{SyncServer, SyncServerHandle};
