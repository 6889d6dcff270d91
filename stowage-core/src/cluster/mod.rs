pub mod client;

pub use client::{HttpPeerClient, INTERNAL_BLOB_URI, PeerTransport};
