//! Local filesystem storage for replica bytes.

pub mod blob_store;

pub use blob_store::{BlobStore, Replacement, compute_checksum};
