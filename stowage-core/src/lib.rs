//! Stowage Core - replication engine for a small replicated blob store.
//!
//! Each node keeps whole-file replicas on local disk. Cluster coordination
//! happens through a shared versioned metadata map: nodes react to change
//! events on that map, pull missing replicas from holders and record
//! themselves with compare-and-swap updates.

pub mod cluster;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod node;
pub mod operations;
pub mod quorum;
pub mod replication;
pub mod settings;
pub mod storage;
pub mod watchdog;

#[cfg(test)]
mod tests;

pub use cluster::{HttpPeerClient, INTERNAL_BLOB_URI, PeerTransport};
pub use dispatcher::ChangeDispatcher;
pub use engine::{EngineTasks, StoreEngine, StoreEngineConfig};
pub use error::{Result, StowError};
pub use metadata::{
    ABSENT_CHECKSUM, CasOutcome, CasStep, ChangeEvent, ChangeKind, EtcdMetaMap, FileKey,
    FileMetadata, MapValue, MemMetaMap, ServerMetadata, Versioned, VersionedMap, cas_retry,
    normalize_name, partition_for_name,
};
pub use node::{Membership, NodeInfo};
pub use operations::*;
pub use quorum::{QuorumCoordinator, QuorumWait};
pub use replication::{Intent, KeyGuard, KeyLocks, ReplicaState};
pub use settings::{ReplicationSettings, WatchdogSettings};
pub use storage::{BlobStore, Replacement, compute_checksum};
pub use watchdog::{SweepReport, Watchdog};
