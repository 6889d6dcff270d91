//! Wiring of one node's replication services.

use crate::operations::{
    DeleteFilesOperation, DrainFileOperation, ListFilesOperation, PutFileOperation,
    ReadFileOperation, ReplicateFileOperation, ResyncNodeOperation,
};
use crate::replication::KeyLocks;
use crate::settings::{ReplicationSettings, WatchdogSettings};
use crate::{
    BlobStore, ChangeDispatcher, FileMetadata, Membership, PeerTransport, QuorumCoordinator,
    Result, ServerMetadata, StowError, VersionedMap, Watchdog,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct StoreEngineConfig {
    pub local_node_id: String,
    pub membership: Arc<Membership>,
    pub files: Arc<dyn VersionedMap<FileMetadata>>,
    pub servers: Arc<dyn VersionedMap<ServerMetadata>>,
    pub blob_store: Arc<BlobStore>,
    pub peers: Arc<dyn PeerTransport>,
    pub replication: ReplicationSettings,
    pub watchdog: WatchdogSettings,
    pub meta_root: PathBuf,
}

#[derive(Clone)]
pub struct StoreEngine {
    local_node_id: String,
    membership: Arc<Membership>,
    replication: ReplicationSettings,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    servers: Arc<dyn VersionedMap<ServerMetadata>>,
    blob_store: Arc<BlobStore>,
    quorum: Arc<QuorumCoordinator>,
    pub put_file_operation: Arc<PutFileOperation>,
    pub read_file_operation: Arc<ReadFileOperation>,
    pub delete_files_operation: Arc<DeleteFilesOperation>,
    pub list_files_operation: Arc<ListFilesOperation>,
    pub replicate_file_operation: Arc<ReplicateFileOperation>,
    pub drain_file_operation: Arc<DrainFileOperation>,
    pub resync_node_operation: Arc<ResyncNodeOperation>,
    dispatcher: Arc<ChangeDispatcher>,
    watchdog: Arc<Watchdog>,
}

/// Background tasks of a started engine.
pub struct EngineTasks {
    pub dispatcher: JoinHandle<()>,
    pub watchdog: JoinHandle<()>,
}

impl EngineTasks {
    pub fn abort(&self) {
        self.dispatcher.abort();
        self.watchdog.abort();
    }
}

impl StoreEngine {
    pub fn new(config: StoreEngineConfig) -> Result<Self> {
        let StoreEngineConfig {
            local_node_id,
            membership,
            files,
            servers,
            blob_store,
            peers,
            replication,
            watchdog,
            meta_root,
        } = config;

        if !membership.contains(&local_node_id) {
            return Err(StowError::Config(format!(
                "current node {} is not a member of group {}",
                local_node_id,
                membership.group()
            )));
        }
        if replication.partition_count == 0 {
            return Err(StowError::Config(
                "partition_count must be positive".to_string(),
            ));
        }

        let quorum = Arc::new(QuorumCoordinator::new(
            replication.wait_cache_ttl,
            replication.wait_cache_capacity,
        ));

        let put_file_operation = Arc::new(PutFileOperation::new(
            local_node_id.clone(),
            membership.clone(),
            files.clone(),
            blob_store.clone(),
            quorum.clone(),
            replication.partition_count,
            replication.quorum_max_wait,
        ));
        let read_file_operation = Arc::new(ReadFileOperation::new(
            local_node_id.clone(),
            files.clone(),
            blob_store.clone(),
            peers.clone(),
        ));
        // Replicate and drain of one key never overlap on this node.
        let key_locks = Arc::new(KeyLocks::new());
        let drain_file_operation = Arc::new(DrainFileOperation::new(
            local_node_id.clone(),
            membership.clone(),
            files.clone(),
            blob_store.clone(),
            key_locks.clone(),
            replication.cas_max_attempts,
        ));
        let delete_files_operation =
            Arc::new(DeleteFilesOperation::new(drain_file_operation.clone()));
        let list_files_operation = Arc::new(ListFilesOperation::new(files.clone()));
        let replicate_file_operation = Arc::new(ReplicateFileOperation::new(
            local_node_id.clone(),
            files.clone(),
            blob_store.clone(),
            peers,
            key_locks,
            replication.cas_max_attempts,
        ));
        let resync_node_operation = Arc::new(ResyncNodeOperation::new(
            membership.clone(),
            files.clone(),
            replication.cas_max_attempts,
            watchdog.page_size,
        ));

        let dispatcher = Arc::new(ChangeDispatcher::new(
            local_node_id.clone(),
            quorum.clone(),
            replicate_file_operation.clone(),
            drain_file_operation.clone(),
        ));
        let watchdog = Arc::new(Watchdog::new(
            local_node_id.clone(),
            membership.clone(),
            files.clone(),
            servers.clone(),
            blob_store.clone(),
            resync_node_operation.clone(),
            watchdog,
            replication.cas_max_attempts,
            meta_root,
        ));

        Ok(Self {
            local_node_id,
            membership,
            replication,
            files,
            servers,
            blob_store,
            quorum,
            put_file_operation,
            read_file_operation,
            delete_files_operation,
            list_files_operation,
            replicate_file_operation,
            drain_file_operation,
            resync_node_operation,
            dispatcher,
            watchdog,
        })
    }

    /// Subscribe to the file map and spawn the dispatcher and the watchdog.
    pub async fn start(&self) -> Result<EngineTasks> {
        let dispatcher = self.start_dispatcher().await?;
        let watchdog = tokio::spawn(self.watchdog.clone().run());
        tracing::info!(
            "Replication engine started: node={} group={} members={}",
            self.local_node_id,
            self.membership.group(),
            self.membership.len()
        );
        Ok(EngineTasks {
            dispatcher,
            watchdog,
        })
    }

    pub async fn start_dispatcher(&self) -> Result<JoinHandle<()>> {
        let events = self.files.subscribe().await?;
        Ok(tokio::spawn(self.dispatcher.clone().run(events)))
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn replication(&self) -> &ReplicationSettings {
        &self.replication
    }

    pub fn files(&self) -> &Arc<dyn VersionedMap<FileMetadata>> {
        &self.files
    }

    pub fn servers(&self) -> &Arc<dyn VersionedMap<ServerMetadata>> {
        &self.servers
    }

    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blob_store
    }

    pub fn quorum(&self) -> &Arc<QuorumCoordinator> {
        &self.quorum
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }
}
