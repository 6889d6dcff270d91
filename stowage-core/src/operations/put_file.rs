use crate::{
    BlobStore, FileKey, FileMetadata, Membership, QuorumCoordinator, Result, VersionedMap,
    normalize_name, partition_for_name,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct PutFileOperation {
    local_node_id: String,
    membership: Arc<Membership>,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    blob_store: Arc<BlobStore>,
    quorum: Arc<QuorumCoordinator>,
    partition_count: u32,
    quorum_max_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct PutFileOperationRequest {
    pub name: String,
    pub body: Bytes,
    pub quorum: usize,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct PutFileOperationResult {
    pub key: String,
    pub partition: u32,
    pub size: u64,
    pub check_sum: u32,
    pub quorum: usize,
}

#[derive(Debug, Clone)]
pub enum PutFileOperationOutcome {
    /// Enough holders joined within the wait.
    Replicated(PutFileOperationResult),
    /// Stored and published, but the quorum wait ran out. Replication
    /// continues in the background.
    Accepted(PutFileOperationResult),
    /// The key is being deleted.
    Conflict,
}

impl PutFileOperation {
    pub fn new(
        local_node_id: String,
        membership: Arc<Membership>,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        blob_store: Arc<BlobStore>,
        quorum: Arc<QuorumCoordinator>,
        partition_count: u32,
        quorum_max_wait: Duration,
    ) -> Self {
        Self {
            local_node_id,
            membership,
            files,
            blob_store,
            quorum,
            partition_count,
            quorum_max_wait,
        }
    }

    pub async fn run(&self, request: PutFileOperationRequest) -> Result<PutFileOperationOutcome> {
        let PutFileOperationRequest {
            name,
            body,
            quorum,
            timeout,
        } = request;

        let name = normalize_name(&name)?;
        let partition = partition_for_name(&name, self.partition_count);
        let file_key = FileKey::new(self.membership.group(), partition, &name)?;
        let key = file_key.to_string();

        if let Some(existing) = self.files.get(&key).await?
            && existing.value.is_draining()
        {
            tracing::warn!("Rejecting upload of {}: deletion in progress", key);
            return Ok(PutFileOperationOutcome::Conflict);
        }

        let staged = self.blob_store.replace(&file_key, body.as_ref()).await?;
        let check_sum = staged.checksum();
        let entry = FileMetadata::created_by(
            &file_key,
            body.len() as u64,
            check_sum,
            &self.local_node_id,
        );

        let quorum = self.membership.write_quorum(quorum);
        // Registered before the insert so no holder event can be missed.
        let wait = self.quorum.begin_wait(&entry, quorum);

        if let Err(error) = self.files.put(&key, &entry).await {
            self.quorum.abandon(wait);
            // The previous upload, if any, is still the published one.
            if let Err(cleanup) = staged.rollback().await {
                tracing::warn!(
                    "Failed to restore replica after unpublished upload: key={} error={}",
                    key,
                    cleanup
                );
            }
            return Err(error);
        }
        if let Err(error) = staged.commit().await {
            tracing::warn!("Failed to discard replaced replica: key={} error={}", key, error);
        }

        let timeout = timeout
            .unwrap_or(self.quorum_max_wait)
            .min(self.quorum_max_wait);
        let reached = self.quorum.await_quorum(wait, timeout).await;

        let result = PutFileOperationResult {
            key,
            partition,
            size: entry.size,
            check_sum,
            quorum,
        };

        if reached {
            tracing::info!("Stored {} with quorum {}", result.key, quorum);
            Ok(PutFileOperationOutcome::Replicated(result))
        } else {
            tracing::warn!(
                "Quorum wait expired: key={} quorum={} timeout_ms={}",
                result.key,
                quorum,
                timeout.as_millis()
            );
            Ok(PutFileOperationOutcome::Accepted(result))
        }
    }
}
