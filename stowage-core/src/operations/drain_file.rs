use crate::replication::KeyLocks;
use crate::{
    BlobStore, CasOutcome, CasStep, FileMetadata, Membership, Result, VersionedMap, cas_retry,
};
use std::sync::Arc;

/// Deletes the local replica and records it in `removeNodes`. The node that
/// completes the set removes the entry.
#[derive(Clone)]
pub struct DrainFileOperation {
    local_node_id: String,
    membership: Arc<Membership>,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    blob_store: Arc<BlobStore>,
    key_locks: Arc<KeyLocks>,
    cas_max_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct DrainFileOperationRequest {
    pub key: String,
    /// Start draining an entry that has no removal marker yet.
    pub initiate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainFileOperationOutcome {
    Marked { removed_by: usize },
    /// Every member has drained; the entry was removed from the map.
    Collected,
    NotNeeded,
    Absent,
}

impl DrainFileOperation {
    pub fn new(
        local_node_id: String,
        membership: Arc<Membership>,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        blob_store: Arc<BlobStore>,
        key_locks: Arc<KeyLocks>,
        cas_max_attempts: usize,
    ) -> Self {
        Self {
            local_node_id,
            membership,
            files,
            blob_store,
            key_locks,
            cas_max_attempts,
        }
    }

    pub async fn run(&self, request: DrainFileOperationRequest) -> Result<DrainFileOperationOutcome> {
        let DrainFileOperationRequest { key, initiate } = request;
        let local = self.local_node_id.as_str();
        let _guard = self.key_locks.lock(&key).await;

        let Some(current) = self.files.get(&key).await? else {
            return Ok(DrainFileOperationOutcome::Absent);
        };
        let entry = current.value;
        if entry.is_removed_by(local) || (!initiate && !entry.is_draining()) {
            return Ok(DrainFileOperationOutcome::NotNeeded);
        }

        let removed_local = self.blob_store.delete(&entry.file_key()).await?;

        let membership = self.membership.as_ref();
        let outcome = cas_retry(
            self.files.as_ref(),
            &key,
            self.cas_max_attempts,
            |current: &FileMetadata| {
                if !initiate && !current.is_draining() {
                    return CasStep::Skip;
                }
                match current.with_removal(local) {
                    Some(next) if membership.covered_by(&next.remove_nodes) => CasStep::Remove,
                    Some(next) => CasStep::Write(next),
                    None => CasStep::Skip,
                }
            },
        )
        .await?;

        let outcome = match outcome {
            CasOutcome::Written(next) => DrainFileOperationOutcome::Marked {
                removed_by: next.remove_nodes.len(),
            },
            CasOutcome::Removed => DrainFileOperationOutcome::Collected,
            CasOutcome::Skipped(_) => DrainFileOperationOutcome::NotNeeded,
            CasOutcome::Absent => DrainFileOperationOutcome::Absent,
        };

        tracing::info!(
            "Drained {} on {}: local_copy_removed={} outcome={:?}",
            key,
            local,
            removed_local,
            outcome
        );

        Ok(outcome)
    }
}
