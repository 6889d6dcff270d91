use crate::replication::{Intent, KeyLocks, intent};
use crate::{
    BlobStore, CasOutcome, CasStep, FileMetadata, PeerTransport, Result, StowError, VersionedMap,
    cas_retry, compute_checksum,
};
use std::sync::Arc;

/// Pulls a missing replica from a holder and joins `addNodes`.
#[derive(Clone)]
pub struct ReplicateFileOperation {
    local_node_id: String,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    blob_store: Arc<BlobStore>,
    peers: Arc<dyn PeerTransport>,
    key_locks: Arc<KeyLocks>,
    cas_max_attempts: usize,
}

#[derive(Debug, Clone)]
pub struct ReplicateFileOperationRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicateFileOperationOutcome {
    Replicated { source: String, holders: Vec<String> },
    /// Already held, draining, gone, or replaced while copying.
    NotNeeded,
    /// Another replication of the same key is writing right now.
    InProgress,
    /// No holder produced bytes matching the checksum. The map is untouched.
    NoVerifiedSource { tried: usize },
}

impl ReplicateFileOperation {
    pub fn new(
        local_node_id: String,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        blob_store: Arc<BlobStore>,
        peers: Arc<dyn PeerTransport>,
        key_locks: Arc<KeyLocks>,
        cas_max_attempts: usize,
    ) -> Self {
        Self {
            local_node_id,
            files,
            blob_store,
            peers,
            key_locks,
            cas_max_attempts,
        }
    }

    pub async fn run(
        &self,
        request: ReplicateFileOperationRequest,
    ) -> Result<ReplicateFileOperationOutcome> {
        let ReplicateFileOperationRequest { key } = request;
        let _guard = self.key_locks.lock(&key).await;

        let Some(current) = self.files.get(&key).await? else {
            return Ok(ReplicateFileOperationOutcome::NotNeeded);
        };
        let entry = current.value;
        if intent(Some(&entry), &self.local_node_id) != Intent::Replicate {
            return Ok(ReplicateFileOperationOutcome::NotNeeded);
        }

        let file_key = entry.file_key();
        let mut tried = 0usize;

        for source in entry
            .add_nodes
            .iter()
            .filter(|node| node.as_str() != self.local_node_id)
        {
            tried += 1;

            let bytes = match self.peers.fetch_blob(source, &file_key).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(
                        "Replica source unavailable: key={} source={} error={}",
                        key,
                        source,
                        error
                    );
                    continue;
                }
            };

            let checksum = compute_checksum(&bytes);
            if checksum != entry.check_sum {
                tracing::warn!(
                    "Replica checksum mismatch: key={} source={} expected={} actual={}",
                    key,
                    source,
                    entry.check_sum,
                    checksum
                );
                continue;
            }

            let staged = match self.blob_store.replace(&file_key, bytes.as_ref()).await {
                Ok(staged) => staged,
                Err(StowError::InUse(_)) => return Ok(ReplicateFileOperationOutcome::InProgress),
                Err(error) => return Err(error),
            };

            let local = self.local_node_id.as_str();
            let outcome = cas_retry(
                self.files.as_ref(),
                &key,
                self.cas_max_attempts,
                |current: &FileMetadata| {
                    if !current.same_upload(&entry) || current.is_draining() {
                        return CasStep::Skip;
                    }
                    match current.with_holder(local) {
                        Some(next) => CasStep::Write(next),
                        None => CasStep::Skip,
                    }
                },
            )
            .await;

            return match outcome {
                Ok(CasOutcome::Written(next)) => {
                    staged.commit().await?;
                    tracing::info!(
                        "Replicated {} from {}: holders={:?}",
                        key,
                        source,
                        next.add_nodes
                    );
                    Ok(ReplicateFileOperationOutcome::Replicated {
                        source: source.clone(),
                        holders: next.add_nodes,
                    })
                }
                Ok(_) => {
                    // Replaced or deleted while copying.
                    staged.rollback().await?;
                    Ok(ReplicateFileOperationOutcome::NotNeeded)
                }
                Err(error) => {
                    if let Err(cleanup) = staged.rollback().await {
                        tracing::warn!(
                            "Failed to restore replica: key={} error={}",
                            key,
                            cleanup
                        );
                    }
                    Err(error)
                }
            };
        }

        Ok(ReplicateFileOperationOutcome::NoVerifiedSource { tried })
    }
}
