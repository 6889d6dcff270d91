use crate::{CasOutcome, CasStep, FileMetadata, Membership, Result, StowError, VersionedMap, cas_retry};
use std::sync::Arc;

/// Forces a node to re-fetch its replicas by removing it from `addNodes`.
/// The resulting change events make that node replicate again.
#[derive(Clone)]
pub struct ResyncNodeOperation {
    membership: Arc<Membership>,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    cas_max_attempts: usize,
    page_size: usize,
}

#[derive(Debug, Clone)]
pub struct ResyncNodeOperationRequest {
    pub node_id: String,
    /// Limit the resync to one entry; otherwise every entry is visited.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncNodeOperationResult {
    pub resynced: Vec<String>,
    /// The node is the only holder; dropping it would orphan the file.
    pub skipped: Vec<String>,
    pub anomalous: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropHolderOutcome {
    Dropped,
    SoleHolder,
    NotHolder,
}

impl ResyncNodeOperation {
    pub fn new(
        membership: Arc<Membership>,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        cas_max_attempts: usize,
        page_size: usize,
    ) -> Self {
        Self {
            membership,
            files,
            cas_max_attempts,
            page_size: page_size.max(1),
        }
    }

    pub async fn run(&self, request: ResyncNodeOperationRequest) -> Result<ResyncNodeOperationResult> {
        let ResyncNodeOperationRequest { node_id, key } = request;
        if !self.membership.contains(&node_id) {
            return Err(StowError::InvalidRequest(format!(
                "unknown node: {}",
                node_id
            )));
        }

        let mut result = ResyncNodeOperationResult::default();

        if let Some(key) = key {
            self.resync_key(&node_id, key, &mut result).await;
            return Ok(result);
        }

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .files
                .scan_from(cursor.as_deref(), self.page_size)
                .await?;
            let exhausted = page.len() < self.page_size;
            cursor = page.last().map(|(key, _)| key.clone());

            for (key, versioned) in page {
                if versioned.value.is_holder(&node_id) {
                    self.resync_key(&node_id, key, &mut result).await;
                }
            }

            if exhausted || cursor.is_none() {
                break;
            }
        }

        tracing::info!(
            "Resync of {} finished: resynced={} skipped={} anomalous={}",
            node_id,
            result.resynced.len(),
            result.skipped.len(),
            result.anomalous.len()
        );

        Ok(result)
    }

    async fn resync_key(&self, node_id: &str, key: String, result: &mut ResyncNodeOperationResult) {
        match self.drop_holder(&key, node_id).await {
            Ok(DropHolderOutcome::Dropped) => result.resynced.push(key),
            Ok(DropHolderOutcome::SoleHolder) => result.skipped.push(key),
            Ok(DropHolderOutcome::NotHolder) => {}
            Err(error) => {
                tracing::warn!(
                    "Resync failed: node={} key={} error={}",
                    node_id,
                    key,
                    error
                );
                result.anomalous.push(key);
            }
        }
    }

    /// Remove `node_id` from the holders of `key` unless it is the last one.
    pub async fn drop_holder(&self, key: &str, node_id: &str) -> Result<DropHolderOutcome> {
        let outcome = cas_retry(
            self.files.as_ref(),
            key,
            self.cas_max_attempts,
            |current: &FileMetadata| {
                if current.add_nodes.len() <= 1 {
                    return CasStep::Skip;
                }
                match current.without_holder(node_id) {
                    Some(next) => CasStep::Write(next),
                    None => CasStep::Skip,
                }
            },
        )
        .await?;

        Ok(match outcome {
            CasOutcome::Written(_) => DropHolderOutcome::Dropped,
            CasOutcome::Skipped(current) if current.is_holder(node_id) => {
                DropHolderOutcome::SoleHolder
            }
            CasOutcome::Skipped(_) | CasOutcome::Absent | CasOutcome::Removed => {
                DropHolderOutcome::NotHolder
            }
        })
    }
}
