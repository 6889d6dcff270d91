use super::drain_file::{DrainFileOperation, DrainFileOperationOutcome, DrainFileOperationRequest};
use crate::{FileKey, Result};
use std::sync::Arc;

/// Batch soft delete. The local node drains first; peers follow through
/// their change events.
#[derive(Clone)]
pub struct DeleteFilesOperation {
    drain: Arc<DrainFileOperation>,
}

#[derive(Debug, Clone)]
pub struct DeleteFilesOperationRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteFilesOperationResult {
    pub deleted: Vec<String>,
    pub not_found: Vec<String>,
    /// Keys whose removal marker could not be recorded.
    pub anomalous: Vec<String>,
}

impl DeleteFilesOperation {
    pub fn new(drain: Arc<DrainFileOperation>) -> Self {
        Self { drain }
    }

    pub async fn run(&self, request: DeleteFilesOperationRequest) -> Result<DeleteFilesOperationResult> {
        let mut result = DeleteFilesOperationResult::default();

        for key in request.keys {
            let canonical = match FileKey::parse(&key) {
                Ok(file_key) => file_key.to_string(),
                Err(_) => {
                    result.not_found.push(key);
                    continue;
                }
            };

            let outcome = self
                .drain
                .run(DrainFileOperationRequest {
                    key: canonical.clone(),
                    initiate: true,
                })
                .await;

            match outcome {
                Ok(DrainFileOperationOutcome::Absent) => result.not_found.push(key),
                Ok(_) => result.deleted.push(key),
                Err(error) => {
                    tracing::warn!("Delete failed: key={} error={}", canonical, error);
                    result.anomalous.push(key);
                }
            }
        }

        Ok(result)
    }
}
