use crate::{FileMetadata, Result, VersionedMap};
use std::sync::Arc;

const MAX_LIST_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct ListFilesOperation {
    files: Arc<dyn VersionedMap<FileMetadata>>,
}

#[derive(Debug, Clone)]
pub struct ListFilesOperationRequest {
    /// Exclusive lower bound; the `next_cursor` of the previous page.
    pub cursor: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct ListFileItem {
    pub key: String,
    pub version: u64,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone)]
pub struct ListFilesOperationResult {
    pub items: Vec<ListFileItem>,
    pub next_cursor: Option<String>,
}

impl ListFilesOperation {
    pub fn new(files: Arc<dyn VersionedMap<FileMetadata>>) -> Self {
        Self { files }
    }

    pub async fn run(&self, request: ListFilesOperationRequest) -> Result<ListFilesOperationResult> {
        let limit = request.limit.clamp(1, MAX_LIST_LIMIT);
        let page = self
            .files
            .scan_from(request.cursor.as_deref(), limit)
            .await?;

        let next_cursor = if page.len() == limit {
            page.last().map(|(key, _)| key.clone())
        } else {
            None
        };

        let items = page
            .into_iter()
            .map(|(key, versioned)| ListFileItem {
                key,
                version: versioned.version,
                metadata: versioned.value,
            })
            .collect();

        Ok(ListFilesOperationResult { items, next_cursor })
    }
}
