use serde::{Deserialize, Serialize};
use stowage_core::{FileMetadata, ServerMetadata};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: String,
    pub(crate) node_id: String,
    pub(crate) group: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PutFileQuery {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) quorum: Option<usize>,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PutFileResponse {
    pub(crate) key: String,
    pub(crate) partition: u32,
    pub(crate) size: u64,
    pub(crate) check_sum: u32,
    pub(crate) quorum: usize,
    pub(crate) status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileKeyQuery {
    pub(crate) key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteFilesBody {
    pub(crate) keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteFilesResponse {
    pub(crate) deleted: Vec<String>,
    pub(crate) not_found: Vec<String>,
    pub(crate) anomalous: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    pub(crate) cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub(crate) limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub(crate) struct ListResponse {
    pub(crate) items: Vec<ListItem>,
    pub(crate) next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ListItem {
    pub(crate) key: String,
    pub(crate) version: u64,
    pub(crate) metadata: FileMetadata,
}

#[derive(Debug, Serialize)]
pub(crate) struct ServersResponse {
    pub(crate) servers: Vec<ServerMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResyncBody {
    pub(crate) node_id: String,
    #[serde(default)]
    pub(crate) key: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResyncResponse {
    pub(crate) node_id: String,
    pub(crate) resynced: Vec<String>,
    pub(crate) skipped: Vec<String>,
    pub(crate) anomalous: Vec<String>,
}
