use crate::{
    BlobStore, FileKey, FileMetadata, PeerTransport, Result, VersionedMap, compute_checksum,
};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReadFileOperation {
    local_node_id: String,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    blob_store: Arc<BlobStore>,
    peers: Arc<dyn PeerTransport>,
}

#[derive(Debug, Clone)]
pub struct ReadFileOperationRequest {
    pub key: String,
}

#[derive(Debug)]
pub enum ReadFileOperationOutcome {
    Local {
        metadata: FileMetadata,
        file: tokio::fs::File,
    },
    /// Served from a holder because the local copy is missing.
    Remote {
        metadata: FileMetadata,
        source: String,
        body: Bytes,
    },
    NotFound,
}

impl ReadFileOperation {
    pub fn new(
        local_node_id: String,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        blob_store: Arc<BlobStore>,
        peers: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            local_node_id,
            files,
            blob_store,
            peers,
        }
    }

    pub async fn run(&self, request: ReadFileOperationRequest) -> Result<ReadFileOperationOutcome> {
        let file_key = FileKey::parse(&request.key)?;
        let key = file_key.to_string();

        let Some(current) = self.files.get(&key).await? else {
            return Ok(ReadFileOperationOutcome::NotFound);
        };
        let metadata = current.value;
        if metadata.is_draining() {
            return Ok(ReadFileOperationOutcome::NotFound);
        }

        if metadata.is_holder(&self.local_node_id)
            && let Some(file) = self.blob_store.read(&file_key).await?
        {
            return Ok(ReadFileOperationOutcome::Local { metadata, file });
        }

        for source in metadata
            .add_nodes
            .iter()
            .filter(|node| node.as_str() != self.local_node_id)
        {
            let body = match self.peers.fetch_blob(source, &file_key).await {
                Ok(body) => body,
                Err(error) => {
                    tracing::warn!(
                        "Remote read failed: key={} source={} error={}",
                        key,
                        source,
                        error
                    );
                    continue;
                }
            };

            let actual = compute_checksum(&body);
            if actual != metadata.check_sum {
                tracing::warn!(
                    "Remote copy checksum mismatch: key={} source={} expected={} actual={}",
                    key,
                    source,
                    metadata.check_sum,
                    actual
                );
                continue;
            }

            return Ok(ReadFileOperationOutcome::Remote {
                source: source.clone(),
                metadata,
                body,
            });
        }

        Ok(ReadFileOperationOutcome::NotFound)
    }
}
