use crate::error::{Result, StowError};
use crate::metadata::FileKey;
use crate::node::Membership;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;

pub const INTERNAL_BLOB_URI: &str = "/internal/v1/blobs";

/// Node-to-node blob transfer used to pull replicas.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Raw bytes of `key` as stored on `node_id`. Any error means the source
    /// is unavailable.
    async fn fetch_blob(&self, node_id: &str, key: &FileKey) -> Result<Bytes>;
}

#[derive(Clone)]
pub struct HttpPeerClient {
    client: Client,
    membership: Arc<Membership>,
}

impl HttpPeerClient {
    pub fn new(membership: Arc<Membership>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| StowError::Http(error.to_string()))?;

        Ok(Self { client, membership })
    }

    fn blob_url(&self, node_id: &str, key: &FileKey) -> Result<Url> {
        let node = self.membership.resolve(node_id)?;
        let mut url = Url::parse(&format!("http://{}{}", node.address, INTERNAL_BLOB_URI))
            .map_err(|error| StowError::Http(error.to_string()))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("key", &key.to_string());
        }

        Ok(url)
    }
}

#[async_trait]
impl PeerTransport for HttpPeerClient {
    async fn fetch_blob(&self, node_id: &str, key: &FileKey) -> Result<Bytes> {
        let url = self.blob_url(node_id, key)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| StowError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(StowError::Http(format!(
                "blob fetch failed: node={} status={} key={}",
                node_id,
                response.status(),
                key
            )));
        }

        response
            .bytes()
            .await
            .map_err(|error| StowError::Http(error.to_string()))
    }
}
