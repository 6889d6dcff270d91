use super::map::{ChangeEvent, ChangeKind, MapValue, Versioned, VersionedMap};
use crate::error::{Result, StowError};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, KeyValue, Txn, TxnOp, WatchOptions,
};
use std::marker::PhantomData;
use tokio::sync::mpsc;

/// [`VersionedMap`] stored under one etcd key prefix.
///
/// The entry version is etcd's `mod_revision`, so compare-and-swap is a
/// transaction guarded on it and change events come from a prefix watch.
pub struct EtcdMetaMap<V> {
    client: Client,
    prefix: String,
    _value: PhantomData<fn() -> V>,
}

impl<V: MapValue> EtcdMetaMap<V> {
    pub async fn connect(endpoints: &[String], prefix: &str) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(StowError::Config(
                "etcd endpoints cannot be empty".to_string(),
            ));
        }

        let client = Client::connect(endpoints, None).await?;
        Ok(Self::with_client(client, prefix))
    }

    pub fn with_client(client: Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.trim_end_matches('/').to_string(),
            _value: PhantomData,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    fn key_root(&self) -> String {
        format!("{}/", self.prefix)
    }

    fn strip_key(&self, kv: &KeyValue) -> Result<String> {
        let full = kv
            .key_str()
            .map_err(|error| StowError::Etcd(error.to_string()))?;
        full.strip_prefix(&self.key_root())
            .map(str::to_string)
            .ok_or_else(|| StowError::Internal(format!("key outside map prefix: {}", full)))
    }
}

fn decode<V: MapValue>(kv: &KeyValue) -> Result<Versioned<V>> {
    Ok(Versioned {
        value: serde_json::from_slice(kv.value())?,
        version: kv.mod_revision() as u64,
    })
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

#[async_trait]
impl<V: MapValue> VersionedMap<V> for EtcdMetaMap<V> {
    async fn get(&self, key: &str) -> Result<Option<Versioned<V>>> {
        let mut client = self.client.clone();
        let resp = client.get(self.full_key(key), None).await?;

        match resp.kvs().first() {
            Some(kv) => Ok(Some(decode(kv)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &V) -> Result<u64> {
        let payload = serde_json::to_vec(value)?;
        let mut client = self.client.clone();
        let resp = client.put(self.full_key(key), payload, None).await?;

        let revision = resp
            .header()
            .map(|header| header.revision())
            .ok_or_else(|| StowError::Etcd("put response without header".to_string()))?;
        Ok(revision as u64)
    }

    async fn cas_replace(&self, key: &str, expected_version: u64, value: &V) -> Result<bool> {
        let full_key = self.full_key(key);
        let payload = serde_json::to_vec(value)?;

        let txn = Txn::new()
            .when(vec![Compare::mod_revision(
                full_key.clone(),
                CompareOp::Equal,
                expected_version as i64,
            )])
            .and_then(vec![TxnOp::put(full_key, payload, None)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let resp = client.delete(self.full_key(key), None).await?;
        Ok(resp.deleted() > 0)
    }

    async fn scan_from(
        &self,
        start_after: Option<&str>,
        count: usize,
    ) -> Result<Vec<(String, Versioned<V>)>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let start = match start_after {
            Some(key) => format!("{}\0", self.full_key(key)),
            None => self.key_root(),
        };
        let options = GetOptions::new()
            .with_range(prefix_range_end(&self.key_root()))
            .with_limit(count as i64);

        let mut client = self.client.clone();
        let resp = client.get(start, Some(options)).await?;

        let mut entries = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = self.strip_key(kv)?;
            match decode(kv) {
                Ok(value) => entries.push((key, value)),
                Err(error) => {
                    tracing::warn!("Skipping undecodable entry: key={} error={}", key, error);
                }
            }
        }

        Ok(entries)
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChangeEvent<V>>> {
        let mut client = self.client.clone();
        let (watcher, mut stream) = client
            .watch(
                self.key_root(),
                Some(WatchOptions::new().with_prefix().with_prev_key()),
            )
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let root = self.key_root();

        tokio::spawn(async move {
            // Dropping the watcher cancels the watch.
            let _watcher = watcher;
            loop {
                let resp = match stream.message().await {
                    Ok(Some(resp)) => resp,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::error!("Metadata watch failed: prefix={} error={}", root, error);
                        break;
                    }
                };

                for event in resp.events() {
                    match convert_event::<V>(&root, event) {
                        Ok(Some(change)) => {
                            if tx.send(change).is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            tracing::warn!("Dropping undecodable change event: {}", error);
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn convert_event<V: MapValue>(
    root: &str,
    event: &etcd_client::Event,
) -> Result<Option<ChangeEvent<V>>> {
    let Some(kv) = event.kv() else {
        return Ok(None);
    };

    let full = kv
        .key_str()
        .map_err(|error| StowError::Etcd(error.to_string()))?;
    let Some(key) = full.strip_prefix(root) else {
        return Ok(None);
    };

    let old = match event.prev_kv() {
        Some(prev) => Some(decode::<V>(prev)?),
        None => None,
    };

    let change = match event.event_type() {
        EventType::Put => ChangeEvent {
            key: key.to_string(),
            kind: if kv.version() == 1 {
                ChangeKind::Inserted
            } else {
                ChangeKind::Updated
            },
            old,
            new: Some(decode::<V>(kv)?),
        },
        EventType::Delete => ChangeEvent {
            key: key.to_string(),
            kind: ChangeKind::Removed,
            old,
            new: None,
        },
    };

    Ok(Some(change))
}
