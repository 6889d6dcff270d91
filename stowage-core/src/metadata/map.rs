use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

/// Values that can be stored in a [`VersionedMap`].
pub trait MapValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> MapValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<V> {
    pub value: V,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent<V> {
    pub key: String,
    pub kind: ChangeKind,
    pub old: Option<Versioned<V>>,
    pub new: Option<Versioned<V>>,
}

/// Linearizable, versioned, ordered map provided by the consensus substrate.
///
/// Change events fire on every subscriber regardless of which node issued the
/// mutation. Delivery is at-least-once and ordered per key only.
#[async_trait]
pub trait VersionedMap<V: MapValue>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned<V>>>;

    /// Unconditional create or overwrite. Returns the new version.
    async fn put(&self, key: &str, value: &V) -> Result<u64>;

    /// Replace only if the stored version still equals `expected_version`.
    /// `false` means the race was lost.
    async fn cas_replace(&self, key: &str, expected_version: u64, value: &V) -> Result<bool>;

    async fn remove(&self, key: &str) -> Result<bool>;

    /// Up to `count` entries in key order, strictly after `start_after`.
    async fn scan_from(
        &self,
        start_after: Option<&str>,
        count: usize,
    ) -> Result<Vec<(String, Versioned<V>)>>;

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChangeEvent<V>>>;
}

struct MemMapInner<V> {
    entries: BTreeMap<String, Versioned<V>>,
    revision: u64,
    subscribers: Vec<mpsc::UnboundedSender<ChangeEvent<V>>>,
}

impl<V: Clone> MemMapInner<V> {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn publish(&mut self, event: ChangeEvent<V>) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn write(&mut self, key: &str, value: V) -> u64 {
        let version = self.next_revision();
        let new = Versioned { value, version };
        let old = self.entries.insert(key.to_string(), new.clone());
        let kind = if old.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Inserted
        };
        self.publish(ChangeEvent {
            key: key.to_string(),
            kind,
            old,
            new: Some(new),
        });
        version
    }
}

/// In-process map shared by every node of a test or single-process group.
///
/// Versions come from one map-wide revision counter, like etcd's
/// mod-revision, so they are monotonic per key.
pub struct MemMetaMap<V> {
    inner: RwLock<MemMapInner<V>>,
}

impl<V: MapValue> MemMetaMap<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemMapInner {
                entries: BTreeMap::new(),
                revision: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

impl<V: MapValue> Default for MemMetaMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: MapValue> VersionedMap<V> for MemMetaMap<V> {
    async fn get(&self, key: &str) -> Result<Option<Versioned<V>>> {
        Ok(self.inner.read().await.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &V) -> Result<u64> {
        let mut inner = self.inner.write().await;
        Ok(inner.write(key, value.clone()))
    }

    async fn cas_replace(&self, key: &str, expected_version: u64, value: &V) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.entries.get(key) {
            Some(current) if current.version == expected_version => {
                inner.write(key, value.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(old) = inner.entries.remove(key) else {
            return Ok(false);
        };
        inner.next_revision();
        inner.publish(ChangeEvent {
            key: key.to_string(),
            kind: ChangeKind::Removed,
            old: Some(old),
            new: None,
        });
        Ok(true)
    }

    async fn scan_from(
        &self,
        start_after: Option<&str>,
        count: usize,
    ) -> Result<Vec<(String, Versioned<V>)>> {
        let inner = self.inner.read().await;
        let lower = match start_after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };

        Ok(inner
            .entries
            .range((lower, Bound::Unbounded))
            .take(count)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChangeEvent<V>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.subscribers.push(tx);
        Ok(rx)
    }
}
