//! Replicated file metadata.
//!
//! One [`FileMetadata`] entry per stored object, keyed by
//! `group/partition/name`, lives in a [`VersionedMap`]. Every mutation after
//! creation goes through [`cas_retry`].

pub mod cas;
pub mod etcd;
pub mod map;

pub use cas::{CasOutcome, CasStep, cas_retry};
pub use etcd::EtcdMetaMap;
pub use map::{ChangeEvent, ChangeKind, MapValue, MemMetaMap, Versioned, VersionedMap};

use crate::error::{Result, StowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Checksum reported for a file that is not on disk.
pub const ABSENT_CHECKSUM: u32 = 0;

/// Canonical `group/partition/name` address of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    pub group: String,
    pub partition: u32,
    pub name: String,
}

impl FileKey {
    pub fn new(group: impl Into<String>, partition: u32, name: &str) -> Result<Self> {
        let group = group.into();
        if group.is_empty() || group.contains('/') {
            return Err(StowError::InvalidRequest(format!(
                "invalid group: '{}'",
                group
            )));
        }
        if partition == 0 {
            return Err(StowError::InvalidRequest(
                "partition must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            group,
            partition,
            name: normalize_name(name)?,
        })
    }

    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.splitn(3, '/');
        let (Some(group), Some(partition), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(StowError::InvalidRequest(format!(
                "key must look like group/partition/name: {}",
                key
            )));
        };

        let partition = partition.parse::<u32>().map_err(|_| {
            StowError::InvalidRequest(format!("invalid partition in key: {}", key))
        })?;

        Self::new(group, partition, name)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.partition, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub group: String,
    pub partition: u32,
    pub size: u64,
    pub check_sum: u32,
    pub create_time: DateTime<Utc>,
    /// Verified holders in join order; the first entry is the coordinator.
    pub add_nodes: Vec<String>,
    pub remove_nodes: BTreeSet<String>,
}

impl FileMetadata {
    /// Fresh entry with the coordinator as sole holder.
    pub fn created_by(
        key: &FileKey,
        size: u64,
        check_sum: u32,
        coordinator: &str,
    ) -> Self {
        Self {
            name: key.name.clone(),
            group: key.group.clone(),
            partition: key.partition,
            size,
            check_sum,
            create_time: Utc::now(),
            add_nodes: vec![coordinator.to_string()],
            remove_nodes: BTreeSet::new(),
        }
    }

    pub fn file_key(&self) -> FileKey {
        FileKey {
            group: self.group.clone(),
            partition: self.partition,
            name: self.name.clone(),
        }
    }

    pub fn key(&self) -> String {
        self.file_key().to_string()
    }

    pub fn coordinator(&self) -> Option<&str> {
        self.add_nodes.first().map(String::as_str)
    }

    pub fn is_holder(&self, node_id: &str) -> bool {
        self.add_nodes.iter().any(|node| node == node_id)
    }

    pub fn is_removed_by(&self, node_id: &str) -> bool {
        self.remove_nodes.contains(node_id)
    }

    pub fn is_draining(&self) -> bool {
        !self.remove_nodes.is_empty()
    }

    /// Same stored object, as opposed to a later upload under the same key.
    pub fn same_upload(&self, other: &FileMetadata) -> bool {
        self.create_time == other.create_time && self.check_sum == other.check_sum
    }

    /// Copy with `node_id` appended as holder; `None` if nothing would change.
    pub fn with_holder(&self, node_id: &str) -> Option<Self> {
        if self.is_holder(node_id) || self.is_removed_by(node_id) {
            return None;
        }
        let mut next = self.clone();
        next.add_nodes.push(node_id.to_string());
        Some(next)
    }

    /// Copy with `node_id` moved from the holders to the removed set.
    pub fn with_removal(&self, node_id: &str) -> Option<Self> {
        if self.is_removed_by(node_id) {
            return None;
        }
        let mut next = self.clone();
        next.add_nodes.retain(|node| node != node_id);
        next.remove_nodes.insert(node_id.to_string());
        Some(next)
    }

    /// Copy with `node_id` dropped from the holders, used by resync.
    pub fn without_holder(&self, node_id: &str) -> Option<Self> {
        if !self.is_holder(node_id) {
            return None;
        }
        let mut next = self.clone();
        next.add_nodes.retain(|node| node != node_id);
        Some(next)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.create_time
    }
}

/// Per-node capacity report consumed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub node_id: String,
    pub group: String,
    pub meta_free_bytes: u64,
    pub blob_free_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

/// Partition in `[1, partitions]` for a file name. Independent of node identity.
pub fn partition_for_name(name: &str, partitions: u32) -> u32 {
    let partitions = partitions.max(1);
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    let value = u64::from_be_bytes(bytes);
    (value % partitions as u64) as u32 + 1
}

pub fn normalize_name(input: &str) -> Result<String> {
    let trimmed = input.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StowError::InvalidRequest(
            "file name cannot be empty".to_string(),
        ));
    }

    let mut components = Vec::new();
    for component in trimmed.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(StowError::InvalidRequest(format!(
                "invalid file name component: {}",
                component
            )));
        }
        components.push(component);
    }

    Ok(components.join("/"))
}
