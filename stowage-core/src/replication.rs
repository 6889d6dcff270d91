//! Per-entry replica state as seen from one node.
//!
//! These functions are pure so the dispatcher, the watchdog and tests agree
//! on what a node should do with an entry without touching the map.
//! [`KeyLocks`] keeps the local transitions of one key from overlapping.

use crate::metadata::FileMetadata;
use crate::node::Membership;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    /// Not draining and the local node is not a holder yet.
    Propagating,
    Held,
    Draining,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Idle,
    Replicate,
    Drain,
}

pub fn replica_state(entry: Option<&FileMetadata>, local_node_id: &str) -> ReplicaState {
    match entry {
        None => ReplicaState::Gone,
        Some(entry) if entry.is_draining() => ReplicaState::Draining,
        Some(entry) if entry.is_holder(local_node_id) => ReplicaState::Held,
        Some(_) => ReplicaState::Propagating,
    }
}

pub fn intent(entry: Option<&FileMetadata>, local_node_id: &str) -> Intent {
    match (replica_state(entry, local_node_id), entry) {
        (ReplicaState::Propagating, _) => Intent::Replicate,
        (ReplicaState::Draining, Some(entry)) if !entry.is_removed_by(local_node_id) => {
            Intent::Drain
        }
        _ => Intent::Idle,
    }
}

/// The local node is the original coordinator and another node has joined
/// as holder. Only this case feeds the coordinator's quorum wait.
pub fn coordinator_sees_new_holder(entry: &FileMetadata, local_node_id: &str) -> bool {
    !entry.is_draining()
        && entry.add_nodes.len() > 1
        && entry.coordinator() == Some(local_node_id)
}

/// Every member has reported deletion; the entry may be removed.
pub fn is_fully_drained(entry: &FileMetadata, membership: &Membership) -> bool {
    entry.is_draining() && membership.covered_by(&entry.remove_nodes)
}

/// A stale entry whose local state still needs an event to converge.
pub fn needs_touch(
    entry: &FileMetadata,
    local_node_id: &str,
    now: DateTime<Utc>,
    stale_after: chrono::Duration,
) -> bool {
    if entry.age(now) < stale_after {
        return false;
    }
    intent(Some(entry), local_node_id) != Intent::Idle
}

/// Per-key mutual exclusion for local replica transitions.
///
/// Replicate and drain handlers for one key run one at a time on a node, so a
/// handler always decides on an entry read while it holds the key.
#[derive(Default)]
pub struct KeyLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    _held: OwnedMutexGuard<()>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.table().entry(key.to_string()).or_default().clone();
        let held = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            _held: held,
        }
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.locks.table();
        // One reference in the table and one in this guard: nobody is waiting.
        if table
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) <= 2)
        {
            table.remove(&self.key);
        }
    }
}
