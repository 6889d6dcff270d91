//! Upload quorum waits.
//!
//! An upload registers a [`QuorumWait`] before inserting its metadata entry.
//! The change dispatcher on the coordinating node reports every holder list it
//! observes; once enough distinct holders are seen the wait resolves.

use crate::metadata::FileMetadata;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub struct QuorumCoordinator {
    pending: StdMutex<HashMap<String, PendingQuorum>>,
    next_token: AtomicU64,
    ttl: Duration,
    capacity: usize,
}

struct PendingQuorum {
    token: u64,
    upload: FileMetadata,
    required: usize,
    holders: HashSet<String>,
    registered_at: Instant,
    reached: watch::Sender<bool>,
}

impl PendingQuorum {
    fn record(&mut self, holders: &[String]) {
        self.holders.extend(holders.iter().cloned());
        if self.holders.len() >= self.required {
            self.reached.send_replace(true);
        }
    }
}

/// Handle returned to the uploading task.
pub struct QuorumWait {
    key: String,
    token: u64,
    reached: watch::Receiver<bool>,
}

impl QuorumWait {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl QuorumCoordinator {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            pending: StdMutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Start waiting for `quorum` holders of `upload`. The coordinator's own
    /// copy counts immediately.
    pub fn begin_wait(&self, upload: &FileMetadata, quorum: usize) -> QuorumWait {
        let key = upload.key();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (reached_tx, reached_rx) = watch::channel(false);

        let mut pending = PendingQuorum {
            token,
            upload: upload.clone(),
            required: quorum.max(1),
            holders: HashSet::new(),
            registered_at: Instant::now(),
            reached: reached_tx,
        };
        pending.record(&upload.add_nodes);

        let mut table = self.lock();
        self.evict(&mut table);
        if let Some(previous) = table.insert(key.clone(), pending) {
            tracing::debug!(
                "Replacing quorum wait for {} (token {})",
                key,
                previous.token
            );
        }

        QuorumWait {
            key,
            token,
            reached: reached_rx,
        }
    }

    /// Feed a holder list seen by the coordinator. Entries from a different
    /// upload under the same key are ignored.
    pub fn observe(&self, entry: &FileMetadata) {
        let key = entry.key();
        let mut table = self.lock();
        let Some(pending) = table.get_mut(&key) else {
            return;
        };

        if !pending.upload.same_upload(entry) {
            tracing::debug!("Ignoring holders of a different upload for {}", key);
            return;
        }

        pending.record(&entry.add_nodes);
    }

    /// Block the caller until quorum is reached or `timeout` elapses. The wait
    /// is released either way.
    pub async fn await_quorum(&self, wait: QuorumWait, timeout: Duration) -> bool {
        let QuorumWait {
            key,
            token,
            mut reached,
        } = wait;

        // The borrowed value must be released before taking the table lock.
        let reached_quorum = matches!(
            tokio::time::timeout(timeout, reached.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        self.invalidate(&key, token);

        reached_quorum
    }

    /// Release a wait whose upload never reached the map.
    pub fn abandon(&self, wait: QuorumWait) {
        self.invalidate(&wait.key, wait.token);
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn invalidate(&self, key: &str, token: u64) {
        let mut table = self.lock();
        if table.get(key).is_some_and(|pending| pending.token == token) {
            table.remove(key);
        }
    }

    fn evict(&self, table: &mut HashMap<String, PendingQuorum>) {
        table.retain(|_, pending| pending.registered_at.elapsed() < self.ttl);

        while table.len() >= self.capacity {
            let oldest = table
                .iter()
                .min_by_key(|(_, pending)| pending.token)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    table.remove(&key);
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingQuorum>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
