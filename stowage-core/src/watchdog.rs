//! Periodic self-healing.
//!
//! Events can be lost while a node is down or a handler fails. The watchdog
//! walks the whole file map and nudges stale entries whose local state has
//! not converged by writing them back unchanged, which re-emits a change event
//! to every subscriber. It also verifies local holdings, removes fully drained
//! entries and publishes this node's free space.

use crate::operations::{DropHolderOutcome, ResyncNodeOperation};
use crate::replication::{ReplicaState, is_fully_drained, needs_touch, replica_state};
use crate::settings::WatchdogSettings;
use crate::{
    BlobStore, CasOutcome, CasStep, FileMetadata, Membership, Result, ServerMetadata, StowError,
    VersionedMap, cas_retry,
};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Watchdog {
    local_node_id: String,
    membership: Arc<Membership>,
    files: Arc<dyn VersionedMap<FileMetadata>>,
    servers: Arc<dyn VersionedMap<ServerMetadata>>,
    blob_store: Arc<BlobStore>,
    resync: Arc<ResyncNodeOperation>,
    settings: WatchdogSettings,
    cas_max_attempts: usize,
    meta_root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub touched: usize,
    /// Local holdings that failed verification and were given up.
    pub dropped: usize,
    /// Fully drained entries removed from the map.
    pub collected: usize,
    pub anomalous: Vec<String>,
}

impl Watchdog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_node_id: String,
        membership: Arc<Membership>,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        servers: Arc<dyn VersionedMap<ServerMetadata>>,
        blob_store: Arc<BlobStore>,
        resync: Arc<ResyncNodeOperation>,
        settings: WatchdogSettings,
        cas_max_attempts: usize,
        meta_root: PathBuf,
    ) -> Self {
        Self {
            local_node_id,
            membership,
            files,
            servers,
            blob_store,
            resync,
            settings,
            cas_max_attempts,
            meta_root,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.period);
        loop {
            ticker.tick().await;

            match self.sweep().await {
                Ok(report) if report.touched + report.dropped + report.collected > 0 => {
                    tracing::info!(
                        "Watchdog sweep: scanned={} touched={} dropped={} collected={} anomalous={}",
                        report.scanned,
                        report.touched,
                        report.dropped,
                        report.collected,
                        report.anomalous.len()
                    );
                }
                Ok(_) => {}
                Err(error) => tracing::error!("Watchdog sweep failed: {}", error),
            }

            if let Err(error) = self.report_capacity().await {
                tracing::warn!("Failed to publish server metadata: {}", error);
            }
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .map_err(|error| StowError::Config(format!("invalid stale_after: {}", error)))?;
        let page_size = self.settings.page_size.max(1);

        let mut report = SweepReport::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.files.scan_from(cursor.as_deref(), page_size).await?;
            let exhausted = page.len() < page_size;
            cursor = page.last().map(|(key, _)| key.clone());

            for (key, versioned) in page {
                report.scanned += 1;
                if let Err(error) = self
                    .inspect(&key, &versioned.value, now, stale_after, &mut report)
                    .await
                {
                    tracing::warn!("Watchdog failed on {}: {}", key, error);
                    report.anomalous.push(key);
                }
            }

            if exhausted || cursor.is_none() {
                break;
            }
        }

        Ok(report)
    }

    async fn inspect(
        &self,
        key: &str,
        entry: &FileMetadata,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
        report: &mut SweepReport,
    ) -> Result<()> {
        if entry.age(now) < stale_after {
            return Ok(());
        }

        if is_fully_drained(entry, &self.membership) {
            if self.files.remove(key).await? {
                report.collected += 1;
            }
            return Ok(());
        }

        if needs_touch(entry, &self.local_node_id, now, stale_after) {
            if self.touch(key, now, stale_after).await? {
                report.touched += 1;
            }
            return Ok(());
        }

        if self.settings.verify_holdings
            && replica_state(Some(entry), &self.local_node_id) == ReplicaState::Held
        {
            let actual = self.blob_store.verify(&entry.file_key()).await?;
            if actual != entry.check_sum {
                tracing::warn!(
                    "Local copy failed verification: key={} expected={} actual={}",
                    key,
                    entry.check_sum,
                    actual
                );
                match self.resync.drop_holder(key, &self.local_node_id).await? {
                    DropHolderOutcome::Dropped => report.dropped += 1,
                    DropHolderOutcome::SoleHolder => report.anomalous.push(key.to_string()),
                    DropHolderOutcome::NotHolder => {}
                }
            }
        }

        Ok(())
    }

    /// Rewrite the entry unchanged so every node sees it again.
    async fn touch(&self, key: &str, now: DateTime<Utc>, stale_after: chrono::Duration) -> Result<bool> {
        let local = self.local_node_id.as_str();
        let outcome = cas_retry(
            self.files.as_ref(),
            key,
            self.cas_max_attempts,
            |current: &FileMetadata| {
                if needs_touch(current, local, now, stale_after) {
                    CasStep::Write(current.clone())
                } else {
                    CasStep::Skip
                }
            },
        )
        .await?;

        Ok(matches!(outcome, CasOutcome::Written(_)))
    }

    pub async fn report_capacity(&self) -> Result<ServerMetadata> {
        let blob_root = self.blob_store.node_root();
        tokio::fs::create_dir_all(&blob_root).await?;
        tokio::fs::create_dir_all(&self.meta_root).await?;

        let record = ServerMetadata {
            node_id: self.local_node_id.clone(),
            group: self.membership.group().to_string(),
            meta_free_bytes: fs2::available_space(&self.meta_root)?,
            blob_free_bytes: fs2::available_space(&blob_root)?,
            updated_at: Utc::now(),
        };

        self.servers.put(&self.local_node_id, &record).await?;
        Ok(record)
    }
}
