//! Multi-node scenarios over a shared in-memory file map.

use crate::{
    ABSENT_CHECKSUM, BlobStore, ChangeEvent, DeleteFilesOperationRequest, FileKey, FileMetadata,
    KeyLocks, ListFilesOperationRequest, MemMetaMap, Membership, NodeInfo, PeerTransport,
    PutFileOperation, PutFileOperationOutcome, PutFileOperationRequest, QuorumCoordinator,
    ReadFileOperationOutcome, ReadFileOperationRequest, ReplicateFileOperation,
    ReplicateFileOperationOutcome, ReplicateFileOperationRequest, ReplicationSettings,
    ResyncNodeOperationRequest, Result, ServerMetadata, StoreEngine, StoreEngineConfig, StowError,
    Versioned, VersionedMap, WatchdogSettings, compute_checksum, partition_for_name,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Serves peers' bytes straight from their blob stores.
struct LocalPeers {
    stores: HashMap<String, Arc<BlobStore>>,
    corrupt_from: HashSet<String>,
}

#[async_trait]
impl PeerTransport for LocalPeers {
    async fn fetch_blob(&self, node_id: &str, key: &FileKey) -> Result<Bytes> {
        let store = self
            .stores
            .get(node_id)
            .ok_or_else(|| StowError::Http(format!("unknown peer {}", node_id)))?;
        let path = store.blob_path(key);
        let mut body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StowError::NotFound(key.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        if self.corrupt_from.contains(node_id) {
            body.push(b'!');
        }
        Ok(Bytes::from(body))
    }
}

struct TestCluster {
    _root: TempDir,
    files: Arc<MemMetaMap<FileMetadata>>,
    engines: HashMap<String, StoreEngine>,
}

impl TestCluster {
    fn new(node_ids: &[&str], corrupt_from: &[&str]) -> Self {
        let root = TempDir::new().unwrap();
        let nodes: Vec<NodeInfo> = node_ids
            .iter()
            .map(|id| NodeInfo {
                node_id: id.to_string(),
                address: format!("{}:8400", id),
            })
            .collect();
        let membership = Arc::new(Membership::new("g1", nodes).unwrap());
        let files = Arc::new(MemMetaMap::<FileMetadata>::new());
        let servers = Arc::new(MemMetaMap::<ServerMetadata>::new());

        let stores: HashMap<String, Arc<BlobStore>> = node_ids
            .iter()
            .map(|id| {
                let store = BlobStore::new(root.path().join("blobs"), *id).unwrap();
                (id.to_string(), Arc::new(store))
            })
            .collect();
        let peers = Arc::new(LocalPeers {
            stores: stores.clone(),
            corrupt_from: corrupt_from.iter().map(|id| id.to_string()).collect(),
        });

        let engines = node_ids
            .iter()
            .map(|id| {
                let engine = StoreEngine::new(StoreEngineConfig {
                    local_node_id: id.to_string(),
                    membership: membership.clone(),
                    files: files.clone(),
                    servers: servers.clone(),
                    blob_store: stores[*id].clone(),
                    peers: peers.clone(),
                    replication: ReplicationSettings::default(),
                    watchdog: WatchdogSettings::default(),
                    meta_root: root.path().join("meta"),
                })
                .unwrap();
                (id.to_string(), engine)
            })
            .collect();

        Self {
            _root: root,
            files,
            engines,
        }
    }

    async fn start(&self) {
        for engine in self.engines.values() {
            engine.start_dispatcher().await.unwrap();
        }
    }

    fn node(&self, id: &str) -> &StoreEngine {
        &self.engines[id]
    }

    async fn put(&self, node: &str, name: &str, body: &[u8], quorum: usize, timeout_ms: u64) -> PutFileOperationOutcome {
        self.node(node)
            .put_file_operation
            .run(PutFileOperationRequest {
                name: name.to_string(),
                body: Bytes::copy_from_slice(body),
                quorum,
                timeout: Some(Duration::from_millis(timeout_ms)),
            })
            .await
            .unwrap()
    }

    async fn entry(&self, key: &str) -> Option<FileMetadata> {
        self.files.get(key).await.unwrap().map(|current| current.value)
    }

    async fn wait_for_entry<P>(&self, key: &str, predicate: P) -> Option<FileMetadata>
    where
        P: Fn(Option<&FileMetadata>) -> bool,
    {
        for _ in 0..200 {
            let entry = self.entry(key).await;
            if predicate(entry.as_ref()) {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition on {} never held", key);
    }

    /// Push the entry's creation time into the past so the watchdog treats it as stale.
    async fn age_entry(&self, key: &str, by: chrono::Duration) {
        let mut entry = self.entry(key).await.unwrap();
        entry.create_time -= by;
        self.files.put(key, &entry).await.unwrap();
    }
}

fn stored_key(outcome: &PutFileOperationOutcome) -> String {
    match outcome {
        PutFileOperationOutcome::Replicated(result) | PutFileOperationOutcome::Accepted(result) => {
            result.key.clone()
        }
        PutFileOperationOutcome::Conflict => panic!("unexpected conflict"),
    }
}

#[tokio::test]
async fn test_upload_reaches_quorum_and_converges() {
    let cluster = TestCluster::new(&["n1", "n2", "n3"], &[]);
    cluster.start().await;

    let outcome = cluster.put("n1", "a.txt", b"hello", 2, 5000).await;
    let PutFileOperationOutcome::Replicated(result) = &outcome else {
        panic!("expected replicated, got {:?}", outcome);
    };
    assert_eq!(result.check_sum, compute_checksum(b"hello"));
    assert_eq!(result.quorum, 2);

    let entry = cluster
        .wait_for_entry(&result.key, |entry| {
            entry.is_some_and(|entry| entry.add_nodes.len() == 3)
        })
        .await
        .unwrap();
    assert_eq!(entry.coordinator(), Some("n1"));
    assert!(entry.remove_nodes.is_empty());

    for node in ["n1", "n2", "n3"] {
        let checksum = cluster
            .node(node)
            .blob_store()
            .verify(&entry.file_key())
            .await
            .unwrap();
        assert_eq!(checksum, entry.check_sum, "replica on {}", node);
    }
    assert_eq!(cluster.node("n1").quorum().pending_count(), 0);
}

#[tokio::test]
async fn test_corrupted_transfer_is_never_committed() {
    let cluster = TestCluster::new(&["n1", "n2", "n3"], &["n1"]);
    cluster.start().await;

    let outcome = cluster.put("n1", "a.txt", b"hello", 2, 300).await;
    assert!(matches!(outcome, PutFileOperationOutcome::Accepted(_)));
    let key = stored_key(&outcome);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let entry = cluster.entry(&key).await.unwrap();
    assert_eq!(entry.add_nodes, vec!["n1".to_string()]);

    for node in ["n2", "n3"] {
        let checksum = cluster
            .node(node)
            .blob_store()
            .verify(&entry.file_key())
            .await
            .unwrap();
        assert_eq!(checksum, crate::ABSENT_CHECKSUM, "no copy on {}", node);
    }
}

#[tokio::test]
async fn test_delete_drains_every_node_and_removes_entry() {
    let cluster = TestCluster::new(&["n1", "n2", "n3"], &[]);
    cluster.start().await;

    let key = stored_key(&cluster.put("n1", "docs/report.pdf", b"pdf", 3, 5000).await);
    let entry = cluster
        .wait_for_entry(&key, |entry| entry.is_some_and(|entry| entry.add_nodes.len() == 3))
        .await
        .unwrap();

    let result = cluster
        .node("n2")
        .delete_files_operation
        .run(DeleteFilesOperationRequest {
            keys: vec![key.clone(), "g1/1/missing.txt".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(result.deleted, vec![key.clone()]);
    assert_eq!(result.not_found, vec!["g1/1/missing.txt".to_string()]);
    assert!(result.anomalous.is_empty());

    cluster.wait_for_entry(&key, |entry| entry.is_none()).await;
    for node in ["n1", "n2", "n3"] {
        let checksum = cluster
            .node(node)
            .blob_store()
            .verify(&entry.file_key())
            .await
            .unwrap();
        assert_eq!(checksum, crate::ABSENT_CHECKSUM, "copy left on {}", node);
    }
}

#[tokio::test]
async fn test_upload_is_rejected_while_key_drains() {
    let cluster = TestCluster::new(&["n1", "n2"], &[]);

    let key = stored_key(&cluster.put("n1", "a.txt", b"v1", 1, 100).await);
    let mut entry = cluster.entry(&key).await.unwrap();
    entry.remove_nodes.insert("n2".to_string());
    cluster.files.put(&key, &entry).await.unwrap();

    let outcome = cluster.put("n1", "a.txt", b"v2", 1, 100).await;
    assert!(matches!(outcome, PutFileOperationOutcome::Conflict));
}

#[tokio::test]
async fn test_read_falls_back_to_peer_copy() {
    let cluster = TestCluster::new(&["n1", "n2"], &[]);
    let key = stored_key(&cluster.put("n1", "a.txt", b"hello", 1, 100).await);

    let local = cluster
        .node("n1")
        .read_file_operation
        .run(ReadFileOperationRequest { key: key.clone() })
        .await
        .unwrap();
    assert!(matches!(local, ReadFileOperationOutcome::Local { .. }));

    let remote = cluster
        .node("n2")
        .read_file_operation
        .run(ReadFileOperationRequest { key: key.clone() })
        .await
        .unwrap();
    match remote {
        ReadFileOperationOutcome::Remote { source, body, .. } => {
            assert_eq!(source, "n1");
            assert_eq!(body.as_ref(), b"hello");
        }
        other => panic!("expected remote read, got {:?}", other),
    }

    let missing = cluster
        .node("n2")
        .read_file_operation
        .run(ReadFileOperationRequest {
            key: "g1/3/nothing".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(missing, ReadFileOperationOutcome::NotFound));
}

#[tokio::test]
async fn test_listing_pages_with_cursor() {
    let cluster = TestCluster::new(&["n1"], &[]);
    for name in ["a.txt", "b.txt", "c.txt"] {
        cluster.put("n1", name, name.as_bytes(), 1, 100).await;
    }

    let list = &cluster.node("n1").list_files_operation;
    let first = list
        .run(ListFilesOperationRequest {
            cursor: None,
            limit: 2,
        })
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.next_cursor.is_some());

    let second = list
        .run(ListFilesOperationRequest {
            cursor: first.next_cursor.clone(),
            limit: 2,
        })
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(second.next_cursor.is_none());

    let mut names: Vec<String> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|item| item.metadata.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn test_watchdog_repairs_missed_events() {
    let cluster = TestCluster::new(&["n1", "n2", "n3"], &[]);

    // Published before anyone subscribed: the insert event is lost.
    let key = stored_key(&cluster.put("n1", "a.txt", b"hello", 1, 100).await);
    cluster.age_entry(&key, chrono::Duration::minutes(5)).await;
    cluster.start().await;

    let report = cluster.node("n2").watchdog().sweep().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.touched, 1);

    cluster
        .wait_for_entry(&key, |entry| entry.is_some_and(|entry| entry.add_nodes.len() == 3))
        .await;

    // Converged entries are left alone.
    let report = cluster.node("n2").watchdog().sweep().await.unwrap();
    assert_eq!(report.touched, 0);
    assert_eq!(report.dropped, 0);
}

#[tokio::test]
async fn test_watchdog_replaces_corrupted_local_copy() {
    let cluster = TestCluster::new(&["n1", "n2", "n3"], &[]);
    cluster.start().await;

    let key = stored_key(&cluster.put("n1", "a.txt", b"hello", 3, 5000).await);
    let entry = cluster
        .wait_for_entry(&key, |entry| entry.is_some_and(|entry| entry.add_nodes.len() == 3))
        .await
        .unwrap();
    cluster.age_entry(&key, chrono::Duration::minutes(5)).await;

    let store = cluster.node("n2").blob_store();
    tokio::fs::write(store.blob_path(&entry.file_key()), b"rotten")
        .await
        .unwrap();

    let report = cluster.node("n2").watchdog().sweep().await.unwrap();
    assert_eq!(report.dropped, 1);

    cluster
        .wait_for_entry(&key, |entry| {
            entry.is_some_and(|entry| entry.add_nodes.len() == 3 && entry.is_holder("n2"))
        })
        .await;
    let checksum = store.verify(&entry.file_key()).await.unwrap();
    assert_eq!(checksum, compute_checksum(b"hello"));
}

#[tokio::test]
async fn test_watchdog_collects_fully_drained_entry() {
    let cluster = TestCluster::new(&["n1", "n2"], &[]);
    let key = stored_key(&cluster.put("n1", "a.txt", b"hello", 1, 100).await);

    let mut entry = cluster.entry(&key).await.unwrap();
    entry.add_nodes.clear();
    entry.remove_nodes = ["n1".to_string(), "n2".to_string()].into_iter().collect();
    entry.create_time -= chrono::Duration::minutes(5);
    cluster.files.put(&key, &entry).await.unwrap();

    let report = cluster.node("n1").watchdog().sweep().await.unwrap();
    assert_eq!(report.collected, 1);
    assert!(cluster.entry(&key).await.is_none());
}

#[tokio::test]
async fn test_resync_makes_node_fetch_again() {
    let cluster = TestCluster::new(&["n1", "n2", "n3"], &[]);
    cluster.start().await;

    let key = stored_key(&cluster.put("n1", "a.txt", b"hello", 3, 5000).await);
    cluster
        .wait_for_entry(&key, |entry| entry.is_some_and(|entry| entry.add_nodes.len() == 3))
        .await;

    let result = cluster
        .node("n1")
        .resync_node_operation
        .run(ResyncNodeOperationRequest {
            node_id: "n2".to_string(),
            key: None,
        })
        .await
        .unwrap();
    assert_eq!(result.resynced, vec![key.clone()]);
    assert!(result.skipped.is_empty());

    cluster
        .wait_for_entry(&key, |entry| entry.is_some_and(|entry| entry.is_holder("n2")))
        .await;
}

#[tokio::test]
async fn test_resync_never_drops_sole_holder() {
    let cluster = TestCluster::new(&["n1", "n2"], &[]);
    let key = stored_key(&cluster.put("n1", "a.txt", b"hello", 1, 100).await);

    let result = cluster
        .node("n2")
        .resync_node_operation
        .run(ResyncNodeOperationRequest {
            node_id: "n1".to_string(),
            key: Some(key.clone()),
        })
        .await
        .unwrap();
    assert_eq!(result.skipped, vec![key.clone()]);
    assert!(cluster.entry(&key).await.unwrap().is_holder("n1"));

    let unknown = cluster
        .node("n2")
        .resync_node_operation
        .run(ResyncNodeOperationRequest {
            node_id: "n9".to_string(),
            key: None,
        })
        .await;
    assert!(matches!(unknown, Err(StowError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_capacity_report_is_published() {
    let cluster = TestCluster::new(&["n1"], &[]);
    let record = cluster.node("n1").watchdog().report_capacity().await.unwrap();
    assert_eq!(record.node_id, "n1");
    assert_eq!(record.group, "g1");

    let stored = cluster.node("n1").servers().get("n1").await.unwrap().unwrap();
    assert_eq!(stored.value, record);
}

/// Two nodes wired by hand so a test can interleave operations precisely.
struct Pair {
    _root: TempDir,
    membership: Arc<Membership>,
    files: Arc<MemMetaMap<FileMetadata>>,
    n1: Arc<BlobStore>,
    n2: Arc<BlobStore>,
}

impl Pair {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let nodes = ["n1", "n2"]
            .iter()
            .map(|id| NodeInfo {
                node_id: id.to_string(),
                address: format!("{}:8400", id),
            })
            .collect();
        let n1 = Arc::new(BlobStore::new(root.path().to_path_buf(), "n1").unwrap());
        let n2 = Arc::new(BlobStore::new(root.path().to_path_buf(), "n2").unwrap());
        Self {
            _root: root,
            membership: Arc::new(Membership::new("g1", nodes).unwrap()),
            files: Arc::new(MemMetaMap::new()),
            n1,
            n2,
        }
    }

    /// Store `body` on n1 and publish it as an upload coordinated by n1.
    async fn publish(&self, name: &str, body: &[u8]) -> (String, FileMetadata) {
        let partition = partition_for_name(name, ReplicationSettings::default().partition_count);
        let file_key = FileKey::new("g1", partition, name).unwrap();
        let check_sum = self.n1.store(&file_key, body).await.unwrap();
        let entry = FileMetadata::created_by(&file_key, body.len() as u64, check_sum, "n1");
        let key = file_key.to_string();
        self.files.put(&key, &entry).await.unwrap();
        (key, entry)
    }

    fn replicate_on_n2(&self, peers: Arc<dyn PeerTransport>) -> ReplicateFileOperation {
        ReplicateFileOperation::new(
            "n2".to_string(),
            self.files.clone(),
            self.n2.clone(),
            peers,
            Arc::new(KeyLocks::new()),
            8,
        )
    }

    fn upload_on(
        &self,
        node: &str,
        files: Arc<dyn VersionedMap<FileMetadata>>,
        quorum: Arc<QuorumCoordinator>,
    ) -> PutFileOperation {
        let blob_store = if node == "n1" { &self.n1 } else { &self.n2 };
        PutFileOperation::new(
            node.to_string(),
            self.membership.clone(),
            files,
            blob_store.clone(),
            quorum,
            ReplicationSettings::default().partition_count,
            Duration::from_secs(1),
        )
    }
}

fn upload(name: &str, body: &[u8]) -> PutFileOperationRequest {
    PutFileOperationRequest {
        name: name.to_string(),
        body: Bytes::copy_from_slice(body),
        quorum: 1,
        timeout: Some(Duration::from_millis(10)),
    }
}

async fn read_blob(source: &BlobStore, key: &FileKey) -> Result<Bytes> {
    let body = tokio::fs::read(source.blob_path(key)).await?;
    Ok(Bytes::from(body))
}

/// The first fetch stalls and returns damaged bytes; later fetches are clean.
struct SlowCorruptFirst {
    source: Arc<BlobStore>,
    fetches: AtomicUsize,
}

#[async_trait]
impl PeerTransport for SlowCorruptFirst {
    async fn fetch_blob(&self, _node_id: &str, key: &FileKey) -> Result<Bytes> {
        let body = read_blob(&self.source, key).await?;
        if self.fetches.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(body);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut damaged = body.to_vec();
        damaged.push(b'!');
        Ok(Bytes::from(damaged))
    }
}

/// Marks the entry for deletion by n1 while the bytes are in flight.
struct DeleteDuringFetch {
    source: Arc<BlobStore>,
    files: Arc<MemMetaMap<FileMetadata>>,
}

#[async_trait]
impl PeerTransport for DeleteDuringFetch {
    async fn fetch_blob(&self, _node_id: &str, key: &FileKey) -> Result<Bytes> {
        let body = read_blob(&self.source, key).await?;
        let name = key.to_string();
        let entry = self.files.get(&name).await?.unwrap().value;
        self.files
            .put(&name, &entry.with_removal("n1").unwrap())
            .await?;
        Ok(body)
    }
}

/// A new upload lands on the fetching node while old bytes are in flight.
struct UploadDuringFetch {
    source: Arc<BlobStore>,
    upload: PutFileOperation,
    body: &'static [u8],
}

#[async_trait]
impl PeerTransport for UploadDuringFetch {
    async fn fetch_blob(&self, _node_id: &str, key: &FileKey) -> Result<Bytes> {
        let body = read_blob(&self.source, key).await?;
        self.upload.run(upload(&key.name, self.body)).await?;
        Ok(body)
    }
}

/// Delegates to an in-memory map but can be told to reject writes.
struct FailingPuts {
    inner: MemMetaMap<FileMetadata>,
    fail: AtomicBool,
}

#[async_trait]
impl VersionedMap<FileMetadata> for FailingPuts {
    async fn get(&self, key: &str) -> Result<Option<Versioned<FileMetadata>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &FileMetadata) -> Result<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StowError::Etcd("leader lost".to_string()));
        }
        self.inner.put(key, value).await
    }

    async fn cas_replace(&self, key: &str, expected_version: u64, value: &FileMetadata) -> Result<bool> {
        self.inner.cas_replace(key, expected_version, value).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key).await
    }

    async fn scan_from(
        &self,
        start_after: Option<&str>,
        count: usize,
    ) -> Result<Vec<(String, Versioned<FileMetadata>)>> {
        self.inner.scan_from(start_after, count).await
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChangeEvent<FileMetadata>>> {
        self.inner.subscribe().await
    }
}

#[tokio::test]
async fn test_overlapping_replicates_keep_the_verified_copy() {
    let pair = Pair::new();
    let (key, entry) = pair.publish("a.txt", b"hello").await;
    let peers = Arc::new(SlowCorruptFirst {
        source: pair.n1.clone(),
        fetches: AtomicUsize::new(0),
    });
    let operation = pair.replicate_on_n2(peers.clone());

    let request = || ReplicateFileOperationRequest { key: key.clone() };
    let (first, second) = tokio::join!(operation.run(request()), operation.run(request()));
    let outcomes = [first.unwrap(), second.unwrap()];

    assert!(
        outcomes
            .iter()
            .any(|outcome| matches!(outcome, ReplicateFileOperationOutcome::Replicated { .. })),
        "{:?}",
        outcomes
    );
    assert_eq!(peers.fetches.load(Ordering::SeqCst), 2);

    let current = pair.files.get(&key).await.unwrap().unwrap().value;
    assert_eq!(current.add_nodes, vec!["n1".to_string(), "n2".to_string()]);
    assert_eq!(
        pair.n2.verify(&entry.file_key()).await.unwrap(),
        entry.check_sum
    );
}

#[tokio::test]
async fn test_replicate_of_replaced_upload_keeps_new_bytes() {
    let pair = Pair::new();
    let (key, entry) = pair.publish("a.txt", b"old").await;
    let quorum = Arc::new(QuorumCoordinator::new(Duration::from_secs(60), 16));
    let peers = Arc::new(UploadDuringFetch {
        source: pair.n1.clone(),
        upload: pair.upload_on("n2", pair.files.clone(), quorum),
        body: b"newer",
    });

    let outcome = pair
        .replicate_on_n2(peers)
        .run(ReplicateFileOperationRequest { key: key.clone() })
        .await
        .unwrap();
    assert_eq!(outcome, ReplicateFileOperationOutcome::NotNeeded);

    let current = pair.files.get(&key).await.unwrap().unwrap().value;
    assert_eq!(current.coordinator(), Some("n2"));
    assert_eq!(current.check_sum, compute_checksum(b"newer"));
    assert_eq!(
        pair.n2.verify(&entry.file_key()).await.unwrap(),
        compute_checksum(b"newer")
    );
}

#[tokio::test]
async fn test_delete_during_replicate_leaves_no_copy() {
    let pair = Pair::new();
    let (key, entry) = pair.publish("a.txt", b"hello").await;
    let peers = Arc::new(DeleteDuringFetch {
        source: pair.n1.clone(),
        files: pair.files.clone(),
    });

    let outcome = pair
        .replicate_on_n2(peers)
        .run(ReplicateFileOperationRequest { key: key.clone() })
        .await
        .unwrap();
    assert_eq!(outcome, ReplicateFileOperationOutcome::NotNeeded);

    let current = pair.files.get(&key).await.unwrap().unwrap().value;
    assert!(current.is_draining());
    assert!(!current.is_holder("n2"));
    assert_eq!(
        pair.n2.verify(&entry.file_key()).await.unwrap(),
        ABSENT_CHECKSUM
    );
}

#[tokio::test]
async fn test_failed_publish_restores_previous_upload() {
    let pair = Pair::new();
    let files = Arc::new(FailingPuts {
        inner: MemMetaMap::new(),
        fail: AtomicBool::new(false),
    });
    let quorum = Arc::new(QuorumCoordinator::new(Duration::from_secs(60), 16));
    let operation = pair.upload_on("n1", files.clone(), quorum.clone());

    let key = stored_key(&operation.run(upload("a.txt", b"first")).await.unwrap());
    let published = files.get(&key).await.unwrap().unwrap();

    files.fail.store(true, Ordering::SeqCst);
    let result = operation.run(upload("a.txt", b"second upload")).await;
    assert!(matches!(result, Err(StowError::Etcd(_))));

    let file_key = FileKey::parse(&key).unwrap();
    assert_eq!(
        pair.n1.verify(&file_key).await.unwrap(),
        compute_checksum(b"first")
    );
    let current = files.get(&key).await.unwrap().unwrap();
    assert_eq!(current.version, published.version);
    assert_eq!(current.value, published.value);
    assert_eq!(quorum.pending_count(), 0);
    assert_eq!(pair.n1.writes_in_progress(), 0);
}

#[tokio::test]
async fn test_failed_publish_of_new_key_leaves_nothing_behind() {
    let pair = Pair::new();
    let files = Arc::new(FailingPuts {
        inner: MemMetaMap::new(),
        fail: AtomicBool::new(true),
    });
    let quorum = Arc::new(QuorumCoordinator::new(Duration::from_secs(60), 16));
    let operation = pair.upload_on("n1", files.clone(), quorum.clone());

    let result = operation.run(upload("b.txt", b"never published")).await;
    assert!(matches!(result, Err(StowError::Etcd(_))));

    let partition = partition_for_name("b.txt", ReplicationSettings::default().partition_count);
    let file_key = FileKey::new("g1", partition, "b.txt").unwrap();
    assert_eq!(pair.n1.verify(&file_key).await.unwrap(), ABSENT_CHECKSUM);
    assert!(files.get(&file_key.to_string()).await.unwrap().is_none());
    assert_eq!(quorum.pending_count(), 0);
}
