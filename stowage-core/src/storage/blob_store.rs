use crate::error::{Result, StowError};
use crate::metadata::{ABSENT_CHECKSUM, FileKey};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Instant;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// BlobStore keeps one node's replicas at
/// `{file_root}/{node_id}/{group}/{partition}/{name}`.
///
/// Concurrent writers to the same target fail fast with
/// [`StowError::InUse`] instead of interleaving bytes.
pub struct BlobStore {
    file_root: PathBuf,
    node_id: String,
    writes_in_progress: StdMutex<HashMap<PathBuf, Instant>>,
}

struct WriteClaim<'a> {
    registry: &'a StdMutex<HashMap<PathBuf, Instant>>,
    path: PathBuf,
}

impl Drop for WriteClaim<'_> {
    fn drop(&mut self) {
        let mut running = self
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.path);
    }
}

impl BlobStore {
    pub fn new(file_root: PathBuf, node_id: impl Into<String>) -> Result<Self> {
        let node_id = node_id.into();
        std::fs::create_dir_all(file_root.join(&node_id))?;
        Ok(Self {
            file_root,
            node_id,
            writes_in_progress: StdMutex::new(HashMap::new()),
        })
    }

    pub fn node_root(&self) -> PathBuf {
        self.file_root.join(&self.node_id)
    }

    pub fn blob_path(&self, key: &FileKey) -> PathBuf {
        let mut path = self
            .node_root()
            .join(&key.group)
            .join(key.partition.to_string());
        for component in key.name.split('/') {
            path.push(component);
        }
        path
    }

    /// Write `source` to the key's path and return the CRC32 of the bytes.
    pub async fn store<R>(&self, key: &FileKey, source: R) -> Result<u32>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.replace(key, source).await?.commit().await
    }

    /// Write `source` over the key's path, keeping any previous replica aside
    /// until the returned [`Replacement`] is committed or rolled back.
    pub async fn replace<R>(&self, key: &FileKey, source: R) -> Result<Replacement<'_>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = self.blob_path(key);
        let claim = self.claim_write(&path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|error| store_failure(&path, error))?;
        }

        let stamp = ulid::Ulid::new();
        let tmp_path = path.with_extension(format!("{}.tmp", stamp));
        let checksum = match write_with_checksum(&tmp_path, source).await {
            Ok(checksum) => checksum,
            Err(error) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(store_failure(&path, error));
            }
        };

        let backup_path = path.with_extension(format!("{}.bak", stamp));
        let backup = match fs::rename(&path, &backup_path).await {
            Ok(()) => Some(backup_path),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
            Err(error) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(store_failure(&path, error));
            }
        };

        if let Err(error) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, &path).await;
            }
            return Err(store_failure(&path, error));
        }

        tracing::debug!(
            "Staged blob {} checksum={} replaced={}",
            key,
            checksum,
            backup.is_some()
        );
        Ok(Replacement {
            path,
            backup,
            checksum,
            _claim: claim,
        })
    }

    /// Open the local replica, `None` when it is not on disk.
    pub async fn read(&self, key: &FileKey) -> Result<Option<fs::File>> {
        match fs::File::open(self.blob_path(key)).await {
            Ok(file) => Ok(Some(file)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Recompute the checksum of the local replica, or [`ABSENT_CHECKSUM`].
    pub async fn verify(&self, key: &FileKey) -> Result<u32> {
        let Some(mut file) = self.read(key).await? else {
            return Ok(ABSENT_CHECKSUM);
        };

        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize())
    }

    /// Best-effort unlink. Returns whether a file was removed.
    pub async fn delete(&self, key: &FileKey) -> Result<bool> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    pub fn writes_in_progress(&self) -> usize {
        self.writes_in_progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn claim_write(&self, path: &Path) -> Result<WriteClaim<'_>> {
        let mut running = self
            .writes_in_progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(started) = running.get(path) {
            return Err(StowError::InUse(format!(
                "{} (writing for {:?})",
                path.display(),
                started.elapsed()
            )));
        }

        running.insert(path.to_path_buf(), Instant::now());
        Ok(WriteClaim {
            registry: &self.writes_in_progress,
            path: path.to_path_buf(),
        })
    }
}

/// A freshly written replica whose predecessor is still recoverable.
///
/// The write claim on the path is held until `commit` or `rollback`.
pub struct Replacement<'a> {
    path: PathBuf,
    backup: Option<PathBuf>,
    checksum: u32,
    _claim: WriteClaim<'a>,
}

impl Replacement<'_> {
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Keep the new bytes and discard the previous replica.
    pub async fn commit(self) -> Result<u32> {
        if let Some(backup) = &self.backup {
            match fs::remove_file(backup).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(store_failure(backup, error)),
            }
        }
        Ok(self.checksum)
    }

    /// Put the previous replica back, or remove the new bytes if there was none.
    pub async fn rollback(self) -> Result<()> {
        let restored = match &self.backup {
            Some(backup) => fs::rename(backup, &self.path).await,
            None => fs::remove_file(&self.path).await,
        };
        match restored {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(store_failure(&self.path, error)),
        }
    }
}

async fn write_with_checksum<R>(path: &Path, mut source: R) -> std::io::Result<u32>
where
    R: AsyncRead + Unpin + Send,
{
    let mut file = fs::File::create(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];

    loop {
        let read = source.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        file.write_all(&buffer[..read]).await?;
    }

    file.sync_all().await?;
    Ok(hasher.finalize())
}

fn store_failure(path: &Path, error: std::io::Error) -> StowError {
    StowError::StoreFailure {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
