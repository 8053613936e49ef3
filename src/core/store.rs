//! Persistent manifest of previously processed books.
//!
//! A single checksummed JSON file maps source identifiers to manifest
//! records. The store is the sole source of truth for "already processed"
//! status; the target tree is never re-scanned to infer history.
//!
//! A run holds an exclusive lock on a sibling lock file for its whole
//! duration, so concurrent runs against the same store fail fast.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::ManifestRecord;

/// Current manifest schema version.
const MANIFEST_VERSION: u32 = 1;

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another run holds the exclusive lock.
    #[error("another run holds the state store lock at {0}")]
    LockContention(PathBuf),

    /// The manifest exists but cannot be trusted.
    #[error("state store is corrupt: {0}")]
    Corrupt(String),

    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk manifest schema.
#[derive(Debug, Deserialize)]
struct ManifestFile {
    version: u32,
    checksum: String,
    records: BTreeMap<String, ManifestRecord>,
}

/// Borrowed counterpart used when writing, to avoid cloning every record.
#[derive(Serialize)]
struct ManifestFileRef<'a> {
    version: u32,
    checksum: String,
    records: &'a BTreeMap<String, ManifestRecord>,
}

/// File-backed state store with an exclusive run lock.
pub struct StateStore {
    manifest_path: PathBuf,
    records: BTreeMap<String, ManifestRecord>,

    /// Held for the lifetime of the store; released when the handle drops.
    _lock: std::fs::File,
}

impl StateStore {
    /// Default manifest location inside a target library.
    pub fn default_path(target_root: &Path) -> PathBuf {
        target_root.join(".shelfsync").join("manifest.json")
    }

    /// Open the store, acquiring the run lock.
    ///
    /// An absent manifest is a first run and yields an empty store. A
    /// manifest that fails to parse, carries an unknown version, or fails
    /// its checksum is `StoreError::Corrupt`, unless `rebuild_on_corrupt`
    /// is set, in which case history is discarded with a warning and the
    /// store starts empty.
    pub async fn open(manifest_path: &Path, rebuild_on_corrupt: bool) -> Result<Self, StoreError> {
        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let lock_path = manifest_path.with_extension("lock");
        let lock = Self::acquire_lock(&lock_path)?;

        let records = match Self::load_records(manifest_path).await {
            Ok(records) => records,
            Err(StoreError::Corrupt(reason)) if rebuild_on_corrupt => {
                warn!(%reason, "Discarding corrupt manifest; starting from an empty store");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        debug!(
            path = %manifest_path.display(),
            records = records.len(),
            "Opened state store"
        );

        Ok(Self {
            manifest_path: manifest_path.to_path_buf(),
            records,
            _lock: lock,
        })
    }

    fn acquire_lock(lock_path: &Path) -> Result<std::fs::File, StoreError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(StoreError::LockContention(lock_path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_records(
        manifest_path: &Path,
    ) -> Result<BTreeMap<String, ManifestRecord>, StoreError> {
        if !fs::try_exists(manifest_path).await? {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(manifest_path).await?;
        let manifest: ManifestFile = serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("unparseable manifest: {}", e)))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }

        let expected = records_checksum(&manifest.records)?;
        if manifest.checksum != expected {
            return Err(StoreError::Corrupt(format!(
                "checksum mismatch: recorded {} computed {}",
                manifest.checksum, expected
            )));
        }

        Ok(manifest.records)
    }

    /// Look up the record for a source identifier.
    pub fn get(&self, source_id: &str) -> Option<&ManifestRecord> {
        self.records.get(source_id)
    }

    /// All records, keyed by source identifier.
    pub fn records(&self) -> &BTreeMap<String, ManifestRecord> {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace a record and persist immediately.
    ///
    /// Called only after a book's file operations fully succeeded, so a
    /// crash between books never leaves a stale "done" marker.
    pub async fn record_success(
        &mut self,
        source_id: &str,
        record: ManifestRecord,
    ) -> Result<(), StoreError> {
        self.records.insert(source_id.to_string(), record);
        self.persist().await
    }

    /// Remove a record (orphan cleared) and persist immediately.
    pub async fn remove_record(
        &mut self,
        source_id: &str,
    ) -> Result<Option<ManifestRecord>, StoreError> {
        let removed = self.records.remove(source_id);
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Final durability barrier; all recorded changes are on disk after this
    /// returns.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        self.persist().await
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let manifest = ManifestFileRef {
            version: MANIFEST_VERSION,
            checksum: records_checksum(&self.records)?,
            records: &self.records,
        };
        let json = serde_json::to_string_pretty(&manifest)?;

        // Write-then-rename keeps the previous manifest intact on a crash.
        let tmp_path = self.manifest_path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.manifest_path).await?;
        Ok(())
    }
}

/// Checksum over the serialized records map (BTreeMap keeps it stable).
fn records_checksum(records: &BTreeMap<String, ManifestRecord>) -> Result<String, StoreError> {
    let payload = serde_json::to_string(records)?;
    Ok(hex::encode(Sha256::digest(payload.as_bytes())))
}
