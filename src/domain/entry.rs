//! Target-side locations and persisted manifest records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::book::Fingerprint;

/// One audiobook's materialized location in the destination library.
///
/// All paths are relative to the target root, so a library can be moved
/// wholesale without invalidating its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Canonical target directory
    pub dir: PathBuf,

    /// Metadata sidecar file inside `dir`
    pub sidecar: PathBuf,

    /// Ordered target audio parts
    pub audio_files: Vec<PathBuf>,

    /// Cover image, when one was placed
    pub cover: Option<PathBuf>,

    /// Fingerprint of the `SourceBook` this entry was derived from
    pub fingerprint: Fingerprint,
}

impl TargetEntry {
    /// Every payload file the entry owns (audio parts, cover, sidecar).
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = self.audio_files.clone();
        if let Some(ref cover) = self.cover {
            files.push(cover.clone());
        }
        files.push(self.sidecar.clone());
        files
    }
}

/// Persisted record of a successfully synced book.
///
/// At most one record exists per source identifier. Records are written only
/// after a book's file operations fully succeed, so an interrupted run leaves
/// no stale "done" marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Where the book lives in the target library
    pub entry: TargetEntry,

    /// When the record was last written
    pub synced_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// Create a record stamped with the current time.
    pub fn new(entry: TargetEntry) -> Self {
        Self {
            entry,
            synced_at: Utc::now(),
        }
    }

    /// Fingerprint of the source content this record reflects.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.entry.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::PartStat;

    fn sample_entry() -> TargetEntry {
        TargetEntry {
            dir: PathBuf::from("Jane Doe/First Book"),
            sidecar: PathBuf::from("Jane Doe/First Book/metadata.json"),
            audio_files: vec![PathBuf::from("Jane Doe/First Book/First Book.m4b")],
            cover: Some(PathBuf::from("Jane Doe/First Book/cover.jpg")),
            fingerprint: Fingerprint::compute(
                "meta",
                &[PartStat {
                    name: "First Book.m4b".to_string(),
                    len: 10,
                    mtime_secs: 0,
                }],
            ),
        }
    }

    #[test]
    fn test_entry_files_includes_everything() {
        let entry = sample_entry();
        let files = entry.files();

        assert_eq!(files.len(), 3);
        assert!(files.contains(&PathBuf::from("Jane Doe/First Book/First Book.m4b")));
        assert!(files.contains(&PathBuf::from("Jane Doe/First Book/cover.jpg")));
        assert!(files.contains(&PathBuf::from("Jane Doe/First Book/metadata.json")));
    }

    #[test]
    fn test_record_roundtrip() {
        let record = ManifestRecord::new(sample_entry());

        let json = serde_json::to_string(&record).unwrap();
        let parsed: ManifestRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.entry, record.entry);
        assert_eq!(parsed.fingerprint(), record.fingerprint());
    }
}
