//! Source-side book records.
//!
//! A `SourceBook` is one audiobook as known to the source tool. It is built
//! fresh each run by a library reader and never persisted.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One audiobook as known to the source tool.
///
/// Immutable for the duration of a run. The `fingerprint` is derived from the
/// book's payload files and descriptive metadata, so either kind of change is
/// picked up on the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBook {
    /// Stable source identifier (the ASIN for both supported tools)
    pub id: String,

    /// Full title, subtitle included where the source provides one
    pub title: String,

    /// Ordered author list, primary author first (never empty)
    pub authors: Vec<String>,

    /// Ordered narrator list (may be empty)
    pub narrators: Vec<String>,

    /// Series name, if the book belongs to one
    pub series: Option<String>,

    /// Position within the series, kept as the source's string ("1", "1.5")
    pub series_index: Option<String>,

    /// Publisher-provided description
    pub description: String,

    /// Cover image on the source side, when one was found
    pub cover: Option<PathBuf>,

    /// Ordered audio parts (one or more), absolute source paths
    pub audio_files: Vec<PathBuf>,

    /// Purchase date, when the export carries one
    pub purchase_date: Option<NaiveDate>,

    /// Content fingerprint over payload files and metadata
    pub fingerprint: Fingerprint,
}

impl SourceBook {
    /// Primary author used for the target path hierarchy.
    pub fn primary_author(&self) -> &str {
        self.authors
            .first()
            .map(String::as_str)
            .unwrap_or("Unknown Author")
    }

    /// Canonical metadata payload folded into the fingerprint.
    ///
    /// Field order is fixed so the digest is stable across runs.
    pub fn metadata_digest_input(&self) -> String {
        serde_json::json!({
            "title": self.title,
            "authors": self.authors,
            "narrators": self.narrators,
            "series": self.series,
            "series_index": self.series_index,
            "description": self.description,
        })
        .to_string()
    }

    /// Compute and attach the fingerprint from payload file stats.
    pub fn seal_fingerprint(&mut self, parts: &[PartStat]) {
        self.fingerprint = Fingerprint::compute(&self.metadata_digest_input(), parts);
    }
}

/// Size/mtime stat for one payload file, as observed at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartStat {
    /// File name (not the full path, so relocating a source root is benign)
    pub name: String,

    /// Size in bytes
    pub len: u64,

    /// Modification time, seconds since the epoch
    pub mtime_secs: i64,
}

/// Content-derived identifier used to detect changes between runs.
///
/// Truncated hex SHA-256, like every other digest in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest the metadata payload plus each part's (name, size, mtime).
    pub fn compute(metadata: &str, parts: &[PartStat]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(metadata.as_bytes());
        for part in parts {
            hasher.update(part.name.as_bytes());
            hasher.update(part.len.to_le_bytes());
            hasher.update(part.mtime_secs.to_le_bytes());
        }
        let result = hasher.finalize();

        // First 8 bytes (16 hex chars)
        Self(hex::encode(&result[..8]))
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A book the reader had to exclude because a required field was absent.
///
/// Rejects are reported in the run summary; they never abort the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedBook {
    /// Source identifier, when the record carried one
    pub id: Option<String>,

    /// Title, when the record carried one
    pub title: Option<String>,

    /// Why the book was excluded
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book() -> SourceBook {
        SourceBook {
            id: "B00TEST123".to_string(),
            title: "First Book".to_string(),
            authors: vec!["Jane Doe".to_string()],
            narrators: vec!["Sam Reader".to_string()],
            series: None,
            series_index: None,
            description: "A test book.".to_string(),
            cover: None,
            audio_files: vec![PathBuf::from("/src/First Book.m4b")],
            purchase_date: None,
            fingerprint: Fingerprint::default(),
        }
    }

    #[test]
    fn test_fingerprint_stability() {
        let parts = vec![PartStat {
            name: "First Book.m4b".to_string(),
            len: 1024,
            mtime_secs: 1_700_000_000,
        }];

        let a = Fingerprint::compute("meta", &parts);
        let b = Fingerprint::compute("meta", &parts);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_sensitive_to_size() {
        let before = vec![PartStat {
            name: "book.m4b".to_string(),
            len: 1024,
            mtime_secs: 1_700_000_000,
        }];
        let after = vec![PartStat {
            name: "book.m4b".to_string(),
            len: 2048,
            mtime_secs: 1_700_000_000,
        }];

        assert_ne!(
            Fingerprint::compute("meta", &before),
            Fingerprint::compute("meta", &after)
        );
    }

    #[test]
    fn test_fingerprint_sensitive_to_metadata() {
        let parts = vec![PartStat {
            name: "book.m4b".to_string(),
            len: 1024,
            mtime_secs: 1_700_000_000,
        }];

        let mut book = sample_book();
        book.seal_fingerprint(&parts);
        let original = book.fingerprint.clone();

        book.description = "A revised description.".to_string();
        book.seal_fingerprint(&parts);

        assert_ne!(original, book.fingerprint);
    }

    #[test]
    fn test_primary_author_fallback() {
        let mut book = sample_book();
        assert_eq!(book.primary_author(), "Jane Doe");

        book.authors.clear();
        assert_eq!(book.primary_author(), "Unknown Author");
    }
}
