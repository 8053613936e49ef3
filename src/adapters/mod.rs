//! Adapters for the external tools this engine talks to.
//!
//! Library readers parse one source tool's export into `SourceBook`s;
//! adding support for a new tool means adding a reader here, never touching
//! the reconciler. The bookshelf client notifies a destination server after
//! a run.

pub mod bookshelf;
pub mod libation;
pub mod openaudible;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::config::{SourceKind, SyncConfig};
use crate::domain::{PartStat, RejectedBook, SourceBook};

// Re-export the concrete adapters
pub use bookshelf::BookshelfClient;
pub use libation::LibationReader;
pub use openaudible::OpenAudibleReader;

/// Everything a reader learned from one pass over the source export.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Books with all required fields present, in export order
    pub books: Vec<SourceBook>,

    /// Books excluded for missing required fields, reported not dropped
    pub rejects: Vec<RejectedBook>,
}

/// Errors that abort the read entirely.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The export cannot be read or parsed at all.
    #[error("source library export is unreadable: {0}")]
    MalformedLibrary(String),

    #[error("source library I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface over a source tool's export.
#[async_trait]
pub trait LibraryReader: Send + Sync {
    /// Human-readable reader name
    fn name(&self) -> &str;

    /// Produce the current set of source books.
    ///
    /// Finite and restartable: re-reading an unchanged export yields the
    /// same outcome. Read-only; per-book field gaps land in
    /// [`ReadOutcome::rejects`] rather than aborting.
    async fn read_books(&self) -> Result<ReadOutcome, ReaderError>;
}

/// Build the reader matching the configured source tool.
pub fn reader_for(config: &SyncConfig) -> Box<dyn LibraryReader> {
    match config.source_kind {
        SourceKind::OpenAudible => Box::new(OpenAudibleReader::new(
            config.export_path.clone(),
            config.source_root.clone(),
            config.audio_extension.clone(),
        )),
        SourceKind::Libation => Box::new(LibationReader::new(
            config.export_path.clone(),
            config.source_root.clone(),
            config.audio_extension.clone(),
        )),
    }
}

/// Split a comma-separated name list into trimmed, non-empty names.
pub(crate) fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Locate a book's audio parts by glob, sorted for a stable part order.
pub(crate) fn glob_parts(dir: &Path, stem: &str, extension: &str) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/{}*{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(stem),
        glob::Pattern::escape(extension)
    );

    let mut parts: Vec<PathBuf> = glob::glob(&pattern)
        .map(|paths| paths.filter_map(Result::ok).collect())
        .unwrap_or_default();
    parts.sort();
    parts
}

/// Stat payload files into the (name, size, mtime) triples the fingerprint
/// digests.
pub(crate) async fn stat_parts(files: &[PathBuf]) -> std::io::Result<Vec<PartStat>> {
    let mut stats = Vec::with_capacity(files.len());

    for path in files {
        let meta = tokio::fs::metadata(path).await?;
        let mtime_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        stats.push(PartStat {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            len: meta.len(),
            mtime_secs,
        });
    }

    Ok(stats)
}

/// Parse the date formats the source tools export.
///
/// Tolerates a trailing `Z`, a timezone offset, and missing fractional
/// seconds; also accepts a bare `YYYY-MM-DD`. Returns `None` rather than
/// failing; purchase dates are advisory.
pub(crate) fn parse_export_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    let mut value = trimmed.strip_suffix('Z').unwrap_or(trimmed).to_string();

    // Offsets like +02:00 or -05:00 start after the seconds field.
    for symbol in ['+', '-'] {
        if let Some(idx) = value.rfind(symbol) {
            if idx >= 19 {
                value.truncate(idx);
            }
        }
    }

    if !value.contains('.') {
        value.push_str(".0");
    }

    NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}
