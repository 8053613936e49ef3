//! OpenAudible library reader.
//!
//! OpenAudible keeps downloaded audio in one flat folder and writes a
//! `books.json` export describing every purchased book. Unknown fields in
//! the export are ignored so schema drift between OpenAudible versions
//! stays harmless.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{RejectedBook, SourceBook};

use super::{
    glob_parts, parse_export_date, split_names, stat_parts, LibraryReader, ReadOutcome,
    ReaderError,
};

/// Reader for an OpenAudible `books.json` export.
pub struct OpenAudibleReader {
    export_path: PathBuf,
    source_root: PathBuf,
    audio_extension: String,
}

/// Raw book record as OpenAudible exports it. Everything is optional here;
/// required-field enforcement happens when converting to a `SourceBook`.
#[derive(Debug, Default, Deserialize)]
struct RawBook {
    #[serde(default)]
    asin: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_short: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    narrated_by: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    series_name: Option<String>,
    #[serde(default)]
    series_sequence: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    purchase_date: Option<String>,
}

impl OpenAudibleReader {
    pub fn new(export_path: PathBuf, source_root: PathBuf, audio_extension: String) -> Self {
        Self {
            export_path,
            source_root,
            audio_extension,
        }
    }

    /// OpenAudible stores cover art next to the books folder, keyed by the
    /// same file stem as the audio.
    async fn probe_cover(&self, stem: &str) -> Option<PathBuf> {
        let base = self.export_path.parent()?;

        for dir in ["covers", "cover", "art"] {
            let candidate = base.join(dir).join(format!("{}.jpg", stem));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }

    async fn convert(&self, raw: RawBook) -> Result<SourceBook, RejectedBook> {
        let reject = |raw: &RawBook, reason: &str| RejectedBook {
            id: raw.asin.clone(),
            title: raw.title.clone().or_else(|| raw.title_short.clone()),
            reason: reason.to_string(),
        };

        let id = match raw.asin.as_deref().map(str::trim) {
            Some(asin) if !asin.is_empty() => asin.to_string(),
            _ => return Err(reject(&raw, "missing asin")),
        };

        let title = raw
            .title
            .as_deref()
            .or(raw.title_short.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .ok_or_else(|| reject(&raw, "missing title"))?;

        let stem = match raw.filename.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(reject(&raw, "missing filename")),
        };

        let audio_files = glob_parts(&self.source_root, &stem, &self.audio_extension);
        if audio_files.is_empty() {
            return Err(reject(&raw, "no audio files found on disk"));
        }

        let cover = self.probe_cover(&stem).await;

        let mut payload = audio_files.clone();
        if let Some(ref cover) = cover {
            payload.push(cover.clone());
        }
        let stats = stat_parts(&payload)
            .await
            .map_err(|e| reject(&raw, &format!("cannot stat payload files: {}", e)))?;

        let mut book = SourceBook {
            id,
            title,
            authors: split_names(raw.author.as_deref().unwrap_or_default()),
            narrators: split_names(raw.narrated_by.as_deref().unwrap_or_default()),
            series: raw
                .series_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            series_index: raw
                .series_sequence
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            purchase_date: raw.purchase_date.as_deref().and_then(parse_export_date),
            description: raw.summary.unwrap_or_default(),
            cover,
            audio_files,
            fingerprint: Default::default(),
        };

        book.seal_fingerprint(&stats);
        Ok(book)
    }
}

#[async_trait]
impl LibraryReader for OpenAudibleReader {
    fn name(&self) -> &str {
        "openaudible"
    }

    async fn read_books(&self) -> Result<ReadOutcome, ReaderError> {
        let content = tokio::fs::read_to_string(&self.export_path)
            .await
            .map_err(|e| {
                ReaderError::MalformedLibrary(format!(
                    "cannot read {}: {}",
                    self.export_path.display(),
                    e
                ))
            })?;

        let raw_books: Vec<RawBook> = serde_json::from_str(&content).map_err(|e| {
            ReaderError::MalformedLibrary(format!(
                "cannot parse {}: {}",
                self.export_path.display(),
                e
            ))
        })?;

        debug!(count = raw_books.len(), "Parsed OpenAudible export");

        let mut outcome = ReadOutcome::default();
        for raw in raw_books {
            match self.convert(raw).await {
                Ok(book) => outcome.books.push(book),
                Err(reject) => outcome.rejects.push(reject),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_export(temp: &TempDir, books: serde_json::Value) -> OpenAudibleReader {
        let base = temp.path();
        let export = base.join("books.json");
        std::fs::write(&export, serde_json::to_string(&books).unwrap()).unwrap();

        let source_root = base.join("books");
        std::fs::create_dir_all(&source_root).unwrap();

        OpenAudibleReader::new(export, source_root, ".m4b".to_string())
    }

    #[tokio::test]
    async fn test_reads_complete_book() {
        let temp = TempDir::new().unwrap();
        let reader = write_export(
            &temp,
            serde_json::json!([{
                "asin": "B001",
                "title": "First Book",
                "author": "Jane Doe, John Smith",
                "narrated_by": "Sam Reader",
                "summary": "A story.",
                "series_name": "The Saga",
                "series_sequence": "1",
                "filename": "First Book",
                "purchase_date": "2024-03-15",
                "unknown_field": 42
            }]),
        );
        std::fs::write(temp.path().join("books/First Book.m4b"), b"audio").unwrap();

        let outcome = reader.read_books().await.unwrap();
        assert_eq!(outcome.books.len(), 1);
        assert!(outcome.rejects.is_empty());

        let book = &outcome.books[0];
        assert_eq!(book.id, "B001");
        assert_eq!(book.authors, vec!["Jane Doe", "John Smith"]);
        assert_eq!(book.series.as_deref(), Some("The Saga"));
        assert_eq!(book.audio_files.len(), 1);
        assert!(!book.fingerprint.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_missing_title_rejects_without_aborting() {
        let temp = TempDir::new().unwrap();
        let reader = write_export(
            &temp,
            serde_json::json!([
                {"asin": "B001", "filename": "No Title"},
                {"asin": "B002", "title": "Good Book", "author": "Jane Doe", "filename": "Good Book"}
            ]),
        );
        std::fs::write(temp.path().join("books/Good Book.m4b"), b"audio").unwrap();

        let outcome = reader.read_books().await.unwrap();
        assert_eq!(outcome.books.len(), 1);
        assert_eq!(outcome.rejects.len(), 1);
        assert_eq!(outcome.rejects[0].reason, "missing title");
    }

    #[tokio::test]
    async fn test_missing_audio_rejects() {
        let temp = TempDir::new().unwrap();
        let reader = write_export(
            &temp,
            serde_json::json!([{"asin": "B001", "title": "Ghost", "filename": "Ghost"}]),
        );

        let outcome = reader.read_books().await.unwrap();
        assert!(outcome.books.is_empty());
        assert_eq!(outcome.rejects[0].reason, "no audio files found on disk");
    }

    #[tokio::test]
    async fn test_garbage_export_is_malformed() {
        let temp = TempDir::new().unwrap();
        let export = temp.path().join("books.json");
        std::fs::write(&export, "{{{{").unwrap();

        let reader = OpenAudibleReader::new(
            export,
            temp.path().join("books"),
            ".m4b".to_string(),
        );

        let result = reader.read_books().await;
        assert!(matches!(result, Err(ReaderError::MalformedLibrary(_))));
    }

    #[tokio::test]
    async fn test_rereading_is_stable() {
        let temp = TempDir::new().unwrap();
        let reader = write_export(
            &temp,
            serde_json::json!([{"asin": "B001", "title": "Book", "author": "Jane", "filename": "Book"}]),
        );
        std::fs::write(temp.path().join("books/Book.m4b"), b"audio").unwrap();

        let first = reader.read_books().await.unwrap();
        let second = reader.read_books().await.unwrap();

        assert_eq!(first.books.len(), second.books.len());
        assert_eq!(first.books[0].fingerprint, second.books[0].fingerprint);
    }
}
