//! Libation library reader.
//!
//! Libation organizes downloads as one `Title [asin]` folder per book and
//! exports its library as a JSON list of PascalCase records. The export
//! carries no file paths, so audio locations are reconstructed from the
//! folder convention.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{RejectedBook, SourceBook};

use super::{
    glob_parts, parse_export_date, split_names, stat_parts, LibraryReader, ReadOutcome,
    ReaderError,
};

/// Reader for a Libation exported book list.
pub struct LibationReader {
    export_path: PathBuf,
    source_root: PathBuf,
    audio_extension: String,
}

/// Raw record as Libation exports it (PascalCase keys, unknown keys
/// ignored).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBook {
    #[serde(default)]
    audible_product_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    author_names: Option<String>,
    #[serde(default)]
    narrator_names: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    series_names: Option<String>,
    #[serde(default)]
    series_order: Option<String>,
    #[serde(default)]
    date_added: Option<String>,
}

impl LibationReader {
    pub fn new(export_path: PathBuf, source_root: PathBuf, audio_extension: String) -> Self {
        Self {
            export_path,
            source_root,
            audio_extension,
        }
    }

    async fn convert(&self, raw: RawBook) -> Result<SourceBook, RejectedBook> {
        let reject = |raw: &RawBook, reason: &str| RejectedBook {
            id: raw.audible_product_id.clone(),
            title: raw.title.clone(),
            reason: reason.to_string(),
        };

        let id = match raw.audible_product_id.as_deref().map(str::trim) {
            Some(asin) if !asin.is_empty() => asin.to_string(),
            _ => return Err(reject(&raw, "missing AudibleProductId")),
        };

        let base_title = raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .ok_or_else(|| reject(&raw, "missing Title"))?;

        // Libation names the book folder "Title [asin]".
        let book_folder = self.source_root.join(format!("{} [{}]", base_title, id));

        let audio_files = glob_parts(&book_folder, "", &self.audio_extension);
        if audio_files.is_empty() {
            return Err(reject(&raw, "no audio files found in book folder"));
        }

        // Cover art is downloaded into the same folder as a jpg.
        let cover = glob_parts(&book_folder, "", ".jpg").into_iter().next();

        let mut payload = audio_files.clone();
        if let Some(ref cover) = cover {
            payload.push(cover.clone());
        }
        let stats = stat_parts(&payload)
            .await
            .map_err(|e| reject(&raw, &format!("cannot stat payload files: {}", e)))?;

        let title = match raw.subtitle.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(subtitle) => format!("{} - {}", base_title, subtitle),
            None => base_title,
        };

        let series_index = raw
            .series_order
            .as_deref()
            .and_then(|s| s.split_whitespace().next())
            .map(String::from);

        let mut book = SourceBook {
            id,
            title,
            authors: split_names(raw.author_names.as_deref().unwrap_or_default()),
            narrators: split_names(raw.narrator_names.as_deref().unwrap_or_default()),
            series: raw
                .series_names
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            series_index,
            purchase_date: raw.date_added.as_deref().and_then(parse_export_date),
            description: raw.description.unwrap_or_default(),
            cover,
            audio_files,
            fingerprint: Default::default(),
        };

        book.seal_fingerprint(&stats);
        Ok(book)
    }
}

#[async_trait]
impl LibraryReader for LibationReader {
    fn name(&self) -> &str {
        "libation"
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

        debug!(count = raw_books.len(), "Parsed Libation export");

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
