//! Sidecar metadata writer.
//!
//! Serializes a book's descriptive metadata into the file the destination
//! server scans: AudioBookShelf's `metadata.json`, or an OPF 2.0 package
//! document. Output is byte-stable for identical metadata (fixed field
//! order, no embedded timestamps) and writes are atomic (temp + rename).

use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::SidecarFormat;
use crate::domain::SourceBook;

/// Descriptive metadata in the shape AudioBookShelf's scanner reads.
///
/// Field order here is the serialization order; keep it fixed.
#[derive(Debug, Clone, Serialize)]
pub struct BookMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub narrators: Vec<String>,
    /// "Series Name #index" entries, the server's series notation
    pub series: Vec<String>,
    pub description: String,
    pub asin: String,
}

impl BookMetadata {
    pub fn from_book(book: &SourceBook) -> Self {
        let series = match (&book.series, &book.series_index) {
            (Some(name), Some(index)) => vec![format!("{} #{}", name, index)],
            (Some(name), None) => vec![name.clone()],
            _ => Vec::new(),
        };

        Self {
            title: book.title.clone(),
            authors: book.authors.clone(),
            narrators: book.narrators.clone(),
            series,
            description: book.description.clone(),
            asin: book.id.clone(),
        }
    }

    /// Render as AudioBookShelf `metadata.json`.
    pub fn render_json(&self) -> String {
        let mut out = serde_json::to_string_pretty(self).unwrap_or_default();
        out.push('\n');
        out
    }

    /// Render as a minimal OPF 2.0 package document.
    pub fn render_opf(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<package version=\"2.0\" xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"BookId\">\n");
        out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n");

        out.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_xml(&self.title)));
        for author in &self.authors {
            out.push_str(&format!(
                "    <dc:creator opf:role=\"aut\">{}</dc:creator>\n",
                escape_xml(author)
            ));
        }
        for narrator in &self.narrators {
            out.push_str(&format!(
                "    <dc:contributor opf:role=\"nrt\">{}</dc:contributor>\n",
                escape_xml(narrator)
            ));
        }
        if !self.description.is_empty() {
            out.push_str(&format!(
                "    <dc:description>{}</dc:description>\n",
                escape_xml(&self.description)
            ));
        }
        out.push_str(&format!(
            "    <dc:identifier opf:scheme=\"ASIN\">{}</dc:identifier>\n",
            escape_xml(&self.asin)
        ));
        for entry in &self.series {
            let (name, index) = match entry.rsplit_once(" #") {
                Some((name, index)) => (name, Some(index)),
                None => (entry.as_str(), None),
            };
            out.push_str(&format!(
                "    <meta name=\"calibre:series\" content=\"{}\"/>\n",
                escape_xml(name)
            ));
            if let Some(index) = index {
                out.push_str(&format!(
                    "    <meta name=\"calibre:series_index\" content=\"{}\"/>\n",
                    escape_xml(index)
                ));
            }
        }

        out.push_str("  </metadata>\n");
        out.push_str("</package>\n");
        out
    }
}

/// Sidecar file name for a format.
pub fn sidecar_name(format: SidecarFormat) -> &'static str {
    match format {
        SidecarFormat::Json => "metadata.json",
        SidecarFormat::Opf => "metadata.opf",
    }
}

/// Write the sidecar into `abs_dir`, atomically. Returns the file name.
pub async fn write_sidecar(
    abs_dir: &Path,
    book: &SourceBook,
    format: SidecarFormat,
) -> std::io::Result<&'static str> {
    let metadata = BookMetadata::from_book(book);
    let content = match format {
        SidecarFormat::Json => metadata.render_json(),
        SidecarFormat::Opf => metadata.render_opf(),
    };

    let name = sidecar_name(format);
    let tmp_path = abs_dir.join(format!("{}.partial", name));

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, abs_dir.join(name)).await?;
    Ok(name)
}

/// Escape text for XML content and attribute positions, dropping control
/// characters the format cannot represent.
fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}
