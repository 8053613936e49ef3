//! Atomic placement of a book's payload files.
//!
//! Placement is two-phase: every file is first staged under a `.partial`
//! name in the target directory, then renamed into place only once the
//! whole set is staged and verified. A failure anywhere removes the
//! staged temps, so an interrupted or failed book leaves nothing at a
//! final path.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::PlacementMode;
use crate::domain::{SourceBook, TargetEntry};

/// Suffix for staged files awaiting commit.
const STAGING_SUFFIX: &str = ".partial";

/// Errors from placing one book's files.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("source file missing: {0}")]
    MissingSource(PathBuf),

    /// Bytes on the target side do not match what was read from the source.
    #[error("integrity check failed for {path}: source {expected}, wrote {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("hard links need source and target on the same filesystem: {0}")]
    CrossDevice(PathBuf),

    #[error("file placement I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Target-relative locations of a book's placed payload.
#[derive(Debug, Clone)]
pub struct PlacedFiles {
    pub audio: Vec<PathBuf>,
    pub cover: Option<PathBuf>,
}

/// Places payload files according to the configured mode.
pub struct Materializer {
    mode: PlacementMode,
    verify_checksums: bool,
}

impl Materializer {
    pub fn new(mode: PlacementMode, verify_checksums: bool) -> Self {
        Self {
            mode,
            verify_checksums,
        }
    }

    /// Place a book's audio parts and cover under `target_root/rel_dir`.
    ///
    /// `previous` is the book's prior entry (update runs); files it owned
    /// that are not part of the new set are removed after the new set
    /// commits.
    pub async fn materialize(
        &self,
        book: &SourceBook,
        target_root: &Path,
        rel_dir: &Path,
        previous: Option<&TargetEntry>,
    ) -> Result<PlacedFiles, MaterializeError> {
        let abs_dir = target_root.join(rel_dir);
        fs::create_dir_all(&abs_dir).await?;

        // Plan final names: audio keeps its source file name, the cover is
        // renamed to the server's `cover.<ext>` convention.
        let mut plan: Vec<(PathBuf, String)> = Vec::new();
        for src in &book.audio_files {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| MaterializeError::MissingSource(src.clone()))?;
            plan.push((src.clone(), name));
        }
        if let Some(ref cover) = book.cover {
            let ext = cover
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "jpg".to_string());
            plan.push((cover.clone(), format!("cover.{}", ext)));
        }

        // Phase one: stage everything.
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        for (src, final_name) in &plan {
            let stage_path = abs_dir.join(format!("{}{}", final_name, STAGING_SUFFIX));
            if let Err(e) = self.stage(src, &stage_path).await {
                rollback(&staged).await;
                return Err(e);
            }
            staged.push((stage_path, abs_dir.join(final_name)));
        }

        // Phase two: commit.
        for (idx, (stage_path, final_path)) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(stage_path, final_path).await {
                rollback(&staged[idx..]).await;
                return Err(e.into());
            }
        }

        debug!(
            dir = %abs_dir.display(),
            files = plan.len(),
            "Committed payload files"
        );

        // Move mode frees the source only after the whole book committed.
        if self.mode == PlacementMode::Move {
            for (src, _) in &plan {
                if let Err(e) = fs::remove_file(src).await {
                    warn!(path = %src.display(), error = %e, "Could not remove moved source file");
                }
            }
        }

        let placed: Vec<PathBuf> = plan
            .iter()
            .map(|(_, name)| rel_dir.join(name))
            .collect();

        if let Some(previous) = previous {
            cleanup_previous(target_root, previous, &placed).await;
        }

        let cover = book
            .cover
            .is_some()
            .then(|| placed.last().cloned())
            .flatten();
        let audio = placed[..book.audio_files.len()].to_vec();

        Ok(PlacedFiles { audio, cover })
    }

    async fn stage(&self, src: &Path, stage_path: &Path) -> Result<(), MaterializeError> {
        if !fs::try_exists(src).await? {
            return Err(MaterializeError::MissingSource(src.to_path_buf()));
        }

        match self.mode {
            PlacementMode::Copy | PlacementMode::Move => {
                let source_digest = match copy_streaming(src, stage_path).await {
                    Ok(digest) => digest,
                    Err(e) => {
                        let _ = fs::remove_file(stage_path).await;
                        return Err(e.into());
                    }
                };

                if self.verify_checksums {
                    let written_digest = hash_file(stage_path).await?;
                    if written_digest != source_digest {
                        let _ = fs::remove_file(stage_path).await;
                        return Err(MaterializeError::Integrity {
                            path: stage_path.to_path_buf(),
                            expected: source_digest,
                            actual: written_digest,
                        });
                    }
                }
            }
            PlacementMode::Hardlink => {
                // A stale stage file from an interrupted run blocks link().
                if fs::try_exists(stage_path).await? {
                    fs::remove_file(stage_path).await?;
                }
                fs::hard_link(src, stage_path).await.map_err(|e| {
                    // EXDEV: link across filesystems
                    if e.raw_os_error() == Some(18) {
                        MaterializeError::CrossDevice(src.to_path_buf())
                    } else {
                        MaterializeError::Io(e)
                    }
                })?;
            }
        }

        Ok(())
    }
}

/// Stream-copy `src` to `dst`, returning the hex SHA-256 of the bytes read.
async fn copy_streaming(src: &Path, dst: &Path) -> std::io::Result<String> {
    let mut reader = fs::File::open(src).await?;
    let mut writer = fs::File::create(dst).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
    }

    writer.sync_all().await?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of a file's contents.
async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Remove staged temps after a failure. Best-effort: the temps carry the
/// staging suffix, so a leftover can never be mistaken for a final file.
async fn rollback(staged: &[(PathBuf, PathBuf)]) {
    for (stage_path, _) in staged {
        if let Err(e) = fs::remove_file(stage_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %stage_path.display(), error = %e, "Could not remove staged file");
            }
        }
    }
}

/// Remove files a previous entry owned that the new placement no longer
/// covers, then prune its directory if that leaves it empty.
async fn cleanup_previous(target_root: &Path, previous: &TargetEntry, placed: &[PathBuf]) {
    for rel in previous.files() {
        if placed.contains(&rel) {
            continue;
        }
        let abs = target_root.join(&rel);
        match fs::remove_file(&abs).await {
            Ok(()) => debug!(path = %abs.display(), "Removed superseded file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %abs.display(), error = %e, "Could not remove superseded file"),
        }
    }

    // An update that changed the book's directory leaves the old one empty.
    let old_dir = target_root.join(&previous.dir);
    let _ = fs::remove_dir(&old_dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Fingerprint;
    use tempfile::TempDir;

    fn book_with_files(id: &str, files: Vec<PathBuf>, cover: Option<PathBuf>) -> SourceBook {
        SourceBook {
            id: id.to_string(),
            title: "Test Book".to_string(),
            authors: vec!["Jane Doe".to_string()],
            narrators: Vec::new(),
            series: None,
            series_index: None,
            description: String::new(),
            cover,
            audio_files: files,
            purchase_date: None,
            fingerprint: Fingerprint::compute("meta", &[]),
        }
    }

    #[tokio::test]
    async fn test_copy_places_audio_and_cover() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        let target = temp.path().join("dst");
        std::fs::create_dir_all(&src_dir).unwrap();

        let audio = src_dir.join("Test Book.m4b");
        let cover = src_dir.join("Test Book.JPG");
        std::fs::write(&audio, b"audio-bytes").unwrap();
        std::fs::write(&cover, b"cover-bytes").unwrap();

        let book = book_with_files("B001", vec![audio.clone()], Some(cover));
        let materializer = Materializer::new(PlacementMode::Copy, true);

        let placed = materializer
            .materialize(&book, &target, Path::new("Jane Doe/Test Book"), None)
            .await
            .unwrap();

        assert_eq!(placed.audio.len(), 1);
        assert_eq!(
            placed.cover.as_deref(),
            Some(Path::new("Jane Doe/Test Book/cover.jpg"))
        );

        let final_audio = target.join("Jane Doe/Test Book/Test Book.m4b");
        assert_eq!(std::fs::read(final_audio).unwrap(), b"audio-bytes");
        // Source survives a copy.
        assert!(audio.exists());
    }

    #[tokio::test]
    async fn test_missing_part_rolls_back_staged_files() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        let target = temp.path().join("dst");
        std::fs::create_dir_all(&src_dir).unwrap();

        let part1 = src_dir.join("part1.m4b");
        std::fs::write(&part1, b"part one").unwrap();
        let part2 = src_dir.join("part2.m4b"); // never created

        let book = book_with_files("B002", vec![part1, part2], None);
        let materializer = Materializer::new(PlacementMode::Copy, true);

        let result = materializer
            .materialize(&book, &target, Path::new("Jane Doe/Test Book"), None)
            .await;
        assert!(matches!(result, Err(MaterializeError::MissingSource(_))));

        // No finals, no temps.
        let dir = target.join("Jane Doe/Test Book");
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .map(|entries| entries.filter_map(Result::ok).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_move_removes_source_after_commit() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        let target = temp.path().join("dst");
        std::fs::create_dir_all(&src_dir).unwrap();

        let audio = src_dir.join("book.m4b");
        std::fs::write(&audio, b"bytes").unwrap();

        let book = book_with_files("B003", vec![audio.clone()], None);
        let materializer = Materializer::new(PlacementMode::Move, true);

        materializer
            .materialize(&book, &target, Path::new("Jane Doe/Test Book"), None)
            .await
            .unwrap();

        assert!(!audio.exists());
        assert!(target.join("Jane Doe/Test Book/book.m4b").exists());
    }

    #[tokio::test]
    async fn test_hardlink_shares_content() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        let target = temp.path().join("dst");
        std::fs::create_dir_all(&src_dir).unwrap();

        let audio = src_dir.join("book.m4b");
        std::fs::write(&audio, b"linked bytes").unwrap();

        let book = book_with_files("B004", vec![audio.clone()], None);
        let materializer = Materializer::new(PlacementMode::Hardlink, false);

        materializer
            .materialize(&book, &target, Path::new("Jane Doe/Test Book"), None)
            .await
            .unwrap();

        let final_path = target.join("Jane Doe/Test Book/book.m4b");
        assert_eq!(std::fs::read(&final_path).unwrap(), b"linked bytes");
        assert!(audio.exists());
    }

    #[tokio::test]
    async fn test_update_removes_superseded_files() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("src");
        let target = temp.path().join("dst");
        std::fs::create_dir_all(&src_dir).unwrap();

        let rel_dir = Path::new("Jane Doe/Test Book");
        let abs_dir = target.join(rel_dir);
        std::fs::create_dir_all(&abs_dir).unwrap();
        std::fs::write(abs_dir.join("old-name.m4b"), b"old").unwrap();

        let previous = TargetEntry {
            dir: rel_dir.to_path_buf(),
            sidecar: rel_dir.join("metadata.json"),
            audio_files: vec![rel_dir.join("old-name.m4b")],
            cover: None,
            fingerprint: Fingerprint::compute("meta", &[]),
        };

        let audio = src_dir.join("new-name.m4b");
        std::fs::write(&audio, b"new").unwrap();
        let book = book_with_files("B005", vec![audio], None);

        let materializer = Materializer::new(PlacementMode::Copy, true);
        materializer
            .materialize(&book, &target, rel_dir, Some(&previous))
            .await
            .unwrap();

        assert!(!abs_dir.join("old-name.m4b").exists());
        assert!(abs_dir.join("new-name.m4b").exists());
    }
}
