//! Path Collision Tests
//!
//! Two distinct books that normalize to the same target directory must
//! land in distinct, deterministically suffixed directories; silently
//! merging two books would corrupt both.

use std::collections::BTreeSet;

use shelfsync::config::{OrphanPolicy, PlacementMode, SidecarFormat, SourceKind, SyncConfig};
use shelfsync::core::{Reconciler, StateStore};
use shelfsync::domain::RunSummary;
use tempfile::TempDir;
use tokio::sync::watch;

fn test_config(temp: &TempDir) -> SyncConfig {
    SyncConfig {
        source_kind: SourceKind::OpenAudible,
        source_root: temp.path().join("src/books"),
        export_path: temp.path().join("src/books.json"),
        audio_extension: ".m4b".to_string(),
        target_root: temp.path().join("dst"),
        manifest_path: temp.path().join("dst/.shelfsync/manifest.json"),
        mode: PlacementMode::Copy,
        on_orphan: OrphanPolicy::Flag,
        dry_run: false,
        workers: 2,
        verify_checksums: true,
        sidecar: SidecarFormat::Json,
        purchased_within_days: None,
        libation_cleanup: false,
        confirm_destructive: false,
        rebuild_manifest: false,
        server: None,
    }
}

/// Two editions with identical title and author, distinct ASINs.
fn seed_colliding_books(temp: &TempDir) {
    std::fs::create_dir_all(temp.path().join("src/books")).unwrap();
    std::fs::write(
        temp.path().join("src/books.json"),
        serde_json::to_string(&serde_json::json!([
            {"asin": "B001", "title": "Untitled", "author": "Jane Doe", "filename": "edition-one"},
            {"asin": "B002", "title": "Untitled", "author": "Jane Doe", "filename": "edition-two"}
        ]))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(temp.path().join("src/books/edition-one.m4b"), b"one").unwrap();
    std::fs::write(temp.path().join("src/books/edition-two.m4b"), b"two").unwrap();
}

async fn run(config: SyncConfig) -> RunSummary {
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    Reconciler::new(config).run(cancel_rx).await.unwrap()
}

fn author_dirs(temp: &TempDir) -> BTreeSet<String> {
    std::fs::read_dir(temp.path().join("dst/Jane Doe"))
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_colliding_books_get_distinct_directories() {
    let temp = TempDir::new().unwrap();
    seed_colliding_books(&temp);

    let summary = run(test_config(&temp)).await;
    assert_eq!(summary.created, 2);
    assert!(!summary.has_failures());

    let dirs = author_dirs(&temp);
    assert_eq!(dirs.len(), 2, "dirs: {:?}", dirs);
    assert!(dirs.contains("Untitled"));
    assert!(dirs.contains("Untitled [B002]"));

    assert!(temp
        .path()
        .join("dst/Jane Doe/Untitled/edition-one.m4b")
        .exists());
    assert!(temp
        .path()
        .join("dst/Jane Doe/Untitled [B002]/edition-two.m4b")
        .exists());
}

#[tokio::test]
async fn test_both_collided_books_recorded_independently() {
    let temp = TempDir::new().unwrap();
    seed_colliding_books(&temp);
    run(test_config(&temp)).await;

    let store = StateStore::open(&temp.path().join("dst/.shelfsync/manifest.json"), false)
        .await
        .unwrap();

    assert_eq!(store.len(), 2);
    let dir_one = store.get("B001").unwrap().entry.dir.clone();
    let dir_two = store.get("B002").unwrap().entry.dir.clone();
    assert_ne!(dir_one, dir_two);
}

#[tokio::test]
async fn test_collision_suffix_is_stable_across_runs() {
    let temp = TempDir::new().unwrap();
    seed_colliding_books(&temp);

    run(test_config(&temp)).await;
    let dirs_before = author_dirs(&temp);

    let second = run(test_config(&temp)).await;
    assert_eq!(second.skipped, 2);
    assert_eq!(second.created, 0);

    // No third directory appeared; the suffix assignment is deterministic.
    assert_eq!(author_dirs(&temp), dirs_before);
}
