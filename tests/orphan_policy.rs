//! Orphan Policy Tests
//!
//! A book removed from the source keeps its manifest record until a policy
//! says otherwise: flag reports it, move-aside relocates it, delete removes
//! it and clears the record.

use shelfsync::config::{OrphanPolicy, PlacementMode, SidecarFormat, SourceKind, SyncConfig};
use shelfsync::core::{Reconciler, StateStore};
use shelfsync::domain::{OrphanDisposition, RunSummary};
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

fn seed_two_books(temp: &TempDir) {
    std::fs::create_dir_all(temp.path().join("src/books")).unwrap();
    std::fs::write(
        temp.path().join("src/books.json"),
        serde_json::to_string(&serde_json::json!([
            {"asin": "B001", "title": "Keeper", "author": "Jane Doe", "filename": "Keeper"},
            {"asin": "B002", "title": "Goner", "author": "Jane Doe", "filename": "Goner"}
        ]))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(temp.path().join("src/books/Keeper.m4b"), b"keeper audio").unwrap();
    std::fs::write(temp.path().join("src/books/Goner.m4b"), b"goner audio").unwrap();
}

fn remove_goner_from_source(temp: &TempDir) {
    std::fs::write(
        temp.path().join("src/books.json"),
        serde_json::to_string(&serde_json::json!([
            {"asin": "B001", "title": "Keeper", "author": "Jane Doe", "filename": "Keeper"}
        ]))
        .unwrap(),
    )
    .unwrap();
}

async fn run(config: SyncConfig) -> RunSummary {
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    Reconciler::new(config).run(cancel_rx).await.unwrap()
}

async fn manifest_len(temp: &TempDir) -> usize {
    StateStore::open(&temp.path().join("dst/.shelfsync/manifest.json"), false)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_flag_reports_but_leaves_target_untouched() {
    let temp = TempDir::new().unwrap();
    seed_two_books(&temp);
    run(test_config(&temp)).await;

    remove_goner_from_source(&temp);
    let summary = run(test_config(&temp)).await;

    assert_eq!(summary.orphaned, 1);
    assert_eq!(summary.orphans[0].source_id, "B002");
    assert_eq!(summary.orphans[0].disposition, OrphanDisposition::Flagged);

    // Target and record both survive a flag.
    assert!(temp.path().join("dst/Jane Doe/Goner/Goner.m4b").exists());
    assert_eq!(manifest_len(&temp).await, 2);
}

#[tokio::test]
async fn test_move_aside_relocates_and_clears_record() {
    let temp = TempDir::new().unwrap();
    seed_two_books(&temp);
    run(test_config(&temp)).await;

    remove_goner_from_source(&temp);
    let mut config = test_config(&temp);
    config.on_orphan = OrphanPolicy::MoveAside;

    let summary = run(config).await;
    assert_eq!(summary.orphaned, 1);
    assert_eq!(summary.orphans[0].disposition, OrphanDisposition::MovedAside);

    assert!(!temp.path().join("dst/Jane Doe/Goner").exists());
    assert!(temp
        .path()
        .join("dst/_orphaned/Jane Doe/Goner/Goner.m4b")
        .exists());
    assert_eq!(manifest_len(&temp).await, 1);
}

#[tokio::test]
async fn test_delete_removes_target_and_record() {
    let temp = TempDir::new().unwrap();
    seed_two_books(&temp);
    run(test_config(&temp)).await;

    remove_goner_from_source(&temp);
    let mut config = test_config(&temp);
    config.on_orphan = OrphanPolicy::Delete;
    config.confirm_destructive = true;

    let summary = run(config).await;
    assert_eq!(summary.orphaned, 1);
    assert_eq!(summary.orphans[0].disposition, OrphanDisposition::Deleted);

    assert!(!temp.path().join("dst/Jane Doe/Goner").exists());
    assert!(temp.path().join("dst/Jane Doe/Keeper/Keeper.m4b").exists());
    assert_eq!(manifest_len(&temp).await, 1);

    // With the record cleared, the next run sees no orphan at all.
    let mut config = test_config(&temp);
    config.on_orphan = OrphanPolicy::Delete;
    config.confirm_destructive = true;
    let next = run(config).await;
    assert_eq!(next.orphaned, 0);
}

#[tokio::test]
async fn test_delete_without_confirmation_is_rejected() {
    let temp = TempDir::new().unwrap();
    seed_two_books(&temp);

    let mut config = test_config(&temp);
    config.on_orphan = OrphanPolicy::Delete;

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = Reconciler::new(config).run(cancel_rx).await;

    assert!(result.is_err());
    // Rejected before anything was placed.
    assert!(!temp.path().join("dst/Jane Doe").exists());
}
