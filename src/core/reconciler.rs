//! The orchestration core.
//!
//! Diffs the source library against the state store, classifies every book
//! as create/update/skip/orphan, and drives the per-book pipeline:
//! normalize path → materialize files → write sidecar → record manifest.
//! That ordering is the recoverability invariant: a crash mid-book leaves
//! no manifest record, so the book is simply reprocessed next run.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::reader_for;
use crate::config::{OrphanPolicy, PlacementMode, SourceKind, SyncConfig};
use crate::domain::{
    ManifestRecord, OrphanDisposition, OrphanReport, PlannedAction, RunSummary, SourceBook,
    SyncAction, TargetEntry,
};

use super::materializer::Materializer;
use super::paths;
use super::sidecar;
use super::store::StateStore;

/// One book's worth of work, resolved during classification.
struct BookJob {
    book: SourceBook,
    action: SyncAction,
    rel_dir: PathBuf,
    previous: Option<TargetEntry>,
}

/// Orchestrates a full sync run.
pub struct Reconciler {
    config: Arc<SyncConfig>,
}

impl Reconciler {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Execute the sync. Book-level failures land in the summary; only
    /// run-level problems (malformed source, lock contention, corrupt
    /// store) return an error, and those abort before any file mutation.
    #[instrument(skip(self, cancel), fields(source = %self.config.source_kind))]
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> Result<RunSummary> {
        self.config.validate()?;

        let mut summary = RunSummary::begin(self.config.dry_run);
        info!(run_id = %summary.run_id, dry_run = self.config.dry_run, "Starting library sync");

        // Read-only pass over the source; fatal if the export is unusable.
        let reader = reader_for(&self.config);
        let outcome = reader
            .read_books()
            .await
            .with_context(|| format!("reading {} library", reader.name()))?;

        for reject in outcome.rejects {
            warn!(
                id = reject.id.as_deref().unwrap_or("?"),
                reason = %reject.reason,
                "Excluding book with missing fields"
            );
            summary.record_failure(
                reject.id.unwrap_or_else(|| "unknown".to_string()),
                reject.title.unwrap_or_else(|| "Unknown Book".to_string()),
                reject.reason,
            );
        }

        let store = StateStore::open(&self.config.manifest_path, self.config.rebuild_manifest)
            .await
            .context("opening state store")?;

        let (jobs, orphan_ids) = self.classify(&store, outcome.books, &mut summary);

        if self.config.dry_run {
            return Ok(self.finish_dry_run(summary, jobs, orphan_ids, &store));
        }

        let store = Arc::new(Mutex::new(store));
        self.dispatch(jobs, &store, &cancel, &mut summary).await;
        self.handle_orphans(orphan_ids, &store, &cancel, &mut summary)
            .await;

        store
            .lock()
            .await
            .flush()
            .await
            .context("flushing state store")?;

        summary.finish();
        info!(
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            orphaned = summary.orphaned,
            failed = summary.failed(),
            "Run complete"
        );
        Ok(summary)
    }

    /// Classify every book and resolve its target path.
    ///
    /// Runs inline (no file I/O) and in source order, so path claims, and
    /// therefore collision suffixes, are deterministic across runs.
    fn classify(
        &self,
        store: &StateStore,
        books: Vec<SourceBook>,
        summary: &mut RunSummary,
    ) -> (Vec<BookJob>, Vec<String>) {
        let mut jobs = Vec::new();
        let mut current_ids: HashSet<String> = HashSet::new();

        // Paths already owned by a source identifier, per the manifest.
        let mut claimed: HashMap<PathBuf, String> = store
            .records()
            .iter()
            .map(|(id, record)| (record.entry.dir.clone(), id.clone()))
            .collect();

        for book in books {
            current_ids.insert(book.id.clone());
            let record = store.get(&book.id);

            let action = match record {
                None => {
                    if self.outside_purchase_window(&book) {
                        debug!(id = %book.id, "Outside the purchase window; skipping");
                        summary.skipped += 1;
                        continue;
                    }
                    SyncAction::Create
                }
                Some(record) if record.fingerprint() != &book.fingerprint => SyncAction::Update,
                Some(_) => {
                    debug!(id = %book.id, "Fingerprint unchanged; skipping");
                    summary.skipped += 1;
                    continue;
                }
            };

            let mut rel_dir = paths::normalize(
                book.primary_author(),
                book.series.as_deref(),
                book.series_index.as_deref(),
                &book.title,
            );
            if let Some(owner) = claimed.get(&rel_dir) {
                if owner != &book.id {
                    rel_dir = paths::disambiguate(&rel_dir, &book.id);
                }
            }
            claimed.insert(rel_dir.clone(), book.id.clone());

            jobs.push(BookJob {
                previous: record.map(|r| r.entry.clone()),
                book,
                action,
                rel_dir,
            });
        }

        let orphan_ids: Vec<String> = store
            .records()
            .keys()
            .filter(|id| !current_ids.contains(*id))
            .cloned()
            .collect();

        (jobs, orphan_ids)
    }

    fn outside_purchase_window(&self, book: &SourceBook) -> bool {
        let Some(days) = self.config.purchased_within_days else {
            return false;
        };
        let Some(purchased) = book.purchase_date else {
            return false;
        };

        let cutoff = chrono::Utc::now().date_naive() - chrono::Duration::days(days as i64);
        purchased < cutoff
    }

    /// Report what a real run would do, touching nothing.
    fn finish_dry_run(
        &self,
        mut summary: RunSummary,
        jobs: Vec<BookJob>,
        orphan_ids: Vec<String>,
        store: &StateStore,
    ) -> RunSummary {
        for job in jobs {
            match job.action {
                SyncAction::Create => summary.created += 1,
                SyncAction::Update => summary.updated += 1,
                _ => {}
            }
            summary.planned.push(PlannedAction {
                source_id: job.book.id,
                title: job.book.title,
                action: job.action,
                dir: Some(job.rel_dir),
            });
        }

        for id in orphan_ids {
            summary.orphaned += 1;
            summary.planned.push(PlannedAction {
                dir: store.get(&id).map(|r| r.entry.dir.clone()),
                source_id: id,
                title: String::new(),
                action: SyncAction::Orphan,
            });
        }

        summary.finish();
        info!(
            planned = summary.planned.len(),
            "Dry run complete; nothing was modified"
        );
        summary
    }

    /// Run create/update jobs on a bounded worker pool.
    async fn dispatch(
        &self,
        jobs: Vec<BookJob>,
        store: &Arc<Mutex<StateStore>>,
        cancel: &watch::Receiver<bool>,
        summary: &mut RunSummary,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut workers: JoinSet<(String, String, SyncAction, Result<()>)> = JoinSet::new();

        for job in jobs {
            // No new dispatches once cancellation is requested; in-flight
            // books finish or roll back on their own.
            if *cancel.borrow() {
                warn!(id = %job.book.id, "Cancelled before dispatch");
                summary.record_failure(
                    job.book.id,
                    job.book.title,
                    "cancelled before dispatch".to_string(),
                );
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed; cannot happen in practice
            };

            // The permit wait can span a cancellation request.
            if *cancel.borrow() {
                warn!(id = %job.book.id, "Cancelled before dispatch");
                summary.record_failure(
                    job.book.id,
                    job.book.title,
                    "cancelled before dispatch".to_string(),
                );
                continue;
            }

            let config = Arc::clone(&self.config);
            let store = Arc::clone(store);
            let id = job.book.id.clone();
            let title = job.book.title.clone();
            let action = job.action;

            workers.spawn(async move {
                let _permit = permit;
                let result = process_book(&config, &store, &job).await;
                (id, title, action, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((id, title, action, Ok(()))) => {
                    info!(%id, %title, %action, "Book synced");
                    summary.record_completed(id, title, action);
                }
                Ok((id, title, _, Err(e))) => {
                    error!(%id, %title, error = %format!("{:#}", e), "Book failed");
                    summary.record_failure(id, title, format!("{:#}", e));
                }
                Err(join_error) => {
                    error!(error = %join_error, "Worker panicked");
                    summary.record_failure(
                        "unknown".to_string(),
                        "Unknown Book".to_string(),
                        format!("worker panicked: {}", join_error),
                    );
                }
            }
        }
    }

    /// Apply the configured orphan policy. Classification is inline; only
    /// move-aside/delete touch the filesystem.
    async fn handle_orphans(
        &self,
        orphan_ids: Vec<String>,
        store: &Arc<Mutex<StateStore>>,
        cancel: &watch::Receiver<bool>,
        summary: &mut RunSummary,
    ) {
        for id in orphan_ids {
            if *cancel.borrow() {
                warn!("Cancelled before orphan handling finished");
                break;
            }

            let Some(record) = store.lock().await.get(&id).cloned() else {
                continue;
            };
            let dir = record.entry.dir.clone();

            match self.settle_orphan(&id, &record, store).await {
                Ok(disposition) => {
                    summary.orphaned += 1;
                    summary.orphans.push(OrphanReport {
                        source_id: id,
                        dir,
                        disposition,
                    });
                }
                Err(e) => {
                    error!(%id, error = %format!("{:#}", e), "Orphan handling failed");
                    summary.record_failure(id, String::new(), format!("{:#}", e));
                }
            }
        }
    }

    async fn settle_orphan(
        &self,
        id: &str,
        record: &ManifestRecord,
        store: &Arc<Mutex<StateStore>>,
    ) -> Result<OrphanDisposition> {
        let abs_dir = self.config.target_root.join(&record.entry.dir);

        match self.config.on_orphan {
            OrphanPolicy::Flag => {
                warn!(%id, dir = %record.entry.dir.display(), "Book vanished from the source");
                Ok(OrphanDisposition::Flagged)
            }
            OrphanPolicy::MoveAside => {
                let aside = self
                    .config
                    .target_root
                    .join("_orphaned")
                    .join(&record.entry.dir);
                if let Some(parent) = aside.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("creating orphan holding area")?;
                }
                if tokio::fs::try_exists(&abs_dir).await? {
                    tokio::fs::rename(&abs_dir, &aside)
                        .await
                        .context("moving orphan aside")?;
                }
                store
                    .lock()
                    .await
                    .remove_record(id)
                    .await
                    .context("clearing orphan record")?;
                info!(%id, to = %aside.display(), "Moved orphan aside");
                Ok(OrphanDisposition::MovedAside)
            }
            OrphanPolicy::Delete => {
                if tokio::fs::try_exists(&abs_dir).await? {
                    tokio::fs::remove_dir_all(&abs_dir)
                        .await
                        .context("deleting orphaned book")?;
                }
                store
                    .lock()
                    .await
                    .remove_record(id)
                    .await
                    .context("clearing orphan record")?;
                info!(%id, dir = %record.entry.dir.display(), "Deleted orphaned book");
                Ok(OrphanDisposition::Deleted)
            }
        }
    }
}

/// The per-book pipeline: materialize → sidecar → manifest record.
///
/// The record is written last, only after everything else succeeded.
async fn process_book(
    config: &SyncConfig,
    store: &Arc<Mutex<StateStore>>,
    job: &BookJob,
) -> Result<()> {
    debug!(id = %job.book.id, dir = %job.rel_dir.display(), action = %job.action, "Processing book");

    let materializer = Materializer::new(config.mode, config.verify_checksums);
    let placed = materializer
        .materialize(
            &job.book,
            &config.target_root,
            &job.rel_dir,
            job.previous.as_ref(),
        )
        .await
        .context("placing payload files")?;

    let abs_dir = config.target_root.join(&job.rel_dir);
    let sidecar_name = sidecar::write_sidecar(&abs_dir, &job.book, config.sidecar)
        .await
        .context("writing metadata sidecar")?;

    if config.libation_cleanup
        && config.mode == PlacementMode::Move
        && config.source_kind == SourceKind::Libation
    {
        cleanup_libation_folder(config, &job.book).await;
    }

    let entry = TargetEntry {
        dir: job.rel_dir.clone(),
        sidecar: job.rel_dir.join(sidecar_name),
        audio_files: placed.audio,
        cover: placed.cover,
        fingerprint: job.book.fingerprint.clone(),
    };

    store
        .lock()
        .await
        .record_success(&job.book.id, ManifestRecord::new(entry))
        .await
        .context("recording manifest entry")?;

    Ok(())
}

/// Remove Libation's per-book source folder once its contents moved out.
async fn cleanup_libation_folder(config: &SyncConfig, book: &SourceBook) {
    let Some(folder) = book.audio_files.first().and_then(|f| f.parent()) else {
        return;
    };
    // Never remove the source root itself.
    if folder == config.source_root {
        return;
    }

    match tokio::fs::remove_dir_all(folder).await {
        Ok(()) => debug!(folder = %folder.display(), "Removed emptied Libation book folder"),
        Err(e) => warn!(folder = %folder.display(), error = %e, "Could not remove Libation book folder"),
    }
}
