//! Run classification and the structured report returned to the caller.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the reconciler classified one book for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// No manifest record exists for the source identifier
    Create,

    /// A record exists but its fingerprint no longer matches
    Update,

    /// A record exists and the fingerprint matches
    Skip,

    /// A record exists but the book is gone from the source
    Orphan,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Create => write!(f, "create"),
            SyncAction::Update => write!(f, "update"),
            SyncAction::Skip => write!(f, "skip"),
            SyncAction::Orphan => write!(f, "orphan"),
        }
    }
}

/// What happened to an orphaned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanDisposition {
    /// Left in place, reported only
    Flagged,

    /// Moved under the target's orphan holding area
    MovedAside,

    /// Removed from the target library
    Deleted,
}

/// One orphaned record observed this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanReport {
    /// Source identifier of the vanished book
    pub source_id: String,

    /// Its directory in the target library
    pub dir: PathBuf,

    /// What the configured policy did about it
    pub disposition: OrphanDisposition,
}

/// One book that failed during this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookFailure {
    /// Source identifier, when known
    pub source_id: String,

    /// Title, when known
    pub title: String,

    /// Why the book failed
    pub reason: String,
}

/// One book successfully created or updated this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedBook {
    /// Source identifier
    pub source_id: String,

    /// Title as it will appear in the destination server
    pub title: String,

    /// Create or Update
    pub action: SyncAction,
}

/// An action a dry run would have taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Source identifier
    pub source_id: String,

    /// Title
    pub title: String,

    /// Classification the real run would act on
    pub action: SyncAction,

    /// Target directory the book would land in
    pub dir: Option<PathBuf>,
}

/// Structured report for one run.
///
/// This is the sole interface back to the CLI/logging layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// Whether the run was a dry run (nothing touched)
    pub dry_run: bool,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if it has)
    pub finished_at: Option<DateTime<Utc>>,

    /// Books newly materialized
    pub created: usize,

    /// Books re-materialized after a fingerprint change
    pub updated: usize,

    /// Books left alone
    pub skipped: usize,

    /// Orphaned records observed
    pub orphaned: usize,

    /// Per-book failures, with reasons
    pub failures: Vec<BookFailure>,

    /// Per-orphan detail
    pub orphans: Vec<OrphanReport>,

    /// Books successfully created/updated (feeds the server notifier)
    pub completed: Vec<CompletedBook>,

    /// Dry-run detail: what a real run would have done
    pub planned: Vec<PlannedAction>,
}

impl RunSummary {
    /// Start a summary for a new run.
    pub fn begin(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            created: 0,
            updated: 0,
            skipped: 0,
            orphaned: 0,
            failures: Vec::new(),
            orphans: Vec::new(),
            completed: Vec::new(),
            planned: Vec::new(),
        }
    }

    /// Number of failed books.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Whether any book failed (drives the process exit status).
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Record a completed create/update.
    pub fn record_completed(&mut self, source_id: String, title: String, action: SyncAction) {
        match action {
            SyncAction::Create => self.created += 1,
            SyncAction::Update => self.updated += 1,
            _ => {}
        }
        self.completed.push(CompletedBook {
            source_id,
            title,
            action,
        });
    }

    /// Record a per-book failure.
    pub fn record_failure(&mut self, source_id: String, title: String, reason: String) {
        self.failures.push(BookFailure {
            source_id,
            title,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::begin(false);

        summary.record_completed("A1".into(), "Book One".into(), SyncAction::Create);
        summary.record_completed("A2".into(), "Book Two".into(), SyncAction::Update);
        summary.skipped += 1;
        summary.record_failure("A3".into(), "Book Three".into(), "checksum mismatch".into());

        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed(), 1);
        assert!(summary.has_failures());
        assert_eq!(summary.completed.len(), 2);
    }

    #[test]
    fn test_summary_serialization() {
        let mut summary = RunSummary::begin(true);
        summary.planned.push(PlannedAction {
            source_id: "A1".into(),
            title: "Book One".into(),
            action: SyncAction::Create,
            dir: Some(PathBuf::from("Jane Doe/Book One")),
        });
        summary.finish();

        let json = serde_json::to_string(&summary).unwrap();
        let parsed: RunSummary = serde_json::from_str(&json).unwrap();

        assert!(parsed.dry_run);
        assert_eq!(parsed.planned.len(), 1);
        assert!(parsed.finished_at.is_some());
    }
}
