//! shelfsync - audiobook library reconciliation engine
//!
//! Converts an audiobook library exported by OpenAudible or Libation into
//! the directory and metadata layout AudioBookShelf scans.
//!
//! # Architecture
//!
//! The engine is built around idempotent reconciliation:
//! - Every synced book leaves a fingerprinted record in a manifest
//! - Each run diffs the source export against that manifest and only acts
//!   on new, changed, or vanished books
//! - Manifest records are written only after a book's files fully commit,
//!   so an interrupted run simply reprocesses the unfinished books
//!
//! # Modules
//!
//! - `adapters`: source-tool readers (OpenAudible, Libation) and the
//!   AudioBookShelf notifier
//! - `core`: reconciliation, file placement, sidecar writing, state store
//! - `domain`: data structures (SourceBook, TargetEntry, RunSummary)
//! - `config`: resolved run configuration
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Copy new and changed books into the library
//! shelfsync sync --source-root ~/OpenAudible/books --export ~/OpenAudible/books.json --target-root /srv/audiobooks
//!
//! # See what would happen first
//! shelfsync sync --target-root /srv/audiobooks --dry-run
//!
//! # Inspect the manifest
//! shelfsync manifest --target-root /srv/audiobooks
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::{OrphanPolicy, PlacementMode, SidecarFormat, SourceKind, SyncConfig};
pub use core::{Reconciler, StateStore};
pub use domain::{
    Fingerprint, ManifestRecord, RunSummary, SourceBook, SyncAction, TargetEntry,
};
