//! Core sync engine.
//!
//! - `reconciler`: classification and orchestration
//! - `materializer`: atomic file placement
//! - `sidecar`: metadata writer
//! - `store`: persistent manifest with run locking
//! - `paths`: target path normalization

pub mod materializer;
pub mod paths;
pub mod reconciler;
pub mod sidecar;
pub mod store;

pub use materializer::{MaterializeError, Materializer, PlacedFiles};
pub use reconciler::Reconciler;
pub use sidecar::BookMetadata;
pub use store::{StateStore, StoreError};
