//! Configuration for a sync run.
//!
//! Configuration sources (highest priority first):
//! 1. CLI flags (including their environment fallbacks)
//! 2. Config file (YAML, passed via `--config`)
//! 3. Defaults
//!
//! The engine itself only ever sees the resolved [`SyncConfig`]; argument
//! parsing stays in the CLI layer.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Which source tool produced the library export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// OpenAudible: flat audio folder plus a `books.json` export
    OpenAudible,

    /// Libation: per-book `Title [asin]` folders plus an exported book list
    Libation,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::OpenAudible => write!(f, "openaudible"),
            SourceKind::Libation => write!(f, "libation"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "openaudible" | "open-audible" => Ok(SourceKind::OpenAudible),
            "libation" => Ok(SourceKind::Libation),
            _ => Err(ConfigError::Invalid(format!("unknown source kind: {}", s))),
        }
    }
}

/// How payload files reach the target library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Duplicate the file, leaving the source intact (default)
    Copy,

    /// Relocate the file, freeing source space
    Move,

    /// Hard-link source and target (same filesystem only)
    Hardlink,
}

impl PlacementMode {
    /// Modes that alter the source library.
    pub fn is_destructive(&self) -> bool {
        matches!(self, PlacementMode::Move)
    }
}

impl std::fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementMode::Copy => write!(f, "copy"),
            PlacementMode::Move => write!(f, "move"),
            PlacementMode::Hardlink => write!(f, "hardlink"),
        }
    }
}

/// What to do with a manifest record whose book vanished from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Report it and leave the target untouched (default)
    Flag,

    /// Move the book's directory under `_orphaned/` in the target root
    MoveAside,

    /// Delete the book's directory and clear the record
    Delete,
}

impl OrphanPolicy {
    /// Policies that destroy target data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, OrphanPolicy::Delete)
    }
}

impl std::fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrphanPolicy::Flag => write!(f, "flag"),
            OrphanPolicy::MoveAside => write!(f, "move-aside"),
            OrphanPolicy::Delete => write!(f, "delete"),
        }
    }
}

/// Sidecar metadata format written next to each book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarFormat {
    /// AudioBookShelf `metadata.json` (default)
    Json,

    /// OPF 2.0 package document
    Opf,
}

/// Optional AudioBookShelf server to notify after a successful run.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Base URL, e.g. `http://abs.local:13378`
    pub url: String,

    /// API token with library access
    pub api_token: String,

    /// Library to scan/match against
    pub library_id: String,
}

/// Raw config file schema (matches YAML structure).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub server: Option<ServerSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSection {
    pub kind: Option<SourceKind>,
    /// Directory holding the audio payload
    pub root: Option<PathBuf>,
    /// The tool's metadata export (books.json or Libation's list)
    pub export: Option<PathBuf>,
    pub audio_extension: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetSection {
    pub root: Option<PathBuf>,
    /// Manifest location override
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncSection {
    pub mode: Option<PlacementMode>,
    pub on_orphan: Option<OrphanPolicy>,
    pub workers: Option<usize>,
    pub verify_checksums: Option<bool>,
    pub sidecar: Option<SidecarFormat>,
    /// Only import books purchased within this many days
    pub purchased_within_days: Option<u32>,
    /// Remove Libation's per-book source folder after a successful move
    pub libation_cleanup: Option<bool>,
}

/// CLI-provided values layered over the config file.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub source_kind: Option<SourceKind>,
    pub source_root: Option<PathBuf>,
    pub export_path: Option<PathBuf>,
    pub audio_extension: Option<String>,
    pub target_root: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub mode: Option<PlacementMode>,
    pub on_orphan: Option<OrphanPolicy>,
    pub dry_run: bool,
    pub workers: Option<usize>,
    pub no_verify: bool,
    pub sidecar: Option<SidecarFormat>,
    pub purchased_within_days: Option<u32>,
    pub libation_cleanup: bool,
    pub confirm_destructive: bool,
    pub rebuild_manifest: bool,
}

/// Configuration errors surfaced before any processing starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("{0} is destructive; pass --yes-destructive to confirm")]
    DestructiveUnconfirmed(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Unparseable {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Resolved configuration consumed by the reconciler.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_kind: SourceKind,
    pub source_root: PathBuf,
    pub export_path: PathBuf,
    pub audio_extension: String,
    pub target_root: PathBuf,
    pub manifest_path: PathBuf,
    pub mode: PlacementMode,
    pub on_orphan: OrphanPolicy,
    pub dry_run: bool,
    pub workers: usize,
    pub verify_checksums: bool,
    pub sidecar: SidecarFormat,
    pub purchased_within_days: Option<u32>,
    pub libation_cleanup: bool,
    pub confirm_destructive: bool,
    pub rebuild_manifest: bool,
    pub server: Option<ServerSettings>,
}

impl SyncConfig {
    /// Merge CLI overrides with an optional config file and defaults.
    pub fn resolve(
        overrides: SyncOverrides,
        file: Option<SettingsFile>,
    ) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let source_kind = overrides
            .source_kind
            .or(file.source.kind)
            .unwrap_or(SourceKind::OpenAudible);

        let (default_root, default_export) = default_source_paths(source_kind);

        let source_root = overrides
            .source_root
            .or(file.source.root)
            .or(default_root)
            .ok_or(ConfigError::MissingSetting("source.root"))?;

        let export_path = overrides
            .export_path
            .or(file.source.export)
            .or(default_export)
            .ok_or(ConfigError::MissingSetting("source.export"))?;

        let target_root = overrides
            .target_root
            .or(file.target.root)
            .ok_or(ConfigError::MissingSetting("target.root"))?;

        let manifest_path = overrides
            .manifest_path
            .or(file.target.manifest)
            .unwrap_or_else(|| crate::core::StateStore::default_path(&target_root));

        let workers = overrides
            .workers
            .or(file.sync.workers)
            .unwrap_or_else(default_workers);

        let config = Self {
            source_kind,
            source_root,
            export_path,
            audio_extension: overrides
                .audio_extension
                .or(file.source.audio_extension)
                .unwrap_or_else(|| ".m4b".to_string()),
            target_root,
            manifest_path,
            mode: overrides.mode.or(file.sync.mode).unwrap_or(PlacementMode::Copy),
            on_orphan: overrides
                .on_orphan
                .or(file.sync.on_orphan)
                .unwrap_or(OrphanPolicy::Flag),
            dry_run: overrides.dry_run,
            workers,
            verify_checksums: if overrides.no_verify {
                false
            } else {
                file.sync.verify_checksums.unwrap_or(true)
            },
            sidecar: overrides
                .sidecar
                .or(file.sync.sidecar)
                .unwrap_or(SidecarFormat::Json),
            purchased_within_days: overrides
                .purchased_within_days
                .or(file.sync.purchased_within_days),
            libation_cleanup: overrides.libation_cleanup
                || file.sync.libation_cleanup.unwrap_or(false),
            confirm_destructive: overrides.confirm_destructive,
            rebuild_manifest: overrides.rebuild_manifest,
            server: file.server,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would mutate data without explicit consent,
    /// before the store is even opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }

        if self.libation_cleanup && self.source_kind != SourceKind::Libation {
            return Err(ConfigError::Invalid(
                "libation_cleanup only applies to the libation source".into(),
            ));
        }

        if self.dry_run || self.confirm_destructive {
            return Ok(());
        }

        if self.mode.is_destructive() {
            return Err(ConfigError::DestructiveUnconfirmed(format!(
                "mode={}",
                self.mode
            )));
        }
        if self.on_orphan.is_destructive() {
            return Err(ConfigError::DestructiveUnconfirmed(format!(
                "on-orphan={}",
                self.on_orphan
            )));
        }
        if self.libation_cleanup {
            return Err(ConfigError::DestructiveUnconfirmed(
                "libation_cleanup".into(),
            ));
        }

        Ok(())
    }
}

/// Load and parse a YAML config file.
pub fn load_settings_file(path: &PathBuf) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.clone(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Unparseable {
        path: path.clone(),
        source,
    })
}

/// Conventional install locations, used when nothing else is configured.
fn default_source_paths(kind: SourceKind) -> (Option<PathBuf>, Option<PathBuf>) {
    let home = match dirs::home_dir() {
        Some(home) => home,
        None => return (None, None),
    };

    match kind {
        SourceKind::OpenAudible => {
            let base = home.join("OpenAudible");
            (Some(base.join("books")), Some(base.join("books.json")))
        }
        // Libation installs vary too much to guess.
        SourceKind::Libation => (None, None),
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
