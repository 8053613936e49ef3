//! Command-line interface for shelfsync.
//!
//! Provides commands for running a sync, inspecting the resolved
//! configuration, and listing the manifest. This layer only builds the
//! configuration struct and renders the run summary; all sync logic lives
//! in the core.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::debug;

use crate::adapters::BookshelfClient;
use crate::config::{
    load_settings_file, OrphanPolicy, PlacementMode, SidecarFormat, SourceKind, SyncConfig,
    SyncOverrides,
};
use crate::core::{Reconciler, StateStore};
use crate::domain::RunSummary;

/// shelfsync - reconcile audiobook exports into an AudioBookShelf library
#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize the source library into the target tree
    Sync {
        /// Source tool that produced the export
        #[arg(long, value_enum)]
        source: Option<SourceArg>,

        /// Directory holding the source audio files
        #[arg(long, env = "SHELFSYNC_SOURCE_ROOT")]
        source_root: Option<PathBuf>,

        /// The source tool's metadata export (books.json or Libation's list)
        #[arg(long, env = "SHELFSYNC_EXPORT")]
        export: Option<PathBuf>,

        /// Destination library root
        #[arg(long, env = "SHELFSYNC_TARGET_ROOT")]
        target_root: Option<PathBuf>,

        /// Manifest location (defaults to <target>/.shelfsync/manifest.json)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// How files reach the target
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// What to do with books that vanished from the source
        #[arg(long, value_enum)]
        on_orphan: Option<OrphanArg>,

        /// Sidecar metadata format
        #[arg(long, value_enum)]
        sidecar: Option<SidecarArg>,

        /// Audio file extension to look for
        #[arg(long)]
        audio_extension: Option<String>,

        /// Compute and report actions without touching the filesystem
        #[arg(long)]
        dry_run: bool,

        /// Parallel book workers (defaults to available cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Skip post-transfer checksum verification
        #[arg(long)]
        no_verify: bool,

        /// Only import books purchased within this many days
        #[arg(long)]
        purchased_within_days: Option<u32>,

        /// Remove Libation's per-book folder after a successful move
        #[arg(long)]
        libation_cleanup: bool,

        /// Confirm destructive settings (move mode, orphan deletion)
        #[arg(long)]
        yes_destructive: bool,

        /// Start from an empty manifest if the existing one is corrupt
        #[arg(long)]
        rebuild_manifest: bool,

        /// YAML config file providing defaults for the flags above
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip notifying the configured AudioBookShelf server
        #[arg(long)]
        no_notify: bool,
    },

    /// Show the resolved configuration
    Config {
        /// YAML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List manifest records
    Manifest {
        /// Target library root (locates the default manifest)
        #[arg(long, env = "SHELFSYNC_TARGET_ROOT")]
        target_root: Option<PathBuf>,

        /// Manifest location override
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

/// CLI mirror of [`SourceKind`]
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Openaudible,
    Libation,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Openaudible => SourceKind::OpenAudible,
            SourceArg::Libation => SourceKind::Libation,
        }
    }
}

/// CLI mirror of [`PlacementMode`]
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Copy,
    Move,
    Hardlink,
}

impl From<ModeArg> for PlacementMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Copy => PlacementMode::Copy,
            ModeArg::Move => PlacementMode::Move,
            ModeArg::Hardlink => PlacementMode::Hardlink,
        }
    }
}

/// CLI mirror of [`OrphanPolicy`]
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OrphanArg {
    Flag,
    MoveAside,
    Delete,
}

impl From<OrphanArg> for OrphanPolicy {
    fn from(arg: OrphanArg) -> Self {
        match arg {
            OrphanArg::Flag => OrphanPolicy::Flag,
            OrphanArg::MoveAside => OrphanPolicy::MoveAside,
            OrphanArg::Delete => OrphanPolicy::Delete,
        }
    }
}

/// CLI mirror of [`SidecarFormat`]
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SidecarArg {
    Json,
    Opf,
}

impl From<SidecarArg> for SidecarFormat {
    fn from(arg: SidecarArg) -> Self {
        match arg {
            SidecarArg::Json => SidecarFormat::Json,
            SidecarArg::Opf => SidecarFormat::Opf,
        }
    }
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Sync {
                source,
                source_root,
                export,
                target_root,
                manifest,
                mode,
                on_orphan,
                sidecar,
                audio_extension,
                dry_run,
                workers,
                no_verify,
                purchased_within_days,
                libation_cleanup,
                yes_destructive,
                rebuild_manifest,
                config,
                no_notify,
            } => {
                let overrides = SyncOverrides {
                    source_kind: source.map(Into::into),
                    source_root,
                    export_path: export,
                    audio_extension,
                    target_root,
                    manifest_path: manifest,
                    mode: mode.map(Into::into),
                    on_orphan: on_orphan.map(Into::into),
                    dry_run,
                    workers,
                    no_verify,
                    sidecar: sidecar.map(Into::into),
                    purchased_within_days,
                    libation_cleanup,
                    confirm_destructive: yes_destructive,
                    rebuild_manifest,
                };

                let settings = config.as_ref().map(load_settings_file).transpose()?;
                let config = SyncConfig::resolve(overrides, settings)?;

                execute_sync(config, no_notify).await
            }

            Commands::Config { config } => execute_config(config),

            Commands::Manifest {
                target_root,
                manifest,
                limit,
            } => execute_manifest_list(target_root, manifest, limit).await,
        }
    }
}

/// Run the reconciler with Ctrl-C wired to graceful cancellation.
async fn execute_sync(config: SyncConfig, no_notify: bool) -> Result<()> {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received; letting in-flight books finish...");
            let _ = cancel_tx.send(true);
        }
    });

    let server = config.server.clone();
    let dry_run = config.dry_run;

    let reconciler = Reconciler::new(config);
    let summary = reconciler.run(cancel_rx).await?;

    print_summary(&summary);

    if let Some(server) = server {
        if !dry_run && !no_notify && !summary.completed.is_empty() {
            BookshelfClient::new(&server)
                .notify_completed(&summary.completed)
                .await;
        }
    } else {
        debug!("No server configured; the destination will pick books up on its own scan schedule");
    }

    if summary.has_failures() {
        anyhow::bail!("{} book(s) failed; see summary above", summary.failed());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.dry_run {
        println!("Dry run {} (no changes made)", summary.run_id);
    } else {
        println!("Run {}", summary.run_id);
    }
    println!(
        "  created: {}  updated: {}  skipped: {}  orphaned: {}  failed: {}",
        summary.created,
        summary.updated,
        summary.skipped,
        summary.orphaned,
        summary.failed()
    );

    if !summary.planned.is_empty() {
        println!("\nPlanned actions:");
        for plan in &summary.planned {
            match &plan.dir {
                Some(dir) => println!("  {:7} {} -> {}", plan.action.to_string(), plan.source_id, dir.display()),
                None => println!("  {:7} {}", plan.action.to_string(), plan.source_id),
            }
        }
    }

    if !summary.orphans.is_empty() {
        println!("\nOrphans:");
        for orphan in &summary.orphans {
            println!(
                "  {} ({:?}) {}",
                orphan.source_id,
                orphan.disposition,
                orphan.dir.display()
            );
        }
    }

    if !summary.failures.is_empty() {
        println!("\nFailures:");
        for failure in &summary.failures {
            println!("  {} {}: {}", failure.source_id, failure.title, failure.reason);
        }
    }
}

/// Show the configuration a sync would run with.
fn execute_config(config_path: Option<PathBuf>) -> Result<()> {
    let settings = config_path.as_ref().map(load_settings_file).transpose()?;

    match SyncConfig::resolve(SyncOverrides::default(), settings) {
        Ok(config) => {
            println!("source:   {} ({})", config.source_root.display(), config.source_kind);
            println!("export:   {}", config.export_path.display());
            println!("target:   {}", config.target_root.display());
            println!("manifest: {}", config.manifest_path.display());
            println!("mode:     {}", config.mode);
            println!("orphans:  {}", config.on_orphan);
            println!("workers:  {}", config.workers);
            println!(
                "server:   {}",
                config
                    .server
                    .as_ref()
                    .map(|s| s.url.as_str())
                    .unwrap_or("(none)")
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration incomplete: {}", e);
            Ok(())
        }
    }
}

/// List what the manifest knows about.
async fn execute_manifest_list(
    target_root: Option<PathBuf>,
    manifest: Option<PathBuf>,
    limit: usize,
) -> Result<()> {
    let manifest_path = manifest
        .or_else(|| target_root.as_deref().map(StateStore::default_path))
        .context("pass --manifest or --target-root to locate the manifest")?;

    let store = StateStore::open(&manifest_path, false).await?;

    if store.is_empty() {
        println!("Manifest is empty.");
        return Ok(());
    }

    println!("{} record(s) in {}", store.len(), manifest_path.display());
    for (id, record) in store.records().iter().take(limit) {
        println!(
            "  {}  {}  [{}]  {}",
            id,
            record.entry.dir.display(),
            record.fingerprint(),
            record.synced_at.format("%Y-%m-%d %H:%M")
        );
    }
    if store.len() > limit {
        println!("  ... and {} more", store.len() - limit);
    }

    Ok(())
}
