//! Backup command - Reconcile the backup directory with Google Photos
//!
//! Provides the `gpbackup backup` CLI command which:
//! 1. Loads configuration and applies command-line overrides
//! 2. Opens the SQLite index under `<backup dir>/.data_store` (a dry run on a
//!    directory without one plans against an empty in-memory index)
//! 3. Obtains an access token from the keyring (refreshing it if needed)
//! 4. Runs the ReconciliationEngine, or only computes its plan with `--dry-run`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use gpbackup_core::config::{Config, MediaSelection};
use gpbackup_core::domain::DateRange;
use gpbackup_core::ports::{IBackupIndex, MediaFilter};
use gpbackup_index::{InMemoryBackupIndex, SqliteBackupIndex};
use gpbackup_photos::client::PhotosClient;
use gpbackup_photos::fetcher::HttpContentFetcher;
use gpbackup_photos::provider::GooglePhotosLibrary;
use gpbackup_sync::engine::{EngineOptions, ReconcilePlan, ReconciliationEngine, RunSummary};
use tracing::{error, info};

use super::{ensure_valid, load_config, photos_auth};
use crate::output::{count_label, format_duration_ms, get_formatter, OutputFormat, OutputFormatter};

/// Media types selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediaTypeArg {
    Photo,
    Video,
    All,
}

impl From<MediaTypeArg> for MediaSelection {
    fn from(arg: MediaTypeArg) -> Self {
        match arg {
            MediaTypeArg::Photo => MediaSelection::Photo,
            MediaTypeArg::Video => MediaSelection::Video,
            MediaTypeArg::All => MediaSelection::All,
        }
    }
}

#[derive(Debug, Args)]
pub struct BackupCommand {
    /// Backup directory (overrides backup.dir)
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// First creation date to include, YYYY-MM-DD
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last creation date to include, YYYY-MM-DD
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Media types to back up (overrides backup.media_type)
    #[arg(long, value_enum)]
    pub media_type: Option<MediaTypeArg>,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Downloads running at once (overrides transfer.max_concurrent_downloads)
    #[arg(long)]
    pub concurrency: Option<u32>,
}

/// Open the index a run works against
///
/// A dry run never creates `index.db`: without one it plans against an empty
/// in-memory index, so every remote item shows up as an addition.
async fn open_index(config: &Config, dry_run: bool) -> Result<Arc<dyn IBackupIndex>> {
    let db_path = config.backup.index_path();
    if dry_run && !db_path.exists() {
        info!(index = %db_path.display(), "No backup index yet, planning against an empty one");
        return Ok(Arc::new(InMemoryBackupIndex::new()));
    }
    let index = SqliteBackupIndex::open(&db_path)
        .await
        .context("Failed to open backup index")?;
    Ok(Arc::new(index))
}

impl BackupCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let mut config = load_config(config_path)?;
        self.apply_overrides(&mut config);
        ensure_valid(&config)?;

        let range = DateRange::new(self.start_date, self.end_date)
            .context("--start-date must not be after --end-date")?;

        info!(
            backup_dir = %config.backup.dir.display(),
            media_type = ?config.backup.media_type,
            "Loaded configuration"
        );

        let index = open_index(&config, self.dry_run).await?;

        let auth = photos_auth(&config)?;
        let tokens = auth.access_token().await?;
        let client = PhotosClient::new(tokens.access_token.as_str());
        let library = GooglePhotosLibrary::new(client).with_page_size(config.transfer.list_page_size);

        let engine = ReconciliationEngine::new(
            index.clone(),
            Arc::new(library),
            Arc::new(HttpContentFetcher::new()),
            config.backup.photos_dir(),
            EngineOptions::from_config(&config),
        );

        let media_type = config.backup.media_type.media_type();
        let result = if self.dry_run {
            let mut filter = MediaFilter::new().with_range(range);
            if let Some(media_type) = media_type {
                filter = filter.with_media_type(media_type);
            }
            engine
                .plan(&filter)
                .await
                .map(|plan| print_plan(&plan, format, &*formatter))
        } else {
            formatter.info("Starting backup...");
            engine
                .run(range.start(), range.end(), media_type)
                .await
                .map(|summary| print_summary(&summary, format, &*formatter))
        };

        index.close().await;

        if let Err(e) = result {
            error!(error = %e, "Backup aborted");
            return Err(e).context("Backup aborted");
        }
        Ok(())
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(dir) = &self.backup_dir {
            config.backup.dir = dir.clone();
        }
        if let Some(media_type) = self.media_type {
            config.backup.media_type = media_type.into();
        }
        if let Some(concurrency) = self.concurrency {
            config.transfer.max_concurrent_downloads = concurrency;
        }
    }
}

fn print_plan(plan: &ReconcilePlan, format: OutputFormat, formatter: &dyn OutputFormatter) {
    if matches!(format, OutputFormat::Json) {
        let to_remove: Vec<_> = plan
            .to_remove
            .iter()
            .map(|r| serde_json::json!({"id": r.id(), "file_path": r.file_path()}))
            .collect();
        let to_add: Vec<_> = plan
            .to_add
            .iter()
            .map(|item| {
                serde_json::json!({
                    "id": item.id,
                    "media_type": item.media_type,
                    "creation_date": item.creation_date,
                    "filename": item.filename,
                })
            })
            .collect();
        formatter.print_json(&serde_json::json!({
            "dry_run": true,
            "to_remove": to_remove,
            "to_add": to_add,
            "unchanged": plan.unchanged,
        }));
        return;
    }

    formatter.info("Dry run mode - no changes will be made");
    if plan.is_empty() {
        formatter.success("Already up to date");
        return;
    }
    formatter.success(&format!(
        "Would remove {}, add {}, keep {}",
        count_label(plan.to_remove.len() as u64, "item"),
        count_label(plan.to_add.len() as u64, "item"),
        plan.unchanged
    ));
    for record in &plan.to_remove {
        formatter.info(&format!("- {}  {}", record.id(), record.file_path()));
    }
    for item in &plan.to_add {
        formatter.info(&format!(
            "+ {}  {}/{}",
            item.id, item.creation_date, item.filename
        ));
    }
}

fn print_summary(summary: &RunSummary, format: OutputFormat, formatter: &dyn OutputFormatter) {
    if matches!(format, OutputFormat::Json) {
        match serde_json::to_value(summary) {
            Ok(json) => formatter.print_json(&json),
            Err(e) => formatter.error(&format!("Failed to serialize run summary: {}", e)),
        }
        return;
    }

    let duration = format_duration_ms(summary.duration_ms);
    if summary.added == 0 && summary.removed == 0 && summary.failures.is_empty() {
        formatter.success(&format!("Already up to date ({})", duration));
    } else {
        formatter.success(&format!("Backup completed in {}", duration));
    }
    if summary.added > 0 {
        formatter.info(&format!("Downloaded: {}", count_label(summary.added.into(), "file")));
    }
    if summary.removed > 0 {
        formatter.info(&format!("Removed:    {}", count_label(summary.removed.into(), "file")));
    }
    formatter.info(&format!("Unchanged:  {}", summary.unchanged));

    if let Some(sweep) = &summary.sweep {
        if sweep.stale_parts_removed > 0 {
            formatter.info(&format!(
                "Cleaned up {}",
                count_label(sweep.stale_parts_removed.into(), "interrupted download")
            ));
        }
        if !sweep.orphans.is_empty() {
            if sweep.orphans_removed > 0 {
                formatter.info(&format!(
                    "Deleted {}",
                    count_label(sweep.orphans_removed.into(), "untracked file")
                ));
            } else {
                formatter.warn(&format!(
                    "{} not in the index:",
                    count_label(sweep.orphans.len() as u64, "file")
                ));
                for orphan in &sweep.orphans {
                    formatter.info(&format!("  {}", orphan));
                }
            }
        }
        for err in &sweep.errors {
            formatter.warn(err);
        }
    }

    if !summary.failures.is_empty() {
        formatter.error(&format!(
            "{} could not be processed:",
            count_label(summary.failed().into(), "item")
        ));
        for failure in &summary.failures {
            formatter.info(&format!("  - {} ({:?}): {}", failure.id, failure.phase, failure.reason));
        }
    }
}
