//! Status command - Display what the backup index holds
//!
//! Provides the `gpbackup status` CLI command which:
//! 1. Shows indexed record counts by media type
//! 2. With `--orphans`, walks the backup directory for files the index does
//!    not reference and for leftovers of interrupted downloads. Nothing is
//!    deleted; the next `gpbackup backup` cleans up.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use gpbackup_core::config::Config;
use gpbackup_core::domain::MediaType;
use gpbackup_core::ports::{IBackupIndex, MediaFilter};
use gpbackup_index::SqliteBackupIndex;
use gpbackup_sync::sweep::{self, SweepReport};
use tracing::info;

use super::load_config;
use crate::output::{count_label, get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Also list files under the backup directory that the index does not know
    #[arg(long)]
    pub orphans: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        let db_path = config.backup.index_path();
        if !db_path.exists() {
            formatter.error("No backup index found. Run 'gpbackup backup' first.");
            return Ok(());
        }

        info!(index = %db_path.display(), "Showing backup status");
        let index = SqliteBackupIndex::open(&db_path)
            .await
            .context("Failed to open backup index")?;

        let result = self.report(&config, &index, format, &*formatter).await;
        index.close().await;
        result
    }

    async fn report(
        &self,
        config: &Config,
        index: &dyn IBackupIndex,
        format: OutputFormat,
        formatter: &dyn OutputFormatter,
    ) -> Result<()> {
        let counts = count_by_type(index).await?;
        let total: u64 = counts.values().sum();

        let orphans = if self.orphans {
            let indexed: HashSet<_> = index
                .all_paths()
                .await
                .context("Failed to read indexed paths")?
                .into_iter()
                .collect();
            let report = sweep::scan(&config.backup.photos_dir(), &indexed)
                .await
                .context("Failed to scan backup directory")?;
            Some(report)
        } else {
            None
        };

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::json!({
                "backup_dir": config.backup.dir.display().to_string(),
                "total_items": total,
                "items_by_type": counts,
                "orphans": orphans,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("Backup directory: {}", config.backup.dir.display()));
        formatter.info(&format!("Indexed: {}", count_label(total, "item")));
        for (media_type, count) in &counts {
            formatter.info(&format!("  {:<6} {}", media_type, count));
        }

        if let Some(report) = orphans {
            print_orphans(&report, formatter);
        }
        Ok(())
    }
}

/// Record counts keyed by the persisted type name (`PHOTO`, `VIDEO`)
async fn count_by_type(index: &dyn IBackupIndex) -> Result<BTreeMap<&'static str, u64>> {
    let mut counts = BTreeMap::new();
    for media_type in MediaType::ALL {
        let count = index
            .count(&MediaFilter::new().with_media_type(media_type))
            .await
            .with_context(|| format!("Failed to count {} items", media_type))?;
        counts.insert(media_type.as_str(), count);
    }
    Ok(counts)
}

fn print_orphans(report: &SweepReport, formatter: &dyn OutputFormatter) {
    if !report.stale_parts.is_empty() {
        formatter.info(&format!(
            "{} left behind (removed by the next backup)",
            count_label(report.stale_parts.len() as u64, "interrupted download")
        ));
    }
    if report.orphans.is_empty() {
        formatter.info("No untracked files");
    } else {
        formatter.warn(&format!(
            "{} not in the index:",
            count_label(report.orphans.len() as u64, "file")
        ));
        for orphan in &report.orphans {
            formatter.info(&format!("  {}", orphan));
        }
    }
    for err in &report.errors {
        formatter.warn(err);
    }
}
