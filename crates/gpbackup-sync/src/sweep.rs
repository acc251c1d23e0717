//! Orphan sweep
//!
//! A crash between the end of a download and the index insert leaves a file
//! on disk that no record points to, and a crash mid-download leaves a hidden
//! `.<filename>.gpbackup-part` file. The sweep walks the backup root, deletes
//! stale temporary files and reports (or deletes) media files that the index
//! does not know. [`scan`] walks the same tree without changing anything.
//!
//! Hidden directories directly or indirectly under the root are skipped so
//! that a data store placed inside the backup tree is never touched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use gpbackup_core::config::OrphanPolicy;
use gpbackup_core::domain::RelativePath;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::placement::{self, FilePlacement};
use crate::PlacementError;

/// Outcome of a sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Untracked media files, relative to the backup root
    pub orphans: Vec<RelativePath>,
    /// How many of `orphans` were deleted
    pub orphans_removed: u32,
    /// Temporary files of interrupted downloads
    pub stale_parts: Vec<RelativePath>,
    /// How many of `stale_parts` were deleted
    pub stale_parts_removed: u32,
    /// Entries that could not be inspected or removed
    pub errors: Vec<String>,
}

/// What a walk is allowed to change
#[derive(Clone, Copy)]
enum Cleanup<'a> {
    Nothing,
    Remove {
        placement: &'a FilePlacement,
        orphans: bool,
    },
}

/// Walk `backup_root` and reconcile what is on disk against `indexed`
///
/// With [`OrphanPolicy::Ignore`] nothing is scanned. With
/// [`OrphanPolicy::Report`] orphans are only listed; stale temporary files
/// are deleted in either of the other modes since nothing can complete them.
/// Call this only while no download is running under `backup_root`.
pub async fn sweep(
    placement: &FilePlacement,
    backup_root: &Path,
    indexed: &HashSet<RelativePath>,
    policy: OrphanPolicy,
) -> Result<SweepReport, PlacementError> {
    if policy == OrphanPolicy::Ignore {
        return Ok(SweepReport::default());
    }
    let cleanup = Cleanup::Remove {
        placement,
        orphans: policy == OrphanPolicy::Delete,
    };
    walk(backup_root, indexed, cleanup).await
}

/// List orphans and temporary files under `backup_root` without removing any
///
/// Safe to call while a backup is running against the same directory.
pub async fn scan(
    backup_root: &Path,
    indexed: &HashSet<RelativePath>,
) -> Result<SweepReport, PlacementError> {
    walk(backup_root, indexed, Cleanup::Nothing).await
}

async fn walk(
    backup_root: &Path,
    indexed: &HashSet<RelativePath>,
    cleanup: Cleanup<'_>,
) -> Result<SweepReport, PlacementError> {
    let mut report = SweepReport::default();

    let files = match list_files(backup_root).await {
        Ok(files) => files,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(PlacementError::io(backup_root, e)),
    };

    for file in files {
        let relative = match placement::relative_path(backup_root, &file) {
            Ok(relative) => relative,
            Err(e) => {
                report.errors.push(e.to_string());
                continue;
            }
        };

        if indexed.contains(&relative) {
            continue;
        }

        let is_part = file
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, placement::is_part_file_name);

        if is_part {
            if let Cleanup::Remove { .. } = cleanup {
                match tokio::fs::remove_file(&file).await {
                    Ok(()) => {
                        report.stale_parts_removed += 1;
                        placement::prune_empty_parents(backup_root, &file).await;
                        debug!(path = %relative, "Removed stale partial download");
                    }
                    Err(e) => report.errors.push(format!("{}: {}", file.display(), e)),
                }
            }
            report.stale_parts.push(relative);
            continue;
        }

        match cleanup {
            Cleanup::Remove {
                placement,
                orphans: true,
            } => match placement.delete(backup_root, &relative).await {
                Ok(_) => {
                    info!(path = %relative, "Deleted orphaned file");
                    report.orphans_removed += 1;
                }
                Err(e) => report.errors.push(e.to_string()),
            },
            _ => warn!(path = %relative, "File is not tracked by the backup index"),
        }
        report.orphans.push(relative);
    }

    report.orphans.sort();
    report.stale_parts.sort();
    Ok(report)
}

/// Every regular file below `root`, skipping hidden directories
async fn list_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if !hidden {
                    pending.push(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    Ok(files)
}
