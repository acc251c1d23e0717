//! Reconciliation engine
//!
//! A run is a single pass:
//!
//! 1. Query the backup index and the remote library with the same filter.
//! 2. Diff the two id sets into a [`ReconcilePlan`].
//! 3. Removal phase: delete each vanished item's file, then its record.
//! 4. Addition phase: reserve a destination, download, then insert a record.
//!
//! Every removal finishes before the first addition starts. Inside a phase
//! items run on a bounded pool of tasks. A failing item is reported and the
//! run carries on; only listing failures, an unavailable index, or an index
//! that contradicts the plan abort the run.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use gpbackup_core::config::{Config, OrphanPolicy};
use gpbackup_core::domain::{DateRange, MediaItemId, MediaItemRecord, MediaType, RelativePath};
use gpbackup_core::ports::{
    IBackupIndex, IContentFetcher, IMediaLibrary, IndexError, MediaFilter, RemoteMediaItem,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::placement::{self, FilePlacement};
use crate::sweep::{self, SweepReport};
use crate::{PlacementError, ReconcileError};

// ============================================================================
// Run summary
// ============================================================================

/// Which phase an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Remove,
    Add,
}

/// A per-item failure, named by item id
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub id: MediaItemId,
    pub phase: Phase,
    pub reason: String,
}

/// Result of a reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Items whose file and record were removed
    pub removed: u32,
    /// Items downloaded and indexed
    pub added: u32,
    /// Items present on both sides and left alone
    pub unchanged: u32,
    /// Items that could not be processed (non-fatal)
    pub failures: Vec<ItemFailure>,
    /// Orphan sweep outcome, when a sweep ran
    pub sweep: Option<SweepReport>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn failed(&self) -> u32 {
        self.failures.len() as u32
    }
}

// ============================================================================
// Plan
// ============================================================================

/// The add and remove sets computed from one snapshot of each side
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// Indexed items that no longer exist remotely, ordered by id
    pub to_remove: Vec<MediaItemRecord>,
    /// Remote items not yet indexed, ordered by id
    pub to_add: Vec<RemoteMediaItem>,
    /// Items present on both sides
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Diff an index snapshot against a remote snapshot by id
///
/// `to_add = remote - local`, `to_remove = local - remote`. Repeated remote
/// ids keep their first occurrence.
pub fn compute_plan(local: Vec<MediaItemRecord>, remote: Vec<RemoteMediaItem>) -> ReconcilePlan {
    let mut remote_by_id: BTreeMap<MediaItemId, RemoteMediaItem> = BTreeMap::new();
    for item in remote {
        if remote_by_id.contains_key(&item.id) {
            warn!(item_id = %item.id, "Remote library listed an item twice");
            continue;
        }
        remote_by_id.insert(item.id.clone(), item);
    }

    let local_by_id: BTreeMap<MediaItemId, MediaItemRecord> = local
        .into_iter()
        .map(|record| (record.id().clone(), record))
        .collect();

    let mut plan = ReconcilePlan::default();
    for (id, record) in &local_by_id {
        if remote_by_id.contains_key(id) {
            plan.unchanged += 1;
        } else {
            plan.to_remove.push(record.clone());
        }
    }
    plan.to_add = remote_by_id
        .into_values()
        .filter(|item| !local_by_id.contains_key(&item.id))
        .collect();

    plan
}

// ============================================================================
// Retry logic
// ============================================================================

/// Status codes worth another attempt
const TRANSIENT_STATUS_CODES: &[&str] = &["429", "500", "502", "503", "504"];

/// Checks if an error from the remote side is transient and should be retried
///
/// Transient errors include network problems, rate limiting (429), and
/// server errors (5xx). Authorization and not-found errors are permanent.
/// URLs quoted in the message are ignored, and status codes only count as
/// whole numbers.
fn is_transient_error(err: &anyhow::Error) -> bool {
    let lowered = format!("{err:#}").to_lowercase();
    let err_str = lowered
        .split_whitespace()
        .filter(|word| !word.contains("://"))
        .collect::<Vec<_>>()
        .join(" ");

    // Network errors
    if err_str.contains("connection")
        || err_str.contains("timed out")
        || err_str.contains("timeout")
        || err_str.contains("dns error")
        || err_str.contains("reset by peer")
        || err_str.contains("broken pipe")
        || err_str.contains("error sending request")
        || err_str.contains("error decoding response body")
    {
        return true;
    }

    if err_str.contains("too many requests") {
        return true;
    }

    err_str
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| TRANSIENT_STATUS_CODES.contains(&token))
}

/// Download failures worth another attempt
fn is_retryable_download(err: &PlacementError) -> bool {
    match err {
        PlacementError::Fetch(e) => is_transient_error(e),
        PlacementError::LengthMismatch { .. } => false,
        other => other.is_download_failure(),
    }
}

/// Executes an async operation with exponential backoff retry
///
/// Errors for which `is_retryable` answers false are returned immediately.
/// Backoff doubles from `base_delay`: 1x, 2x, 4x, ...
async fn with_retry<T, E, F, Fut>(
    operation_name: &str,
    max_attempts: u32,
    base_delay: Duration,
    is_retryable: fn(&E) -> bool,
    f: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Tuning knobs for [`ReconciliationEngine`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on items processed at once within a phase
    pub max_concurrent: usize,
    /// Attempts per download, including the first
    pub max_attempts: u32,
    /// First retry delay; later ones double
    pub retry_base_delay: Duration,
    /// Limit on a single download attempt
    pub download_timeout: Duration,
    /// What to do about untracked files after the add phase
    pub orphans: OrphanPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            download_timeout: Duration::from_secs(300),
            orphans: OrphanPolicy::Report,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.transfer.max_concurrent_downloads.max(1) as usize,
            max_attempts: config.transfer.max_attempts,
            download_timeout: Duration::from_secs(config.transfer.download_timeout_secs),
            orphans: config.sweep.orphans,
            ..Self::default()
        }
    }
}

/// What one worker task reports back
enum ItemOutcome {
    Removed,
    Added,
    Failed(ItemFailure),
    Fatal(ReconcileError),
    /// Not attempted because an earlier item hit a fatal error
    Skipped,
}

/// Shared handles cloned into every worker task
#[derive(Clone)]
struct ItemContext {
    index: Arc<dyn IBackupIndex>,
    fetcher: Arc<dyn IContentFetcher>,
    placement: Arc<FilePlacement>,
    backup_root: Arc<Path>,
    max_attempts: u32,
    retry_base_delay: Duration,
}

/// Reconciles the remote library against the local backup
///
/// ## Dependencies
///
/// - `index`: Durable record of downloaded items
/// - `library`: Listing of remote items
/// - `fetcher`: Byte download of a single item
pub struct ReconciliationEngine {
    index: Arc<dyn IBackupIndex>,
    library: Arc<dyn IMediaLibrary>,
    fetcher: Arc<dyn IContentFetcher>,
    placement: Arc<FilePlacement>,
    backup_root: PathBuf,
    options: EngineOptions,
}

impl ReconciliationEngine {
    /// Creates a new engine
    ///
    /// # Arguments
    /// * `index` - Backup index (IBackupIndex)
    /// * `library` - Remote library listing (IMediaLibrary)
    /// * `fetcher` - Content download (IContentFetcher)
    /// * `backup_root` - Directory under which dated folders are created
    /// * `options` - Concurrency, retry, timeout and sweep settings
    pub fn new(
        index: Arc<dyn IBackupIndex>,
        library: Arc<dyn IMediaLibrary>,
        fetcher: Arc<dyn IContentFetcher>,
        backup_root: impl Into<PathBuf>,
        options: EngineOptions,
    ) -> Self {
        Self {
            index,
            library,
            fetcher,
            placement: Arc::new(FilePlacement::new(options.download_timeout)),
            backup_root: backup_root.into(),
            options,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Reconcile items of `media_type` created between `start` and `end`
    ///
    /// Bounds are inclusive; `None` means unbounded, and a `None` media type
    /// covers every type.
    pub async fn run(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        media_type: Option<MediaType>,
    ) -> Result<RunSummary, ReconcileError> {
        let range = DateRange::new(start, end)?;
        let mut filter = MediaFilter::new().with_range(range);
        if let Some(media_type) = media_type {
            filter = filter.with_media_type(media_type);
        }
        self.run_filter(&filter).await
    }

    /// Compute what a run with `filter` would do, without changing anything
    #[tracing::instrument(skip(self))]
    pub async fn plan(&self, filter: &MediaFilter) -> Result<ReconcilePlan, ReconcileError> {
        let local = self.index.find(filter).await?;
        let remote = self
            .library
            .list_items(filter)
            .await
            .map_err(ReconcileError::Listing)?;

        let total = remote.len();
        let remote: Vec<RemoteMediaItem> = remote
            .into_iter()
            .filter(|item| filter.matches(item.media_type, item.creation_date))
            .collect();
        if remote.len() < total {
            warn!(
                ignored = total - remote.len(),
                "Ignoring remote items outside the requested window"
            );
        }

        let plan = compute_plan(local, remote);
        info!(
            to_remove = plan.to_remove.len(),
            to_add = plan.to_add.len(),
            unchanged = plan.unchanged,
            "Reconciliation plan computed"
        );
        Ok(plan)
    }

    /// Run a full reconciliation for `filter`
    #[tracing::instrument(skip(self))]
    pub async fn run_filter(&self, filter: &MediaFilter) -> Result<RunSummary, ReconcileError> {
        let started = Instant::now();
        info!(root = %self.backup_root.display(), "Starting reconciliation");

        let plan = self.plan(filter).await?;
        let mut summary = RunSummary {
            unchanged: plan.unchanged as u32,
            ..RunSummary::default()
        };

        if !plan.to_remove.is_empty() {
            info!(count = plan.to_remove.len(), "Removal phase");
            let outcomes = self
                .run_phase(plan.to_remove, |ctx, record| remove_item(ctx, record))
                .await?;
            tally(outcomes, &mut summary)?;
        }

        if !plan.to_add.is_empty() {
            info!(count = plan.to_add.len(), "Addition phase");
            let outcomes = self
                .run_phase(plan.to_add, |ctx, item| add_item(ctx, item))
                .await?;
            tally(outcomes, &mut summary)?;
        }

        if self.options.orphans != OrphanPolicy::Ignore {
            summary.sweep = self.sweep_orphans().await;
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            removed = summary.removed,
            added = summary.added,
            failed = summary.failed(),
            unchanged = summary.unchanged,
            duration_ms = summary.duration_ms,
            "Reconciliation complete"
        );
        for failure in &summary.failures {
            warn!(item_id = %failure.id, phase = ?failure.phase, reason = %failure.reason, "Item failed");
        }

        Ok(summary)
    }

    /// Compare the files under the backup root with the whole index
    ///
    /// Sweep problems are logged and never fail the run.
    async fn sweep_orphans(&self) -> Option<SweepReport> {
        let indexed: HashSet<RelativePath> = match self.index.all_paths().await {
            Ok(paths) => paths.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Skipping orphan sweep");
                return None;
            }
        };

        match sweep::sweep(
            &self.placement,
            &self.backup_root,
            &indexed,
            self.options.orphans,
        )
        .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Orphan sweep failed");
                None
            }
        }
    }

    fn context(&self) -> ItemContext {
        ItemContext {
            index: Arc::clone(&self.index),
            fetcher: Arc::clone(&self.fetcher),
            placement: Arc::clone(&self.placement),
            backup_root: Arc::from(self.backup_root.as_path()),
            max_attempts: self.options.max_attempts,
            retry_base_delay: self.options.retry_base_delay,
        }
    }

    /// Process `items` on at most `max_concurrent` tasks at once
    ///
    /// Once any item reports a fatal outcome, items that have not started yet
    /// are skipped; items already running are allowed to finish.
    async fn run_phase<T, F, Fut>(
        &self,
        items: Vec<T>,
        work: F,
    ) -> Result<Vec<ItemOutcome>, ReconcileError>
    where
        T: Send + 'static,
        F: Fn(ItemContext, T) -> Fut,
        Fut: Future<Output = ItemOutcome> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for item in items {
            let semaphore = Arc::clone(&semaphore);
            let aborted = Arc::clone(&aborted);
            let job = work(self.context(), item);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ItemOutcome::Skipped;
                };
                if aborted.load(Ordering::Acquire) {
                    return ItemOutcome::Skipped;
                }
                let outcome = job.await;
                if matches!(outcome, ItemOutcome::Fatal(_)) {
                    aborted.store(true, Ordering::Release);
                }
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => return Err(ReconcileError::Worker(e.to_string())),
            }
        }
        Ok(outcomes)
    }
}

/// Fold a phase's outcomes into the summary; the first fatal outcome wins
fn tally(outcomes: Vec<ItemOutcome>, summary: &mut RunSummary) -> Result<(), ReconcileError> {
    let mut fatal = None;
    let mut skipped = 0usize;
    for outcome in outcomes {
        match outcome {
            ItemOutcome::Removed => summary.removed += 1,
            ItemOutcome::Added => summary.added += 1,
            ItemOutcome::Failed(failure) => summary.failures.push(failure),
            ItemOutcome::Fatal(e) => {
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
            ItemOutcome::Skipped => skipped += 1,
        }
    }

    match fatal {
        Some(e) => {
            error!(
                error = %e,
                removed = summary.removed,
                added = summary.added,
                failed = summary.failed(),
                skipped,
                "Reconciliation aborted"
            );
            Err(e)
        }
        None => Ok(()),
    }
}

// ============================================================================
// Per-item work
// ============================================================================

/// Index path conflicts one addition works around before it is reported failed
const MAX_PATH_CONFLICTS: usize = 3;

/// Delete the file, then the record
///
/// A missing file does not stop the record from being removed. Any other
/// file system error is reported, but the record is still removed so the
/// index never points at a file it can no longer vouch for.
async fn remove_item(ctx: ItemContext, record: MediaItemRecord) -> ItemOutcome {
    let id = record.id().clone();

    let file_error = match ctx.placement.delete(&ctx.backup_root, record.file_path()).await {
        Ok(true) => None,
        Ok(false) => {
            warn!(item_id = %id, path = %record.file_path(), "Backed-up file already missing");
            None
        }
        Err(e) => {
            warn!(item_id = %id, path = %record.file_path(), error = %e, "Could not delete backed-up file");
            Some(e.to_string())
        }
    };

    if let Err(e) = ctx.index.delete(&record).await {
        return ItemOutcome::Fatal(e.into());
    }

    match file_error {
        None => {
            info!(item_id = %id, path = %record.file_path(), "Removed");
            ItemOutcome::Removed
        }
        Some(reason) => ItemOutcome::Failed(ItemFailure {
            id,
            phase: Phase::Remove,
            reason,
        }),
    }
}

/// Reserve a destination, download, then insert the record
///
/// Nothing is written to the index unless the file is complete on disk. When
/// the chosen path still belongs to another record (its file was deleted by
/// hand), the download is discarded and the next free name is tried.
async fn add_item(ctx: ItemContext, item: RemoteMediaItem) -> ItemOutcome {
    let fail = |reason: String| {
        warn!(item_id = %item.id, reason = %reason, "Addition failed");
        ItemOutcome::Failed(ItemFailure {
            id: item.id.clone(),
            phase: Phase::Add,
            reason,
        })
    };

    // An id indexed under a different date or type falls outside this run's
    // window locally while the remote side lists it inside.
    match ctx.index.get(&item.id).await {
        Ok(Some(existing)) => {
            return fail(format!(
                "already indexed as {} {} at {}; remote metadata changed",
                existing.media_type(),
                existing.creation_date(),
                existing.file_path()
            ))
        }
        Ok(None) => {}
        Err(e) => return ItemOutcome::Fatal(e.into()),
    }

    let mut claimed: HashSet<PathBuf> = HashSet::new();
    loop {
        let reservation = match ctx.placement.reserve_destination_avoiding(
            &ctx.backup_root,
            item.creation_date,
            &item.filename,
            &claimed,
        ) {
            Ok(reservation) => reservation,
            Err(e) => return fail(e.to_string()),
        };

        let relative = match placement::relative_path(&ctx.backup_root, reservation.path()) {
            Ok(relative) => relative,
            Err(e) => return fail(e.to_string()),
        };

        let placement = ctx.placement.as_ref();
        let fetcher = ctx.fetcher.as_ref();
        let url = item.download_url.as_str();
        let destination = reservation.path();
        let operation = format!("download {}", item.id);

        let bytes = match with_retry(
            &operation,
            ctx.max_attempts,
            ctx.retry_base_delay,
            is_retryable_download,
            move || placement.download(fetcher, url, destination),
        )
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => return fail(e.to_string()),
        };

        let record =
            MediaItemRecord::new(item.id.clone(), item.media_type, item.creation_date, relative);
        let err = match ctx.index.insert(&record).await {
            Ok(()) => {
                info!(item_id = %item.id, path = %record.file_path(), bytes, "Added");
                return ItemOutcome::Added;
            }
            Err(e) => e,
        };

        // The file is complete but unrecorded; do not leave it behind.
        if let Err(cleanup) = ctx.placement.delete(&ctx.backup_root, record.file_path()).await {
            debug!(item_id = %item.id, error = %cleanup, "Could not remove unindexed download");
        }

        match err {
            IndexError::DuplicatePath(path) if claimed.len() < MAX_PATH_CONFLICTS => {
                warn!(item_id = %item.id, path = %path, "Path belongs to another record, trying the next name");
                claimed.insert(destination.to_path_buf());
            }
            err @ IndexError::DuplicatePath(_) => return fail(err.to_string()),
            err => return ItemOutcome::Fatal(err.into()),
        }
    }
}
