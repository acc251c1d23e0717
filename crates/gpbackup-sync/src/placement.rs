//! File placement under the backup root
//!
//! Media files live in dated folders, `<root>/<year>/<month>/<filename>`,
//! with the month unpadded (`2021/3`, not `2021/03`). When the natural name
//! is taken the file becomes `<base>_001.<ext>`, `<base>_002.<ext>`, and so on.
//!
//! ## Design Decisions
//!
//! - **Crash safety**: Downloads stream into a hidden sibling,
//!   `.<filename>.gpbackup-part`, and are renamed into place only after the
//!   full declared length has arrived, so a file at a final name is always
//!   complete.
//! - **Reservations**: Concurrent additions resolve names under one mutex and
//!   hold the chosen path until their download ends, so two items with the
//!   same filename and date never pick the same suffix.
//! - **Pruning**: Deleting a file removes every parent directory it leaves
//!   empty, stopping at the backup root.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use futures_util::StreamExt;
use gpbackup_core::domain::RelativePath;
use gpbackup_core::ports::{FetchedContent, IContentFetcher};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::PlacementError;

/// Suffix of in-flight download files
pub const PART_SUFFIX: &str = ".gpbackup-part";

/// Highest collision counter tried before giving up
const MAX_COLLISION_SUFFIX: u32 = 999_999;

// ============================================================================
// Naming helpers
// ============================================================================

/// Folder for items created on `date`: `<root>/<year>/<month>`
pub fn dated_dir(backup_root: &Path, date: NaiveDate) -> PathBuf {
    backup_root
        .join(date.year().to_string())
        .join(date.month().to_string())
}

/// Make a remote filename usable as a single local path component
///
/// Path separators and NUL become `_`. Empty names and `.`/`..` are rejected.
pub fn sanitize_filename(filename: &str) -> Result<String, PlacementError> {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    if cleaned.trim().is_empty() || cleaned == "." || cleaned == ".." {
        return Err(PlacementError::InvalidFilename(filename.to_string()));
    }
    Ok(cleaned)
}

/// Split `name` at its last dot into base and extension
///
/// Names without a dot, with a leading dot only (`.hidden`) or with a
/// trailing dot have no extension.
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (base, ext) = name.rsplit_once('.')?;
    if base.is_empty() || ext.is_empty() {
        None
    } else {
        Some((base, ext))
    }
}

/// The `n`th collision-avoiding variant of `filename`
///
/// `numbered_name("IMG_1.jpg", 1)` is `IMG_1_001.jpg`; the counter is
/// zero-padded to three digits and grows past that when needed.
pub fn numbered_name(filename: &str, n: u32) -> String {
    match split_extension(filename) {
        Some((base, ext)) => format!("{base}_{n:03}.{ext}"),
        None => format!("{filename}_{n:03}"),
    }
}

/// Path of the temporary file a download of `destination` writes to
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = destination.file_name() {
        name.push(file_name);
    }
    name.push(PART_SUFFIX);
    destination.with_file_name(name)
}

/// Whether `file_name` has the shape [`part_path`] produces
pub fn is_part_file_name(file_name: &str) -> bool {
    file_name.len() > 1 + PART_SUFFIX.len()
        && file_name.starts_with('.')
        && file_name.ends_with(PART_SUFFIX)
}

fn exists(path: &Path) -> Result<bool, PlacementError> {
    path.try_exists().map_err(|e| PlacementError::io(path, e))
}

/// First candidate in `dir` for which `is_taken` answers false
fn first_free<F>(dir: &Path, filename: &str, mut is_taken: F) -> Result<PathBuf, PlacementError>
where
    F: FnMut(&Path) -> Result<bool, PlacementError>,
{
    let natural = dir.join(filename);
    if !is_taken(&natural)? {
        return Ok(natural);
    }

    for n in 1..=MAX_COLLISION_SUFFIX {
        let candidate = dir.join(numbered_name(filename, n));
        if !is_taken(&candidate)? {
            return Ok(candidate);
        }
    }

    Err(PlacementError::io(
        natural,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free collision suffix left"),
    ))
}

/// Resolve where an item created on `date` named `filename` should be stored
///
/// Only files already on disk count as collisions; the index is never
/// consulted.
pub fn resolve_destination(
    backup_root: &Path,
    date: NaiveDate,
    filename: &str,
) -> Result<PathBuf, PlacementError> {
    let filename = sanitize_filename(filename)?;
    first_free(&dated_dir(backup_root, date), &filename, exists)
}

/// Express `absolute` relative to `backup_root`
///
/// Pure path arithmetic; the file system is not touched.
pub fn relative_path(backup_root: &Path, absolute: &Path) -> Result<RelativePath, PlacementError> {
    let relative = absolute
        .strip_prefix(backup_root)
        .map_err(|_| PlacementError::OutsideRoot {
            root: backup_root.to_path_buf(),
            path: absolute.to_path_buf(),
        })?;
    Ok(RelativePath::from_path(relative)?)
}

// ============================================================================
// Reservation
// ============================================================================

/// A destination path held by an in-flight addition
///
/// Dropping the reservation releases the path. By then the download has
/// either produced the file, which now occupies the name on disk, or failed
/// and cleaned up after itself.
#[derive(Debug)]
pub struct Reservation {
    path: PathBuf,
    reserved: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Reservation {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

// ============================================================================
// FilePlacement
// ============================================================================

/// Places, downloads and removes media files under a backup root
#[derive(Debug)]
pub struct FilePlacement {
    reserved: Arc<Mutex<HashSet<PathBuf>>>,
    download_timeout: Duration,
}

impl FilePlacement {
    pub fn new(download_timeout: Duration) -> Self {
        Self {
            reserved: Arc::new(Mutex::new(HashSet::new())),
            download_timeout,
        }
    }

    pub fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    /// Resolve and reserve a destination for a concurrent addition
    ///
    /// Like [`resolve_destination`], but candidates reserved by other
    /// in-flight additions also count as taken.
    pub fn reserve_destination(
        &self,
        backup_root: &Path,
        date: NaiveDate,
        filename: &str,
    ) -> Result<Reservation, PlacementError> {
        self.reserve_destination_avoiding(backup_root, date, filename, &HashSet::new())
    }

    /// Like [`reserve_destination`](Self::reserve_destination), with the
    /// paths in `claimed` also counted as taken
    pub fn reserve_destination_avoiding(
        &self,
        backup_root: &Path,
        date: NaiveDate,
        filename: &str,
        claimed: &HashSet<PathBuf>,
    ) -> Result<Reservation, PlacementError> {
        let filename = sanitize_filename(filename)?;
        let dir = dated_dir(backup_root, date);

        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        let path = first_free(&dir, &filename, |candidate| {
            Ok(claimed.contains(candidate) || reserved.contains(candidate) || exists(candidate)?)
        })?;
        reserved.insert(path.clone());

        debug!(path = %path.display(), "Reserved destination");
        Ok(Reservation {
            path,
            reserved: Arc::clone(&self.reserved),
        })
    }

    /// Stream `source_url` into `destination`
    ///
    /// Parent directories are created as needed and an existing file at
    /// exactly `destination` is replaced. The whole transfer is bounded by
    /// the download timeout. On any failure nothing is left at
    /// `destination` or at its temporary path.
    ///
    /// Returns the number of bytes written.
    #[instrument(skip(self, fetcher, source_url), fields(dest = %destination.display()))]
    pub async fn download(
        &self,
        fetcher: &dyn IContentFetcher,
        source_url: &str,
        destination: &Path,
    ) -> Result<u64, PlacementError> {
        let part = part_path(destination);

        let result = match tokio::time::timeout(
            self.download_timeout,
            transfer(fetcher, source_url, destination, &part),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PlacementError::Timeout(self.download_timeout)),
        };

        match result {
            Ok(bytes) => {
                debug!(bytes, "Download complete");
                Ok(bytes)
            }
            Err(err) => {
                remove_if_present(&part).await;
                Err(err)
            }
        }
    }

    /// Delete `relative` under `backup_root` and prune emptied directories
    ///
    /// Returns `Ok(false)` when the file did not exist.
    #[instrument(skip(self, backup_root, relative), fields(root = %backup_root.display(), path = %relative))]
    pub async fn delete(
        &self,
        backup_root: &Path,
        relative: &RelativePath,
    ) -> Result<bool, PlacementError> {
        let target = relative.to_path(backup_root);

        let existed = match tokio::fs::remove_file(&target).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(PlacementError::io(&target, e)),
        };

        prune_empty_parents(backup_root, &target).await;
        debug!(existed, "File removed");
        Ok(existed)
    }
}

async fn transfer(
    fetcher: &dyn IContentFetcher,
    source_url: &str,
    destination: &Path,
    part: &Path,
) -> Result<u64, PlacementError> {
    let FetchedContent {
        content_length,
        mut body,
    } = fetcher
        .fetch(source_url)
        .await
        .map_err(PlacementError::Fetch)?;

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PlacementError::io(parent, e))?;
    }

    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| PlacementError::io(part, e))?;

    let mut received: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(PlacementError::Fetch)?;
        received += chunk.len() as u64;
        if let Some(expected) = content_length {
            if received > expected {
                return Err(PlacementError::LengthMismatch { expected, received });
            }
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| PlacementError::io(part, e))?;
    }

    file.flush().await.map_err(|e| PlacementError::io(part, e))?;
    file.sync_all()
        .await
        .map_err(|e| PlacementError::io(part, e))?;
    drop(file);

    if let Some(expected) = content_length {
        if received < expected {
            return Err(PlacementError::ShortTransfer { expected, received });
        }
    }

    tokio::fs::rename(part, destination)
        .await
        .map_err(|e| PlacementError::io(destination, e))?;

    Ok(received)
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Could not remove partial download"),
    }
}

async fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// Remove empty ancestors of `start`, never `backup_root` or anything above it
pub(crate) async fn prune_empty_parents(backup_root: &Path, start: &Path) {
    let mut current = start.parent();
    while let Some(dir) = current {
        if dir == backup_root || !dir.starts_with(backup_root) {
            break;
        }
        match is_empty_dir(dir).await {
            Ok(true) => {}
            Ok(false) | Err(_) => break,
        }
        if let Err(e) = tokio::fs::remove_dir(dir).await {
            debug!(dir = %dir.display(), error = %e, "Stopped pruning");
            break;
        }
        debug!(dir = %dir.display(), "Pruned empty directory");
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::stream;
    use gpbackup_core::ports::ByteStream;
    use tempfile::TempDir;

    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Serves a fixed body, optionally lying about its length or stalling
    struct StaticFetcher {
        chunks: Vec<&'static [u8]>,
        declared: Option<u64>,
        stall: bool,
    }

    impl StaticFetcher {
        fn honest(body: &'static [u8]) -> Self {
            Self {
                chunks: vec![body],
                declared: Some(body.len() as u64),
                stall: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl IContentFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<FetchedContent> {
            let body: ByteStream = if self.stall {
                Box::pin(stream::pending::<anyhow::Result<Bytes>>())
            } else {
                let chunks: Vec<anyhow::Result<Bytes>> = self
                    .chunks
                    .iter()
                    .map(|c| Ok(Bytes::from_static(c)))
                    .collect();
                Box::pin(stream::iter(chunks))
            };
            Ok(FetchedContent::new(self.declared, body))
        }
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl IContentFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<FetchedContent> {
            anyhow::bail!("connection refused")
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    // ------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------

    #[test]
    fn test_dated_dir_month_is_unpadded() {
        assert_eq!(
            dated_dir(Path::new("/b"), d(2021, 3, 5)),
            PathBuf::from("/b/2021/3")
        );
        assert_eq!(
            dated_dir(Path::new("/b"), d(2020, 11, 15)),
            PathBuf::from("/b/2020/11")
        );
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("IMG_1.jpg", 1), "IMG_1_001.jpg");
        assert_eq!(numbered_name("IMG_1.jpg", 2), "IMG_1_002.jpg");
        assert_eq!(numbered_name("clip.final.mp4", 12), "clip.final_012.mp4");
        assert_eq!(numbered_name("README", 1), "README_001");
        assert_eq!(numbered_name(".hidden", 1), ".hidden_001");
        assert_eq!(numbered_name("a.jpg", 1000), "a_1000.jpg");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a.jpg").unwrap(), "a.jpg");
        assert_eq!(sanitize_filename("a/b.jpg").unwrap(), "a_b.jpg");
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("   ").is_err());
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/b/2021/3/a.jpg")),
            PathBuf::from("/b/2021/3/.a.jpg.gpbackup-part")
        );
    }

    #[test]
    fn test_part_file_names() {
        assert!(is_part_file_name(".a.jpg.gpbackup-part"));
        assert!(!is_part_file_name("archive.part"));
        assert!(!is_part_file_name("a.jpg.gpbackup-part"));
        assert!(!is_part_file_name(".gpbackup-part"));
        assert!(!is_part_file_name("a.jpg"));
    }

    // ------------------------------------------------------------------
    // Destination resolution
    // ------------------------------------------------------------------

    #[test]
    fn test_resolve_without_collision() {
        let root = TempDir::new().unwrap();
        let dest = resolve_destination(root.path(), d(2021, 3, 5), "a.jpg").unwrap();
        assert_eq!(dest, root.path().join("2021").join("3").join("a.jpg"));
    }

    #[test]
    fn test_resolve_collision_sequence() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("2020").join("10");
        touch(&dir.join("IMG_1.jpg"));

        let first = resolve_destination(root.path(), d(2020, 10, 1), "IMG_1.jpg").unwrap();
        assert_eq!(first, dir.join("IMG_1_001.jpg"));

        touch(&first);
        let second = resolve_destination(root.path(), d(2020, 10, 1), "IMG_1.jpg").unwrap();
        assert_eq!(second, dir.join("IMG_1_002.jpg"));
    }

    #[test]
    fn test_reservations_avoid_each_other() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));

        let a = placement
            .reserve_destination(root.path(), d(2021, 3, 5), "a.jpg")
            .unwrap();
        let b = placement
            .reserve_destination(root.path(), d(2021, 3, 5), "a.jpg")
            .unwrap();
        assert_eq!(a.path().file_name().unwrap(), "a.jpg");
        assert_eq!(b.path().file_name().unwrap(), "a_001.jpg");

        drop(a);
        let c = placement
            .reserve_destination(root.path(), d(2021, 3, 5), "a.jpg")
            .unwrap();
        assert_eq!(c.path().file_name().unwrap(), "a.jpg");
    }

    #[test]
    fn test_claimed_paths_are_skipped() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let claimed = HashSet::from([root.path().join("2021/3/a.jpg")]);

        let r = placement
            .reserve_destination_avoiding(root.path(), d(2021, 3, 5), "a.jpg", &claimed)
            .unwrap();
        assert_eq!(r.path(), root.path().join("2021/3/a_001.jpg"));
    }

    #[test]
    fn test_relative_path() {
        let rel = relative_path(Path::new("/b"), Path::new("/b/2021/3/a.jpg")).unwrap();
        assert_eq!(rel.as_str(), "2021/3/a.jpg");

        let err = relative_path(Path::new("/b"), Path::new("/elsewhere/a.jpg")).unwrap_err();
        assert!(matches!(err, PlacementError::OutsideRoot { .. }));
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_download_writes_file_atomically() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let dest = root.path().join("2021").join("3").join("a.jpg");

        let bytes = placement
            .download(&StaticFetcher::honest(b"jpegdata"), "http://x/a", &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 8);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpegdata");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_download_in_chunks_without_length() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let dest = root.path().join("v.mp4");
        let fetcher = StaticFetcher {
            chunks: vec![b"ab", b"cd", b"ef"],
            declared: None,
            stall: false,
        };

        placement.download(&fetcher, "http://x/v", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_download_overwrites_existing_file() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let dest = root.path().join("a.jpg");
        std::fs::write(&dest, b"stale partial content").unwrap();

        placement
            .download(&StaticFetcher::honest(b"fresh"), "http://x/a", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_short_transfer_leaves_nothing() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let dest = root.path().join("a.jpg");
        let fetcher = StaticFetcher {
            chunks: vec![b"half"],
            declared: Some(8),
            stall: false,
        };

        let err = placement
            .download(&fetcher, "http://x/a", &dest)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlacementError::ShortTransfer {
                expected: 8,
                received: 4
            }
        ));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_overlong_transfer_is_rejected() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let dest = root.path().join("a.jpg");
        let fetcher = StaticFetcher {
            chunks: vec![b"0123", b"4567"],
            declared: Some(5),
            stall: false,
        };

        let err = placement
            .download(&fetcher, "http://x/a", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::LengthMismatch { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_download_failure() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let dest = root.path().join("2021").join("3").join("a.jpg");

        let err = placement
            .download(&FailingFetcher, "http://x/a", &dest)
            .await
            .unwrap_err();
        assert!(err.is_download_failure());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_times_out() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_millis(50));
        let dest = root.path().join("a.jpg");
        let fetcher = StaticFetcher {
            chunks: Vec::new(),
            declared: Some(10),
            stall: true,
        };

        let err = placement
            .download(&fetcher, "http://x/a", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::Timeout(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_prunes_empty_parents_but_not_root() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        touch(&root.path().join("2020").join("10").join("only.jpg"));

        let rel = RelativePath::new("2020/10/only.jpg").unwrap();
        assert!(placement.delete(root.path(), &rel).await.unwrap());

        assert!(!root.path().join("2020").join("10").exists());
        assert!(!root.path().join("2020").exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn test_delete_keeps_non_empty_parents() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        touch(&root.path().join("2020").join("10").join("a.jpg"));
        touch(&root.path().join("2020").join("11").join("b.jpg"));

        let rel = RelativePath::new("2020/10/a.jpg").unwrap();
        assert!(placement.delete(root.path(), &rel).await.unwrap());

        assert!(!root.path().join("2020").join("10").exists());
        assert!(root.path().join("2020").join("11").join("b.jpg").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_file_returns_false() {
        let root = TempDir::new().unwrap();
        let placement = FilePlacement::new(Duration::from_secs(5));
        let rel = RelativePath::new("2020/10/gone.jpg").unwrap();

        assert!(!placement.delete(root.path(), &rel).await.unwrap());
        assert!(root.path().exists());
    }
}
