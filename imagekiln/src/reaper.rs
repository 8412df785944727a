//! Retention sweeps over the local cache tree.
//!
//! The cache has no in-memory index, so deletion is purely a filesystem
//! affair: the reaper walks the tree on a timer, removes files whose
//! modification time is older than the retention age, and prunes
//! directories left empty. Requests that race a sweep simply miss and
//! re-derive, so the walk takes no locks.

use crate::metrics::MetricsClient;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts from a single sweep of the cache tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub files_deleted: usize,
    pub dirs_deleted: usize,
    pub files_kept: usize,
    pub errors: usize,
}

/// Deletes cache entries past their retention age on a fixed interval.
pub struct CacheReaper {
    root: PathBuf,
    retention_age: Duration,
    interval: Duration,
    metrics: MetricsClient,
}

impl CacheReaper {
    pub fn new(
        root: impl Into<PathBuf>,
        retention_age: Duration,
        interval: Duration,
        metrics: MetricsClient,
    ) -> Self {
        Self {
            root: root.into(),
            retention_age,
            interval,
            metrics,
        }
    }

    /// Runs sweeps until `shutdown` fires. The first sweep happens one
    /// full interval after startup; files cached by a previous run get
    /// their inventory logged immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            root = %self.root.display(),
            retention_secs = self.retention_age.as_secs(),
            interval_secs = self.interval.as_secs(),
            "cache reaper started"
        );

        self.inventory().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("cache reaper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Walks the tree once and deletes whatever has aged out. Filesystem
    /// work runs on the blocking pool.
    pub async fn sweep(&self) -> SweepStats {
        let root = self.root.clone();
        let retention = self.retention_age;
        let metrics = self.metrics.clone();
        let start = Instant::now();

        match task::spawn_blocking(move || sweep_tree(&root, retention, &metrics)).await {
            Ok(stats) => {
                if stats.files_deleted > 0 || stats.dirs_deleted > 0 {
                    info!(
                        files_deleted = stats.files_deleted,
                        dirs_deleted = stats.dirs_deleted,
                        files_kept = stats.files_kept,
                        errors = stats.errors,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "cache sweep complete"
                    );
                } else {
                    debug!(files_kept = stats.files_kept, "cache sweep found nothing to reap");
                }
                stats
            }
            Err(err) => {
                warn!(error = %err, "cache sweep task failed");
                SweepStats {
                    errors: 1,
                    ..SweepStats::default()
                }
            }
        }
    }

    /// Logs what a previous run left on disk.
    async fn inventory(&self) {
        let root = self.root.clone();
        match task::spawn_blocking(move || {
            let mut files = 0usize;
            let mut bytes = 0u64;
            inventory_dir(&root, &mut files, &mut bytes);
            (files, bytes)
        })
        .await
        {
            Ok((files, total_bytes)) => {
                info!(files, total_bytes, "cache inventory complete");
            }
            Err(err) => warn!(error = %err, "cache inventory failed"),
        }
    }
}

/// Post-order walk: files are reaped first, then any directory the walk
/// leaves empty is pruned. The root itself is never removed.
fn sweep_tree(root: &Path, retention: Duration, metrics: &MetricsClient) -> SweepStats {
    let mut stats = SweepStats::default();
    let now = SystemTime::now();
    sweep_dir(root, retention, now, metrics, &mut stats, true);
    stats
}

fn sweep_dir(
    dir: &Path,
    retention: Duration,
    now: SystemTime,
    metrics: &MetricsClient,
    stats: &mut SweepStats,
    is_root: bool,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cannot read cache directory");
            stats.errors += 1;
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            stats.errors += 1;
            continue;
        };
        if file_type.is_dir() {
            sweep_dir(&path, retention, now, metrics, stats, false);
        } else if file_type.is_file() {
            sweep_file(&path, &entry, retention, now, metrics, stats);
        }
    }

    if !is_root && fs::remove_dir(dir).is_ok() {
        debug!(dir = %dir.display(), "empty cache directory pruned");
        metrics.directory_pruned();
        stats.dirs_deleted += 1;
    }
}

fn sweep_file(
    path: &Path,
    entry: &fs::DirEntry,
    retention: Duration,
    now: SystemTime,
    metrics: &MetricsClient,
    stats: &mut SweepStats,
) {
    let modified = match entry.metadata().and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot stat cache file");
            stats.errors += 1;
            return;
        }
    };

    // A modification time in the future reads as age zero.
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if age <= retention {
        stats.files_kept += 1;
        return;
    }

    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), age_secs = age.as_secs(), "cache file reaped");
            metrics.file_reaped();
            stats.files_deleted += 1;
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to reap cache file");
            stats.errors += 1;
        }
    }
}

fn inventory_dir(dir: &Path, files: &mut usize, bytes: &mut u64) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            inventory_dir(&entry.path(), files, bytes);
        } else if file_type.is_file() {
            *files += 1;
            if let Ok(meta) = entry.metadata() {
                *bytes += meta.len();
            }
            debug!(path = %entry.path().display(), "cache file present");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reaper(root: &Path, retention: Duration) -> CacheReaper {
        CacheReaper::new(
            root,
            retention,
            Duration::from_secs(3600),
            MetricsClient::disconnected(),
        )
    }

    fn write_file(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"bytes").unwrap();
    }

    #[tokio::test]
    async fn test_sweep_deletes_files_past_retention() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "products/products42/original");
        write_file(dir.path(), "products/products42/x300.jpg");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = reaper(dir.path(), Duration::from_millis(1)).sweep().await;

        assert_eq!(stats.files_deleted, 2);
        assert_eq!(stats.files_kept, 0);
        assert!(!dir.path().join("products").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_files() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "products/products42/x300.jpg");

        let stats = reaper(dir.path(), Duration::from_secs(3600)).sweep().await;

        assert_eq!(stats.files_deleted, 0);
        assert_eq!(stats.files_kept, 1);
        assert!(dir.path().join("products/products42/x300.jpg").exists());
    }

    #[tokio::test]
    async fn test_sweep_prunes_emptied_directories_only() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "old/entry/x300.jpg");
        tokio::time::sleep(Duration::from_millis(30)).await;
        let r = reaper(dir.path(), Duration::from_millis(10));
        write_file(dir.path(), "fresh/entry/x300.jpg");

        let stats = r.sweep().await;

        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.files_kept, 1);
        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("fresh/entry/x300.jpg").exists());
    }

    #[tokio::test]
    async fn test_preexisting_empty_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("products/abandoned")).unwrap();

        let stats = reaper(dir.path(), Duration::from_secs(3600)).sweep().await;

        assert_eq!(stats.dirs_deleted, 2);
        assert!(!dir.path().join("products").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_empty_root_survives_sweep() {
        let dir = TempDir::new().unwrap();

        let stats = reaper(dir.path(), Duration::from_millis(1)).sweep().await;

        assert_eq!(stats, SweepStats::default());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_run_sweeps_on_interval_until_cancelled() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "products/products42/x300.jpg");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let reaper = CacheReaper::new(
            dir.path(),
            Duration::from_millis(1),
            Duration::from_millis(20),
            MetricsClient::disconnected(),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reaper.run(shutdown.clone()));

        // Give the loop a few intervals to fire.
        for _ in 0..50 {
            if !dir.path().join("products").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!dir.path().join("products").exists());
        assert!(dir.path().exists());
    }
}
