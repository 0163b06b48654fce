//! Retention for produced files.
//!
//! Two mechanisms share one window: a timer per produced file, and a sweep of
//! the whole output directory. The sweep also catches files whose timer was
//! lost, e.g. when the process restarted before it fired.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{
    sync::Mutex,
    task::{AbortHandle, JoinHandle},
    time::{self, Instant},
};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ScheduledRemoval {
    id: u64,
    handle: AbortHandle,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<PathBuf, ScheduledRemoval>,
}

/// Delayed deletions keyed by path. Timers run on the tokio clock.
#[derive(Debug, Clone, Default)]
pub struct CleanupScheduler {
    registry: Arc<Mutex<Registry>>,
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes `path` after `delay`. Scheduling a path again replaces its timer.
    pub async fn schedule(&self, path: PathBuf, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut registry = self.registry.lock().await;
        registry.next_id += 1;
        let id = registry.next_id;

        let task = tokio::spawn({
            let registry = Arc::clone(&self.registry);
            let path = path.clone();
            async move {
                time::sleep_until(deadline).await;
                remove_path(&path).await;

                let mut registry = registry.lock().await;
                if registry.entries.get(&path).is_some_and(|entry| entry.id == id) {
                    registry.entries.remove(&path);
                }
            }
        });

        let entry = ScheduledRemoval {
            id,
            handle: task.abort_handle(),
        };
        if let Some(previous) = registry.entries.insert(path, entry) {
            previous.handle.abort();
        }
    }

    /// Returns whether a pending timer was cancelled.
    pub async fn cancel(&self, path: &Path) -> bool {
        match self.registry.lock().await.entries.remove(path) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, path: &Path) -> bool {
        self.registry.lock().await.entries.contains_key(path)
    }

    pub async fn pending(&self) -> usize {
        self.registry.lock().await.entries.len()
    }
}

/// Output directory, retention window and the per-file timers.
#[derive(Debug, Clone)]
pub struct Janitor {
    output_dir: PathBuf,
    retention: Duration,
    scheduler: CleanupScheduler,
}

impl Janitor {
    pub fn new(output_dir: PathBuf, retention: Duration) -> Self {
        Self {
            output_dir,
            retention,
            scheduler: CleanupScheduler::new(),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    pub async fn schedule_removal(&self, path: PathBuf) {
        debug!("Scheduling removal of {:?} in {:?}", path, self.retention);
        self.scheduler.schedule(path, self.retention).await;
    }

    /// Removes entries older than the retention window. Returns how many were removed.
    ///
    /// Timers are keyed by canonical path, so the directory is resolved first
    /// and the removed paths line up with them even when it is a symlink.
    pub async fn sweep(&self) -> usize {
        let dir = tokio::fs::canonicalize(&self.output_dir)
            .await
            .unwrap_or_else(|_| self.output_dir.clone());
        let removed = sweep_expired(&dir, self.retention, SystemTime::now()).await;
        for path in &removed {
            self.scheduler.cancel(path).await;
        }
        removed.len()
    }

    /// Sweeps every `every`, starting one interval from now.
    pub fn spawn_periodic_sweep(&self, every: Duration) -> JoinHandle<()> {
        let janitor = self.clone();
        let start = Instant::now() + every;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(start, every);
            loop {
                ticker.tick().await;
                let removed = janitor.sweep().await;
                if removed > 0 {
                    info!("Periodic sweep removed {removed} expired file(s)");
                }
            }
        })
    }
}

/// Deletes every entry of `dir` modified more than `max_age` before `now`.
pub async fn sweep_expired(dir: &Path, max_age: Duration, now: SystemTime) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Failed to read output directory {:?}: {error}", dir);
            }
            return removed;
        }
    };

    loop {
        let maybe_entry = match entries.next_entry().await {
            Ok(value) => value,
            Err(error) => {
                warn!("Failed to iterate output directory {:?}: {error}", dir);
                break;
            }
        };

        let Some(entry) = maybe_entry else {
            break;
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Failed to get file info for {:?}: {error}", path);
                continue;
            }
        };

        let modified_at = match metadata.modified() {
            Ok(value) => value,
            Err(error) => {
                warn!("Failed to read modification time of {:?}: {error}", path);
                continue;
            }
        };

        let age = now.duration_since(modified_at).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => {
                info!("Deleted old file: {:?}", path);
                removed.push(path);
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Failed to delete file {:?}: {error}", path),
        }
    }

    removed
}

async fn remove_path(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Deleted expired file: {:?}", path),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!("Failed to delete file {:?}: {error}", path),
    }
}
