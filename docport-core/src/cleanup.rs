//! Deferred cleanup of exported artifacts and staged imports, plus a guard
//! for temporary files owned by one operation.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cancelable deferred tasks keyed by id. A task removes itself from the
/// registry when it fires; scheduling an id again replaces the earlier task.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay` unless cancelled first.
    pub async fn schedule<F>(&self, id: impl Into<String>, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();

        // The lock is held across spawn so the task cannot remove itself
        // before its handle is registered.
        let mut guard = self.tasks.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            tasks.lock().await.remove(&task_id);
            debug!(task = %task_id, "Deferred cleanup ran");
        });
        if let Some(previous) = guard.insert(id, handle) {
            previous.abort();
        }
    }

    /// Cancel a pending task. Returns whether one was pending.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.tasks.lock().await.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Abort every pending task.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (id, handle) in tasks.drain() {
            debug!(task = %id, "Aborting deferred cleanup");
            handle.abort();
        }
    }
}

/// Removes a file or directory when dropped, unless [`TempPath::keep`] was
/// called.
#[derive(Debug)]
pub struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand back the path.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        };
        if let Err(err) = result {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to remove temporary path: {}", err);
            }
        }
    }
}
