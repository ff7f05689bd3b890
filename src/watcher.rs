//! Polling directory watcher.
//!
//! Detects the appearance of one new regular file in a drop directory. The
//! directory is listed once as a baseline, then re-listed every poll interval;
//! the first poll that shows a new regular file ends the watch.
//!
//! When several files land within the same interval, one of them is returned
//! and the rest are not reported by this watch. Directories created in the
//! drop folder are ignored. File contents are never inspected.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Absolute path of the newly observed file.
    Found(PathBuf),
    /// The shutdown signal fired before a new file appeared.
    Cancelled,
}

/// Process-wide stop signal shared by every watch, retry sleep, and server.
///
/// Clones observe the same state. Once triggered it stays triggered, so a
/// signal that arrives while no one is waiting is not lost.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// A handle triggered by the first Ctrl-C. A second Ctrl-C exits the process.
    pub fn on_ctrl_c() -> Self {
        let shutdown = Self::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "could not listen for Ctrl-C");
                return;
            }
            tracing::info!("interrupt received, stopping");
            trigger.trigger();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
        shutdown
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called on any clone.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DirectoryWatcher {
    dir: PathBuf,
    poll_interval: Duration,
}

impl DirectoryWatcher {
    /// Create a watcher for `dir`, creating the directory if it is missing.
    pub fn new(dir: &Path, poll_interval: Duration) -> Result<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create watch directory: {}", dir.display()))?;
            tracing::info!(dir = %dir.display(), "created watch directory");
        }

        let dir = std::fs::canonicalize(dir)
            .with_context(|| format!("Failed to resolve watch directory: {}", dir.display()))?;

        Ok(Self { dir, poll_interval })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Block until a new regular file appears or `shutdown` completes.
    ///
    /// The baseline is taken when the returned future is first polled.
    pub async fn watch<F>(&self, shutdown: F) -> Result<WatchOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut baseline = self.snapshot().await?;
        tracing::debug!(dir = %self.dir.display(), entries = baseline.len(), "watch baseline taken");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::debug!(dir = %self.dir.display(), "watch cancelled");
                    return Ok(WatchOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let current = self.snapshot().await?;
            for name in current.difference(&baseline) {
                let path = self.dir.join(name);
                let is_file = tokio::fs::metadata(&path)
                    .await
                    .map(|meta| meta.is_file())
                    .unwrap_or(false);
                if is_file {
                    tracing::debug!(path = %path.display(), "new file detected");
                    return Ok(WatchOutcome::Found(path));
                }
            }

            baseline = current;
        }
    }

    async fn snapshot(&self) -> Result<BTreeSet<OsString>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list watch directory: {}", self.dir.display()))?;

        let mut names = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            names.insert(entry.file_name());
        }
        Ok(names)
    }
}
