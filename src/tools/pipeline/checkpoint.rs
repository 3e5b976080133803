use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Pre-mutation snapshot of a single file.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    /// Prior content, or `None` when the file did not exist.
    pub prior: Option<Vec<u8>>,
    pub recorded_at: String,
}

/// Append-only history of file states captured before mutating tools run.
///
/// Entries are consumed last-in-first-out on rewind so a batch of writes can
/// be reverted in reverse order.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    entries: Mutex<Vec<CheckpointEntry>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Capture the current state of each path, in order. Missing files are
    /// recorded as not-existing so rewind can delete what the tool creates.
    pub async fn capture(&self, paths: &[PathBuf]) -> Result<usize> {
        let mut captured = Vec::with_capacity(paths.len());
        for path in paths {
            let prior = match tokio::fs::read(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to capture checkpoint for {}", path.display())
                    });
                }
            };
            captured.push(CheckpointEntry {
                path: path.clone(),
                prior,
                recorded_at: Utc::now().to_rfc3339(),
            });
        }

        let count = captured.len();
        self.lock().extend(captured);
        Ok(count)
    }

    /// Restore the most recent `count` entries, newest first.
    pub async fn rewind_last(&self, count: usize) -> Result<usize> {
        let to_restore: Vec<CheckpointEntry> = {
            let mut entries = self.lock();
            let start = entries.len().saturating_sub(count);
            entries.split_off(start)
        };

        let restored = to_restore.len();
        for entry in to_restore.into_iter().rev() {
            restore_entry(&entry).await?;
        }
        Ok(restored)
    }

    /// Restore every recorded entry, newest first, leaving the store empty.
    pub async fn rewind_all(&self) -> Result<usize> {
        let count = self.len();
        self.rewind_last(count).await
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Recorded paths, oldest first.
    pub fn recorded_paths(&self) -> Vec<PathBuf> {
        self.lock().iter().map(|entry| entry.path.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CheckpointEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

async fn restore_entry(entry: &CheckpointEntry) -> Result<()> {
    match &entry.prior {
        Some(bytes) => {
            if let Some(parent) = entry.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&entry.path, bytes)
                .await
                .with_context(|| format!("failed to restore {}", entry.path.display()))?;
        }
        None => {
            if path_exists(&entry.path).await {
                tokio::fs::remove_file(&entry.path)
                    .await
                    .with_context(|| format!("failed to remove {}", entry.path.display()))?;
            }
        }
    }
    Ok(())
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
