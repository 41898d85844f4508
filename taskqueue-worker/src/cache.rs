//! The worker's submission cache (§4.8): a durable local buffer of results
//! that could not be delivered to the coordinator, retried on a timer and
//! drained before the worker claims new work.
//!
//! Adapted from the teacher's `reqpool` pool/backend split (add, remove,
//! get, with a TTL enforced at read time) but keyed to this crate's need
//! for an append-only file rather than a Redis/in-memory key-value store —
//! the spec calls for "a newline-delimited JSON file", which has no
//! equivalent backend in `reqpool`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskqueue_core::{Outcome, Payload};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub task_id: i64,
    pub outcome: Outcome,
    pub result: Payload,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(task_id: i64, outcome: Outcome, result: Payload) -> Self {
        CacheEntry { task_id, outcome, result, created_at: Utc::now() }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}

/// A file-backed queue of undelivered results. Not safe for concurrent
/// use from multiple processes; a single worker process owns its cache
/// file for its lifetime.
pub struct SubmissionCache {
    path: PathBuf,
    ttl: Duration,
}

impl SubmissionCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        SubmissionCache { path: path.into(), ttl }
    }

    /// Appends a new entry. Called when Submit hits a transport error or a
    /// transient coordinator failure (§4.7 step 5).
    pub async fn append(&self, entry: &CacheEntry) -> WorkerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let line = serde_json::to_string(entry).map_err(WorkerError::Serde)?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Loads every entry currently on disk, dropping any that failed to
    /// parse (a truncated line from a crash mid-write) rather than
    /// refusing to start.
    pub async fn load(&self) -> WorkerResult<Vec<CacheEntry>> {
        if !Path::new(&self.path).exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        let entries = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<CacheEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unparseable cache line");
                    None
                }
            })
            .collect();
        Ok(entries)
    }

    /// Overwrites the cache file with exactly `entries`, used after a
    /// drain cycle to persist whatever is still undelivered.
    pub async fn rewrite(&self, entries: &[CacheEntry]) -> WorkerResult<()> {
        if entries.is_empty() {
            if Path::new(&self.path).exists() {
                fs::remove_file(&self.path).await?;
            }
            return Ok(());
        }
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry).map_err(WorkerError::Serde)?);
            buf.push('\n');
        }
        fs::write(&self.path, buf).await?;
        Ok(())
    }

    /// Retries every cached entry against `submit`. Entries that ACK or
    /// REJECT are dropped; entries that hit a transient failure, or that
    /// have aged past the TTL, are handled per §4.8 and the survivors
    /// written back.
    pub async fn drain<F, Fut>(&self, submit: F) -> WorkerResult<usize>
    where
        F: Fn(CacheEntry) -> Fut,
        Fut: std::future::Future<Output = taskqueue_client::ClientResult<()>>,
    {
        let entries = self.load().await?;
        let mut survivors = Vec::new();
        let mut delivered = 0;

        for entry in entries {
            if entry.is_expired(self.ttl) {
                tracing::warn!(task_id = entry.task_id, "submission cache entry expired, discarding");
                continue;
            }
            match submit(entry.clone()).await {
                Ok(()) => {
                    delivered += 1;
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(task_id = entry.task_id, error = %e, "cached result rejected, discarding");
                }
                Err(e) => {
                    tracing::debug!(task_id = entry.task_id, error = %e, "cached result still undeliverable");
                    survivors.push(entry);
                }
            }
        }

        self.rewrite(&survivors).await?;
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_client::ClientError;

    fn temp_path() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.ndjson");
        std::mem::forget(dir);
        path
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let cache = SubmissionCache::new(temp_path(), Duration::from_secs(3600));
        let entry = CacheEntry::new(7, Outcome::Success, Payload(vec![1, 2, 3]));
        cache.append(&entry).await.unwrap();

        let loaded = cache.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task_id, 7);
    }

    #[tokio::test]
    async fn load_on_missing_file_is_empty() {
        let cache = SubmissionCache::new(temp_path(), Duration::from_secs(3600));
        assert!(cache.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_drops_acked_and_rejected_but_keeps_transient() {
        let cache = SubmissionCache::new(temp_path(), Duration::from_secs(3600));
        cache.append(&CacheEntry::new(1, Outcome::Success, Payload::default())).await.unwrap();
        cache.append(&CacheEntry::new(2, Outcome::Success, Payload::default())).await.unwrap();
        cache.append(&CacheEntry::new(3, Outcome::Success, Payload::default())).await.unwrap();

        let delivered = cache
            .drain(|entry| async move {
                match entry.task_id {
                    1 => Ok(()),
                    2 => Err(ClientError::Rejected("lease lost".to_string())),
                    _ => Err(ClientError::Coordinator { status: 503, message: "busy".to_string() }),
                }
            })
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        let remaining = cache.load().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, 3);
    }

    #[tokio::test]
    async fn expired_entries_are_discarded_without_retrying() {
        let cache = SubmissionCache::new(temp_path(), Duration::from_millis(1));
        cache.append(&CacheEntry::new(9, Outcome::Success, Payload::default())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let attempted = std::sync::atomic::AtomicBool::new(false);
        cache
            .drain(|_| {
                attempted.store(true, std::sync::atomic::Ordering::SeqCst);
                async move { Ok(()) }
            })
            .await
            .unwrap();

        assert!(!attempted.load(std::sync::atomic::Ordering::SeqCst));
        assert!(cache.load().await.unwrap().is_empty());
    }
}
