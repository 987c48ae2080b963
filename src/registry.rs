use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A file that can be fetched once with its token, until `expires_at`.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub path: PathBuf,
    pub expires_at: Instant,
}

/// In-memory map from single-use bearer tokens to produced files.
///
/// The lock is never held across an `.await` or file-system call.
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    records: Mutex<HashMap<String, DownloadRecord>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, DownloadRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `path` under a fresh random token valid for `ttl`.
    pub fn issue(&self, path: PathBuf, ttl: Duration) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let record = DownloadRecord {
            path,
            expires_at: Instant::now() + ttl,
        };
        self.records().insert(token.clone(), record);
        token
    }

    /// Looks up a token. Unknown, expired and file-gone all read as `None`.
    ///
    /// The record stays in place; call [`retire`](Self::retire) once the transfer is over.
    pub async fn redeem(&self, token: &str) -> Option<PathBuf> {
        let record = self.records().get(token).cloned()?;

        if record.expires_at <= Instant::now() {
            self.retire(token).await;
            return None;
        }

        match tokio::fs::try_exists(&record.path).await {
            Ok(true) => Some(record.path),
            _ => {
                tracing::debug!("Dropping stale token for {}", record.path.display());
                self.records().remove(token);
                None
            }
        }
    }

    /// Removes the record and deletes its file. Safe to call for an unknown token.
    pub async fn retire(&self, token: &str) {
        let removed = self.records().remove(token);
        if let Some(record) = removed {
            delete_file(&record.path).await;
        }
    }

    /// Drops every expired record and deletes its file, returning how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<DownloadRecord> = {
            let mut records = self.records();
            let tokens: Vec<String> = records
                .iter()
                .filter(|(_, r)| r.expires_at <= now)
                .map(|(t, _)| t.clone())
                .collect();
            tokens.iter().filter_map(|t| records.remove(t)).collect()
        };

        for record in &expired {
            delete_file(&record.path).await;
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn delete_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!("Cleaned up file: {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::error!("Error cleaning up {}: {}", path.display(), e),
    }
}
