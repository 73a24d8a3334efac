use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use likesync_core::Item;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::coordinator::{DownloadCoordinator, RunResults};
use super::index::{IndexError, LocalIndex, LocalRecord};
use super::naming;
use super::reconcile;
use super::status::DownloadStatus;
use crate::acquire::TrackAcquirer;
use crate::catalog::{CatalogSource, SourceError};
use crate::tagger::MetadataTagger;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("catalog authentication unavailable: {0}")]
    AuthUnavailable(String),
    #[error("failed to fetch catalog: {0}")]
    CatalogFetch(String),
    #[error("local index unavailable: {0}")]
    Store(#[from] IndexError),
    #[error("a sync session is already running")]
    Busy,
}

#[derive(Debug, Error)]
enum RemovalError {
    #[error("failed to remove {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub concurrency: usize,
    pub fetch_attempts: u32,
    pub backoff: Backoff,
    /// Treat an empty remote listing as suspicious and keep the library.
    pub protect_empty_remote: bool,
    /// Move removed files to the desktop trash instead of unlinking them.
    pub use_trash: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            fetch_attempts: 4,
            backoff: Backoff::default(),
            protect_empty_remote: false,
            use_trash: false,
        }
    }
}

/// What one session did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionResult {
    pub remote_total: usize,
    pub already_present: usize,
    pub removed: usize,
    pub results: RunResults,
}

impl SessionResult {
    pub fn completed(&self) -> usize {
        self.results.values().filter(|s| !s.is_failed()).count()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, status)| status.is_failed())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Fetch, reconcile, delete, acquire. At most one session runs at a time.
pub struct SyncService<C, A, T> {
    catalog: C,
    index: LocalIndex,
    coordinator: DownloadCoordinator<A, T>,
    options: SyncOptions,
    session: tokio::sync::Mutex<()>,
    last_results: std::sync::Mutex<HashMap<String, DownloadStatus>>,
}

impl<C, A, T> SyncService<C, A, T>
where
    C: CatalogSource,
    A: TrackAcquirer,
    T: MetadataTagger,
{
    pub fn new(
        catalog: C,
        index: LocalIndex,
        coordinator: DownloadCoordinator<A, T>,
        options: SyncOptions,
    ) -> Self {
        Self {
            catalog,
            index,
            coordinator,
            options,
            session: tokio::sync::Mutex::new(()),
            last_results: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Status of every item touched by previous sessions, latest wins.
    pub fn last_results(&self) -> HashMap<String, DownloadStatus> {
        self.last_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn start_sync(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SessionResult, SessionError> {
        let _session = self.session.try_lock().map_err(|_| SessionError::Busy)?;

        let remote = self.fetch_remote().await?;
        let local_ids = self.index.list_ids().await?;
        let plan = reconcile::diff(&remote, &local_ids);
        tracing::info!(
            remote = plan.remote_ids.len(),
            local = local_ids.len(),
            to_add = plan.to_add.len(),
            to_remove = plan.to_remove.len(),
            "reconciled library"
        );

        let removed = if plan.remote_ids.is_empty()
            && !local_ids.is_empty()
            && self.options.protect_empty_remote
        {
            tracing::warn!(
                local = local_ids.len(),
                "remote catalog is empty, keeping local library"
            );
            0
        } else {
            self.delete_removed(&plan.remote_ids).await?
        };

        let already_present = plan.already_present();
        let results = self
            .coordinator
            .run(plan.to_add, self.options.concurrency, cancel)
            .await;
        self.remember(&results, true);

        let result = SessionResult {
            remote_total: plan.remote_ids.len(),
            already_present,
            removed,
            results,
        };
        tracing::info!(
            completed = result.completed(),
            failed = result.failed_ids().len(),
            removed = result.removed,
            "sync session finished"
        );
        Ok(result)
    }

    /// Re-runs acquisition for the given ids that failed in an earlier
    /// session. Ids that completed, were never seen or are no longer liked
    /// remotely are skipped.
    pub async fn retry_failed(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<SessionResult, SessionError> {
        let _session = self.session.try_lock().map_err(|_| SessionError::Busy)?;

        let failed: HashSet<String> = {
            let last = self.last_results.lock().unwrap_or_else(|e| e.into_inner());
            ids.iter()
                .filter(|id| last.get(id.as_str()).is_some_and(|s| s.is_failed()))
                .cloned()
                .collect()
        };
        if failed.is_empty() {
            return Ok(SessionResult::default());
        }

        let remote = self.fetch_remote().await?;
        let mut retry: Vec<Item> = Vec::new();
        for item in &remote {
            if failed.contains(&item.id) && !self.index.contains(&item.id).await? {
                retry.push(item.clone());
            }
        }
        tracing::info!(requested = ids.len(), retrying = retry.len(), "retrying failed items");

        let results = self
            .coordinator
            .run(retry, self.options.concurrency, cancel)
            .await;
        self.remember(&results, false);
        Ok(SessionResult {
            remote_total: remote.len(),
            already_present: 0,
            removed: 0,
            results,
        })
    }

    /// Deletes every indexed record whose id is not in `remote_ids`, together
    /// with its file. A record whose file can't be removed stays indexed.
    pub async fn delete_removed(&self, remote_ids: &HashSet<String>) -> Result<usize, IndexError> {
        let records = self.index.list_all().await?;
        // Liked tracks with the same title and artist resolve to one file,
        // whether their path is stored or derived from the naming rule.
        let mut references: HashMap<PathBuf, usize> = HashMap::new();
        for record in &records {
            if let Some(path) = self.record_path(record) {
                *references.entry(path).or_default() += 1;
            }
        }
        let stale: Vec<LocalRecord> = records
            .into_iter()
            .filter(|record| !remote_ids.contains(&record.id))
            .collect();

        let mut removed = 0;
        for record in &stale {
            match self.remove_record(record, &mut references).await {
                Ok(()) => {
                    tracing::info!(id = %record.id, title = %record.title, "removed unliked track");
                    removed += 1;
                }
                Err(err) => tracing::warn!(id = %record.id, %err, "failed to remove track"),
            }
        }
        Ok(removed)
    }

    async fn remove_record(
        &self,
        record: &LocalRecord,
        references: &mut HashMap<PathBuf, usize>,
    ) -> Result<(), RemovalError> {
        let path = self.record_path(record);
        if let Some(path) = &path {
            if references.get(path).copied().unwrap_or(0) <= 1 {
                remove_track_file(path, self.options.use_trash).await?;
            }
        }
        self.index.delete(&record.id).await?;
        if let Some(count) = path.and_then(|path| references.get_mut(&path)) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    fn record_path(&self, record: &LocalRecord) -> Option<PathBuf> {
        if let Some(path) = &record.path {
            return Some(path.clone());
        }
        let config = self.coordinator.config();
        naming::track_path_for(
            &config.library_root,
            &record.title,
            &record.artist,
            &config.audio_format,
        )
        .ok()
    }

    async fn fetch_remote(&self) -> Result<Vec<Item>, SessionError> {
        let attempts = self.options.fetch_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.catalog.fetch_all().await {
                Ok(items) => return Ok(items),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.options.backoff.delay(attempt, err.retry_after());
                    tracing::warn!(attempt, ?delay, %err, "catalog fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn remember(&self, results: &RunResults, replace: bool) {
        let mut last = self.last_results.lock().unwrap_or_else(|e| e.into_inner());
        if replace {
            last.clear();
        }
        last.extend(results.iter().map(|(id, status)| (id.clone(), *status)));
    }
}

async fn remove_track_file(path: &Path, use_trash: bool) -> Result<(), RemovalError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    let result = if use_trash {
        let target = path.to_path_buf();
        match tokio::task::spawn_blocking(move || trash::delete(&target)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(std::io::Error::other(err.to_string())),
            Err(err) => Err(std::io::Error::other(err.to_string())),
        }
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RemovalError::File {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl From<SourceError> for SessionError {
    fn from(err: SourceError) -> Self {
        if err.is_auth() {
            SessionError::AuthUnavailable(err.to_string())
        } else {
            SessionError::CatalogFetch(err.to_string())
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
