use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use likesync_core::Item;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::index::{LocalIndex, LocalRecord};
use super::naming;
use super::queue::WorkQueue;
use super::status::{DownloadStatus, FailureReason, StatusReporter};
use crate::acquire::{AcquireRequest, ConversionSignal, TrackAcquirer};
use crate::tagger::{MetadataTagger, TrackTags};

const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(600);

/// Final status of every item handed to one `run`, keyed by id.
pub type RunResults = BTreeMap<String, DownloadStatus>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub library_root: PathBuf,
    pub audio_format: String,
    pub item_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
            audio_format: "mp3".to_string(),
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }
}

pub fn search_query(item: &Item) -> String {
    format!("{} {} official audio", item.title, item.artist)
}

/// Drives the acquire -> tag -> index pipeline for a batch of items on a
/// fixed number of workers.
pub struct DownloadCoordinator<A, T> {
    acquirer: Arc<A>,
    tagger: Arc<T>,
    index: LocalIndex,
    reporter: StatusReporter,
    config: Arc<CoordinatorConfig>,
    path_locks: PathLocks,
}

impl<A, T> Clone for DownloadCoordinator<A, T> {
    fn clone(&self) -> Self {
        Self {
            acquirer: Arc::clone(&self.acquirer),
            tagger: Arc::clone(&self.tagger),
            index: self.index.clone(),
            reporter: self.reporter.clone(),
            config: Arc::clone(&self.config),
            path_locks: self.path_locks.clone(),
        }
    }
}

impl<A: TrackAcquirer, T: MetadataTagger> DownloadCoordinator<A, T> {
    pub fn new(
        acquirer: Arc<A>,
        tagger: Arc<T>,
        index: LocalIndex,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            acquirer,
            tagger,
            index,
            reporter: StatusReporter::disabled(),
            config: Arc::new(config),
            path_locks: PathLocks::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Processes `items` with at most `concurrency` pipelines in flight.
    ///
    /// Repeated ids are processed once. Once `cancel` fires no new item is
    /// dispatched; running ones finish. Every returned status is terminal.
    pub async fn run(
        &self,
        items: Vec<Item>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> RunResults {
        let queue = WorkQueue::from_items(items);
        if queue.is_empty() {
            return RunResults::new();
        }
        let tracker = Tracker::new(self.reporter.clone());
        for item in queue.iter() {
            tracker.start(&item.id);
        }
        let workers = concurrency.clamp(1, queue.len());
        tracing::info!(items = queue.len(), workers, "starting downloads");

        let queue = Arc::new(tokio::sync::Mutex::new(queue));
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let this = self.clone();
            let queue = Arc::clone(&queue);
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            pool.spawn(async move { this.worker_loop(worker, queue, tracker, cancel).await });
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                tracing::error!(%err, "download worker stopped unexpectedly");
            }
        }

        let undispatched = queue.lock().await.drain_remaining();
        let reason = if cancel.is_cancelled() {
            FailureReason::Cancelled
        } else {
            FailureReason::Internal
        };
        for item in &undispatched {
            tracker.advance(&item.id, DownloadStatus::Failed(reason));
        }
        tracker.finish()
    }

    async fn worker_loop(
        &self,
        worker: usize,
        queue: Arc<tokio::sync::Mutex<WorkQueue>>,
        tracker: Tracker,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(worker, "cancelled, not dispatching further items");
                break;
            }
            let Some(item) = queue.lock().await.dequeue() else {
                break;
            };
            let status = self.process_item(&item, &tracker).await;
            tracing::debug!(worker, id = %item.id, ?status, "item finished");
        }
    }

    async fn process_item(&self, item: &Item, tracker: &Tracker) -> DownloadStatus {
        let id = item.id.as_str();
        match self.index.contains(id).await {
            Ok(true) => {
                tracing::debug!(%id, "already indexed, skipping acquisition");
                return tracker.advance(id, DownloadStatus::Completed);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(%id, %err, "index lookup failed");
                return tracker.fail(id, FailureReason::StoreFailure);
            }
        }

        tracker.advance(id, DownloadStatus::Searching);
        let base_name = match naming::base_name(&item.title, &item.artist) {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(%id, %err, "cannot name track");
                return tracker.fail(id, FailureReason::NoResultFound);
            }
        };
        let request = AcquireRequest {
            query: search_query(item),
            output_dir: self.config.library_root.clone(),
            base_name,
            format: self.config.audio_format.clone(),
        };
        let target = request.target_path();
        // Ids that resolve to the same file take turns from here until the
        // file is either indexed or cleaned up.
        let _guard = self.path_locks.lock(&target).await;
        let before = files_with_stem(&request.output_dir, &request.base_name).await;

        let work = self.acquire_and_tag(item, &request, tracker);
        let outcome = match tokio::time::timeout(self.config.item_timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(%id, timeout = ?self.config.item_timeout, "item timed out");
                Err(FailureReason::Timeout)
            }
        };

        let path = match outcome {
            Ok(path) => path,
            Err(reason) => {
                self.discard_new_files(&request, &before).await;
                return tracker.fail(id, reason);
            }
        };

        let record = LocalRecord::new(id, &item.title, &item.artist, Some(path.clone()));
        if let Err(err) = self.index.put(&record).await {
            tracing::warn!(%id, %err, "failed to index acquired track");
            if !before.contains(&path) {
                discard(&path).await;
            }
            return tracker.fail(id, FailureReason::StoreFailure);
        }
        tracing::info!(%id, path = %path.display(), "track acquired");
        tracker.advance(id, DownloadStatus::Completed)
    }

    /// Removes output left behind by a failed attempt: the target itself and
    /// backend leftovers such as `<stem>.webm` or `<stem>.mp3.part`. Files
    /// that were there before the attempt or that a record points at stay.
    async fn discard_new_files(&self, request: &AcquireRequest, before: &HashSet<PathBuf>) {
        let after = files_with_stem(&request.output_dir, &request.base_name).await;
        for path in after.difference(before) {
            match self.index.count_with_path(path).await {
                Ok(0) => discard(path).await,
                Ok(_) => tracing::debug!(path = %path.display(), "file is indexed, keeping it"),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "cannot check file, keeping it")
                }
            }
        }
    }

    // Acquisition and tagging. Only this part runs under the item timeout.
    async fn acquire_and_tag(
        &self,
        item: &Item,
        request: &AcquireRequest,
        tracker: &Tracker,
    ) -> Result<PathBuf, FailureReason> {
        let id = item.id.clone();
        let converting = {
            let tracker = tracker.clone();
            let id = id.clone();
            ConversionSignal::new(move || {
                tracker.advance(&id, DownloadStatus::Converting);
            })
        };

        let path = self
            .acquirer
            .acquire(request, &converting)
            .await
            .map_err(|err| {
                tracing::warn!(%id, %err, "acquisition failed");
                err.reason()
            })?;
        converting.fire();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::warn!(%id, path = %path.display(), "acquired file is missing");
            return Err(FailureReason::ConversionFailure);
        }

        tracker.advance(&id, DownloadStatus::Tagging);
        let tags = TrackTags {
            title: item.title.clone(),
            artist: item.artist.clone(),
            album: item.album.clone(),
            cover_url: item.cover_url.clone(),
        };
        if let Err(err) = self.tagger.tag(&path, &tags).await {
            tracing::warn!(%id, %err, "tagging failed, discarding file");
            if path != request.target_path() {
                discard(&path).await;
            }
            return Err(FailureReason::MetadataFailure);
        }
        Ok(path)
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), %err, "failed to discard file"),
    }
}

/// Files in `dir` named `<stem>.<anything>`.
async fn files_with_stem(dir: &Path, stem: &str) -> HashSet<PathBuf> {
    let prefix = format!("{stem}.");
    let mut out = HashSet::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return out;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix));
        if matches {
            out.insert(entry.path());
        }
    }
    out
}

/// One async lock per output file.
#[derive(Clone, Default)]
struct PathLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PathLocks {
    async fn lock(&self, path: &Path) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Current status per id for one run. Every transition goes through here so
/// the stored status and the emitted event can't disagree.
#[derive(Clone)]
struct Tracker {
    statuses: Arc<Mutex<HashMap<String, DownloadStatus>>>,
    reporter: StatusReporter,
}

impl Tracker {
    fn new(reporter: StatusReporter) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(HashMap::new())),
            reporter,
        }
    }

    fn start(&self, id: &str) {
        let mut statuses = self.lock();
        statuses.insert(id.to_string(), DownloadStatus::Pending);
        self.reporter.report(id, DownloadStatus::Pending);
    }

    /// Applies `next` if it moves the item forward and returns the status the
    /// item ends up in.
    fn advance(&self, id: &str, next: DownloadStatus) -> DownloadStatus {
        let mut statuses = self.lock();
        let current = statuses
            .get(id)
            .copied()
            .unwrap_or(DownloadStatus::Pending);
        if !current.can_advance_to(next) {
            tracing::debug!(%id, ?current, ?next, "ignoring out-of-order status");
            return current;
        }
        statuses.insert(id.to_string(), next);
        self.reporter.report(id, next);
        next
    }

    fn fail(&self, id: &str, reason: FailureReason) -> DownloadStatus {
        self.advance(id, DownloadStatus::Failed(reason))
    }

    fn finish(&self) -> RunResults {
        let statuses = self.lock().clone();
        let mut out = RunResults::new();
        for (id, status) in statuses {
            let status = if status.is_terminal() {
                status
            } else {
                // A worker died mid-pipeline.
                self.advance(&id, DownloadStatus::Failed(FailureReason::Internal))
            };
            out.insert(id, status);
        }
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DownloadStatus>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
