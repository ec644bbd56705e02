use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::build_data::{BuildDataItem, InitialBuildData, LoadedBuildData};
use super::diff::TaskDiffData;
use super::directory::BuildDirectory;
use super::history::visible_history;
use super::pipeline::{BatchSummary, FetchPipeline, LoadedObserver, PipelineOptions};
use super::source::BuildSource;
use crate::error::{QuirrusError, Result};

pub const DEFAULT_DIFF_LOG: &str = "snapshot_generation.log";

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub builds_per_branch: usize,
    pub max_concurrent_fetches: Option<usize>,
    pub refresh_interval: Duration,
    pub diff_log_name: String,
    pub diff_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            builds_per_branch: 10,
            max_concurrent_fetches: None,
            refresh_interval: Duration::from_secs(20),
            diff_log_name: DEFAULT_DIFF_LOG.to_string(),
            diff_timeout: Duration::from_secs(30),
        }
    }
}

/// Loads per-branch build windows into a shared directory and keeps them fresh.
pub struct BuildDataManager<S: BuildSource> {
    inner: Arc<Inner<S>>,
    refresh_job: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<S: BuildSource> {
    source: Arc<S>,
    directory: BuildDirectory,
    options: ManagerOptions,
    pipeline: Mutex<Option<Arc<FetchPipeline>>>,
    diffs: Arc<DiffLoader<S>>,
}

/// Fetches and parses the diff log of every task that carries a diff report.
struct DiffLoader<S: BuildSource> {
    source: Arc<S>,
    directory: BuildDirectory,
    log_name: String,
    timeout: Duration,
    jobs: Mutex<JoinSet<()>>,
}

impl<S: BuildSource> BuildDataManager<S> {
    pub fn new(source: Arc<S>, options: ManagerOptions) -> Self {
        let directory = BuildDirectory::new();
        let diffs = Arc::new(DiffLoader {
            source: Arc::clone(&source),
            directory: directory.clone(),
            log_name: options.diff_log_name.clone(),
            timeout: options.diff_timeout,
            jobs: Mutex::new(JoinSet::new()),
        });

        Self {
            inner: Arc::new(Inner {
                source,
                directory,
                options,
                pipeline: Mutex::new(None),
                diffs,
            }),
            refresh_job: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &BuildDirectory {
        &self.inner.directory
    }

    pub fn get_build_data(&self, id: &str) -> Option<BuildDataItem> {
        self.inner.directory.get(id)
    }

    pub fn task_diff(&self, task_id: &str) -> Option<TaskDiffData> {
        self.inner.directory.task_diff(task_id)
    }

    /// Branch history as displayed: newest first, stale builds filtered.
    pub fn history(&self, branch: &str) -> Vec<BuildDataItem> {
        visible_history(self.inner.directory.branch_items(branch))
    }

    /// Drops all data and loads the latest builds of every branch.
    ///
    /// The build listings of all branches are fetched before anything is
    /// loaded; a failing listing aborts the whole reload.
    pub async fn reload(
        &self,
        repository_id: &str,
        branches: &[String],
    ) -> Result<Vec<(String, BatchSummary)>> {
        self.shutdown().await;
        self.inner.directory.clear();

        let count = self.inner.options.builds_per_branch;
        let listings = join_all(branches.iter().map(|branch| {
            self.inner
                .source
                .fetch_recent_builds(repository_id, branch, count, None)
        }))
        .await;

        let mut batches = Vec::with_capacity(branches.len());
        for (branch, listing) in branches.iter().zip(listings) {
            let builds = listing?;
            info!("Loading {} builds of branch '{branch}'", builds.len());
            batches.push((branch.clone(), builds));
        }

        let pending: Vec<_> = batches
            .into_iter()
            .map(|(branch, builds)| {
                let to_load = self.inner.directory.register_branch(&branch, builds);
                (branch, self.inner.start_batch(to_load))
            })
            .collect();

        let mut summaries = Vec::with_capacity(pending.len());
        for (branch, batch) in pending {
            summaries.push((branch, batch?.await.map_err(|_| QuirrusError::PipelineCancelled)?));
        }
        Ok(summaries)
    }

    /// Loads the latest builds of one branch, keeping what is already loaded.
    pub async fn load_branch(&self, repository_id: &str, branch: &str) -> Result<BatchSummary> {
        let builds = self
            .inner
            .source
            .fetch_recent_builds(repository_id, branch, self.inner.options.builds_per_branch, None)
            .await?;
        let to_load = self.inner.directory.register_branch(branch, builds);
        self.inner.await_batch(to_load).await
    }

    /// Extends a branch's window with `count` builds older than its oldest one.
    pub async fn load_older(
        &self,
        repository_id: &str,
        branch: &str,
        count: usize,
    ) -> Result<BatchSummary> {
        let oldest = self
            .inner
            .directory
            .builds_of_branch(branch)
            .last()
            .and_then(|id| self.inner.directory.get(id))
            .map(|item| item.info().build_created_timestamp);

        let Some(before) = oldest else {
            return self.load_branch(repository_id, branch).await;
        };

        let builds = self
            .inner
            .source
            .fetch_recent_builds(repository_id, branch, count, Some(before))
            .await?;
        let to_load = self.inner.directory.append_older(branch, builds);
        self.inner.await_batch(to_load).await
    }

    /// One auto-refresh round for a branch.
    pub async fn refresh_branch(&self, repository_id: &str, branch: &str) -> Result<()> {
        self.inner.refresh_branch(repository_id, branch).await
    }

    /// Polls every branch each `refresh_interval`, starting one interval from
    /// now. Failures are logged and polling continues.
    pub fn start_background_refresh(&self, repository_id: String, branches: Vec<String>) {
        self.stop_background_refresh();

        let inner = Arc::clone(&self.inner);
        let period = inner.options.refresh_interval;
        let job = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for branch in &branches {
                    if let Err(e) = inner.refresh_branch(&repository_id, branch).await {
                        warn!("Auto-refresh of branch '{branch}' failed: {e}");
                    }
                }
            }
        });
        *self.refresh_job.lock() = Some(job);
    }

    pub fn stop_background_refresh(&self) {
        if let Some(job) = self.refresh_job.lock().take() {
            job.abort();
        }
    }

    pub fn is_background_refresh_running(&self) -> bool {
        self.refresh_job
            .lock()
            .as_ref()
            .is_some_and(|job| !job.is_finished())
    }

    /// Like [`cancel`](Self::cancel), but returns only once neither the
    /// pipeline nor a diff download can write to the directory anymore.
    pub async fn shutdown(&self) {
        let pipeline = self.inner.pipeline.lock().take();
        if let Some(pipeline) = pipeline {
            pipeline.shutdown().await;
        }
        let mut jobs = std::mem::take(&mut *self.inner.diffs.jobs.lock());
        jobs.shutdown().await;
    }

    /// Cancels the pipeline and any diff downloads. Loaded data stays.
    pub fn cancel(&self) {
        if let Some(pipeline) = self.inner.pipeline.lock().take() {
            pipeline.cancel();
        }
        self.inner.diffs.jobs.lock().abort_all();
    }
}

impl<S: BuildSource> Drop for BuildDataManager<S> {
    fn drop(&mut self) {
        self.stop_background_refresh();
        self.cancel();
    }
}

impl<S: BuildSource> Inner<S> {
    /// The running pipeline, started on first use or after a cancel.
    fn pipeline(&self) -> Arc<FetchPipeline> {
        let mut pipeline = self.pipeline.lock();
        match pipeline.as_ref() {
            Some(running) if !running.is_cancelled() => Arc::clone(running),
            _ => {
                let diffs = Arc::clone(&self.diffs);
                let observer: LoadedObserver =
                    Arc::new(move |loaded: &Arc<LoadedBuildData>| diffs.load_for(loaded));
                let started = Arc::new(FetchPipeline::start(
                    Arc::clone(&self.source),
                    self.directory.clone(),
                    PipelineOptions {
                        max_concurrent_fetches: self.options.max_concurrent_fetches,
                    },
                    Some(observer),
                ));
                *pipeline = Some(Arc::clone(&started));
                started
            }
        }
    }

    fn start_batch(&self, items: Vec<InitialBuildData>) -> Result<oneshot::Receiver<BatchSummary>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.pipeline().load_batch(items, move |summary| {
            let _ = done_tx.send(summary);
        })?;
        Ok(done_rx)
    }

    async fn await_batch(&self, items: Vec<InitialBuildData>) -> Result<BatchSummary> {
        self.start_batch(items)?
            .await
            .map_err(|_| QuirrusError::PipelineCancelled)
    }

    /// Adds builds newer than the known head, then re-fetches the newest
    /// loaded build and every loaded build with tasks still in progress.
    /// Failed builds are left alone.
    async fn refresh_branch(&self, repository_id: &str, branch: &str) -> Result<()> {
        let latest = self
            .source
            .fetch_recent_builds(repository_id, branch, self.options.builds_per_branch, None)
            .await?;

        let new_builds = self.directory.merge_newer(branch, latest);
        if !new_builds.is_empty() {
            info!("Found {} new builds on branch '{branch}'", new_builds.len());
        }

        let mut to_reload = Vec::new();
        let mut newest_loaded_seen = false;
        for id in self.directory.builds_of_branch(branch) {
            if let Some(loaded) = self.directory.get_loaded(&id) {
                if !newest_loaded_seen || loaded.has_in_progress_tasks() {
                    to_reload.push(loaded.info.clone());
                }
                newest_loaded_seen = true;
            }
        }

        let pipeline = self.pipeline();
        pipeline.load_batch(new_builds, |_| {})?;
        for info in to_reload {
            debug!("Refreshing build {} of branch '{branch}'", info.id);
            pipeline.reload(info, None)?;
        }
        Ok(())
    }
}

impl<S: BuildSource> DiffLoader<S> {
    fn load_for(&self, loaded: &LoadedBuildData) {
        let mut jobs = self.jobs.lock();
        while jobs.try_join_next().is_some() {}

        for task in loaded.build.tasks.iter().filter(|task| task.has_diff_report()) {
            if self.directory.task_diff(&task.id).is_some() {
                continue;
            }

            let source = Arc::clone(&self.source);
            let directory = self.directory.clone();
            let log_name = self.log_name.clone();
            let timeout = self.timeout;
            let task_id = task.id.clone();
            let task_name = task.name.clone();
            jobs.spawn(async move {
                match tokio::time::timeout(timeout, source.fetch_log(&task_id, &log_name)).await {
                    Ok(Ok(log)) => directory.set_task_diff(&task_id, TaskDiffData::parse(&log)),
                    Ok(Err(e)) => {
                        warn!("Failed to load diff data for '{task_name}' ({task_id}): {e}")
                    }
                    Err(_) => warn!(
                        "Loading diff data for '{task_name}' ({task_id}) timed out after {timeout:?}"
                    ),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::board::build_data::fixtures::info;
    use crate::board::source::fake::FakeSource;
    use crate::board::status::StatusCategory;
    use crate::cirrus::types::fixtures::{build, diff_task, failed_task, task};

    fn options() -> ManagerOptions {
        ManagerOptions {
            builds_per_branch: 3,
            refresh_interval: Duration::from_millis(20),
            diff_timeout: Duration::from_secs(5),
            ..ManagerOptions::default()
        }
    }

    fn source() -> FakeSource {
        FakeSource::default()
            .with_branch(
                "main",
                vec![
                    info("c", 3, None),
                    info("b", 2, None),
                    info("a", 1, None),
                ],
            )
            .with_build(build("a", 1, vec![task("qa", "COMPLETED", 1)]))
            .with_build(build("b", 2, vec![failed_task("qa", "analyze", 2)]))
            .with_build(build("c", 3, vec![task("qa", "EXECUTING", 3)]))
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_reload_loads_every_branch() {
        let manager = BuildDataManager::new(Arc::new(source()), options());

        let summaries = manager.reload("42", &["main".to_string()]).await.unwrap();

        assert_eq!(summaries, vec![("main".to_string(), BatchSummary { loaded: 3, failed: 0 })]);
        let b = manager.get_build_data("b").unwrap();
        let b = b.as_loaded().unwrap();
        assert_eq!(b.info.previous_build_id.as_deref(), Some("a"));
        assert_eq!(b.reference_id.as_deref(), Some("a"));
        assert!(b.metadata_by_name["qa"].status.is_new);
    }

    #[tokio::test]
    async fn test_reload_discards_fetches_of_previous_reload() {
        let fake = Arc::new(
            FakeSource::default()
                .with_branch("main", vec![info("a", 1, None)])
                .with_build(build("a", 1, vec![task("qa", "COMPLETED", 1)])),
        );
        let release_a = fake.gate("a");
        let manager = BuildDataManager::new(Arc::clone(&fake), options());
        let branches = ["main".to_string()];

        let stuck = tokio::time::timeout(Duration::from_millis(20), manager.reload("42", &branches));
        assert!(stuck.await.is_err());

        fake.recent
            .lock()
            .insert("main".to_string(), vec![info("b", 2, None)]);
        fake.details
            .lock()
            .insert("b".to_string(), Ok(build("b", 2, vec![task("qa", "COMPLETED", 2)])));
        let summaries = manager.reload("42", &branches).await.unwrap();
        let _ = release_a.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(summaries, vec![("main".to_string(), BatchSummary { loaded: 1, failed: 0 })]);
        assert!(manager.get_build_data("a").is_none());
        assert!(manager.get_build_data("b").unwrap().is_loaded());
    }

    #[tokio::test]
    async fn test_failing_listing_aborts_reload() {
        let fake = source();
        *fake.failing_listing.lock() = true;
        let manager = BuildDataManager::new(Arc::new(fake), options());

        assert_err!(manager.reload("42", &["main".to_string()]).await);
        assert!(manager.directory().is_empty());
    }

    #[tokio::test]
    async fn test_load_older_extends_the_window() {
        let options = ManagerOptions {
            builds_per_branch: 2,
            ..options()
        };
        let manager = BuildDataManager::new(Arc::new(source()), options);

        assert_ok!(manager.load_branch("42", "main").await);
        assert_eq!(manager.directory().builds_of_branch("main"), vec!["c", "b"]);

        let summary = manager.load_older("42", "main", 5).await.unwrap();

        assert_eq!(summary, BatchSummary { loaded: 1, failed: 0 });
        assert_eq!(manager.directory().builds_of_branch("main"), vec!["c", "b", "a"]);
        let b = manager.directory().get_loaded("b").unwrap();
        assert_eq!(b.reference_id.as_deref(), Some("a"));
        assert_eq!(
            b.metadata_by_name["qa"].status.category,
            StatusCategory::FailAnalyze
        );
    }

    #[tokio::test]
    async fn test_diff_reports_are_loaded_for_fetched_builds() {
        let fake = FakeSource::default()
            .with_branch("main", vec![info("a", 1, None)])
            .with_build(build("a", 1, vec![diff_task("snapshot", 1)]))
            .with_log("snapshot-1", "x:S1234\": 2\nNEW: 5, CHANGED: 1, ABSENT: 3");
        let manager = BuildDataManager::new(Arc::new(fake), options());

        assert_ok!(manager.reload("42", &["main".to_string()]).await);
        wait_until(|| manager.task_diff("snapshot-1").is_some()).await;

        let diff = manager.task_diff("snapshot-1").unwrap();
        assert_eq!(diff.rules.get("S1234"), Some(&2));
        assert_eq!(diff.new_count, Some(5));
        assert_eq!(diff.absent_count, Some(3));
    }

    #[tokio::test]
    async fn test_refresh_adds_new_builds_and_refetches_in_progress_ones() {
        let fake = Arc::new(source());
        let manager = BuildDataManager::new(Arc::clone(&fake), options());
        assert_ok!(manager.reload("42", &["main".to_string()]).await);
        assert_eq!(fake.detail_fetches(), 3);

        fake.recent.lock().insert(
            "main".to_string(),
            vec![info("d", 4, None), info("c", 3, None), info("b", 2, None)],
        );
        fake.details
            .lock()
            .insert("d".to_string(), Ok(build("d", 4, vec![task("qa", "COMPLETED", 4)])));
        fake.details
            .lock()
            .insert("c".to_string(), Ok(build("c", 3, vec![task("qa", "COMPLETED", 3)])));

        assert_ok!(manager.refresh_branch("42", "main").await);
        wait_until(|| manager.directory().get("d").is_some_and(|item| item.is_loaded())).await;
        wait_until(|| {
            manager
                .directory()
                .get_loaded("c")
                .is_some_and(|c| !c.has_in_progress_tasks())
        })
        .await;

        assert_eq!(
            manager.directory().builds_of_branch("main"),
            vec!["d", "c", "b", "a"]
        );
        // d is new, c was the newest loaded build and in progress.
        assert_eq!(fake.detail_fetches(), 5);
    }

    #[tokio::test]
    async fn test_background_refresh_can_be_stopped() {
        let fake = Arc::new(source());
        let manager = BuildDataManager::new(Arc::clone(&fake), options());
        assert_ok!(manager.reload("42", &["main".to_string()]).await);

        manager.start_background_refresh("42".to_string(), vec!["main".to_string()]);
        assert!(manager.is_background_refresh_running());
        wait_until(|| fake.detail_fetches() > 3).await;

        manager.stop_background_refresh();
        assert!(!manager.is_background_refresh_running());
    }

    #[tokio::test]
    async fn test_background_refresh_survives_errors() {
        let fake = Arc::new(source());
        let manager = BuildDataManager::new(Arc::clone(&fake), options());
        assert_ok!(manager.reload("42", &["main".to_string()]).await);

        *fake.failing_listing.lock() = true;
        manager.start_background_refresh("42".to_string(), vec!["main".to_string()]);
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(manager.is_background_refresh_running());

        *fake.failing_listing.lock() = false;
        wait_until(|| fake.detail_fetches() > 3).await;
        manager.stop_background_refresh();
    }
}
