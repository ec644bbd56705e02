//! Two-stage pipeline that loads build details into a [`BuildDirectory`].
//!
//! The fetch stage turns requests into concurrent detail fetches. The reduce
//! stage is the only writer of fetched data: it derives each build against its
//! reference in the current directory state and then re-derives the newer
//! builds of the same branch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::build_data::{InitialBuildData, LoadedBuildData};
use super::directory::BuildDirectory;
use super::source::BuildSource;
use crate::cirrus::types::BuildDetail;
use crate::error::{QuirrusError, Result};

/// Result of loading one build, handed to its callback.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Loaded(Arc<LoadedBuildData>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub loaded: usize,
    pub failed: usize,
}

pub type ItemCallback = Box<dyn FnOnce(&ItemOutcome) + Send>;
pub type BatchCallback = Box<dyn FnOnce(BatchSummary) + Send>;
/// Called by the reduce stage for every freshly fetched build.
pub type LoadedObserver = Arc<dyn Fn(&Arc<LoadedBuildData>) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Upper bound on detail fetches in flight; unbounded when `None`.
    pub max_concurrent_fetches: Option<usize>,
}

struct Request {
    info: InitialBuildData,
    reload: bool,
    on_done: Option<ItemCallback>,
}

enum Event {
    Loading(InitialBuildData),
    Fetched {
        info: InitialBuildData,
        build: BuildDetail,
        on_done: Option<ItemCallback>,
    },
    FetchFailed {
        info: InitialBuildData,
        error: String,
        reload: bool,
        on_done: Option<ItemCallback>,
    },
}

pub struct FetchPipeline {
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    /// Fetch and reduce stage, until [`FetchPipeline::shutdown`] joins them
    stages: Mutex<Vec<JoinHandle<()>>>,
}

impl FetchPipeline {
    /// Spawns both stages on the current Tokio runtime.
    pub fn start<S: BuildSource>(
        source: Arc<S>,
        directory: BuildDirectory,
        options: PipelineOptions,
        observer: Option<LoadedObserver>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let limit = options
            .max_concurrent_fetches
            .map(|max| Arc::new(Semaphore::new(max.max(1))));

        let fetch_stage = tokio::spawn(run_fetch_stage(source, request_rx, event_tx, limit));
        let reduce_stage = tokio::spawn(run_reduce_stage(directory, event_rx, observer));

        Self {
            requests: Mutex::new(Some(request_tx)),
            stages: Mutex::new(vec![fetch_stage, reduce_stage]),
        }
    }

    /// Queues one build for loading. It is marked `Loading` before its fetch starts.
    pub fn load(&self, info: InitialBuildData, on_done: Option<ItemCallback>) -> Result<()> {
        self.send(Request {
            info,
            reload: false,
            on_done,
        })
    }

    /// Re-fetches a build. A loaded build keeps its data while the fetch runs
    /// and when it fails.
    pub fn reload(&self, info: InitialBuildData, on_done: Option<ItemCallback>) -> Result<()> {
        self.send(Request {
            info,
            reload: true,
            on_done,
        })
    }

    /// Loads every item and calls `on_batch_done` once all of them settled.
    pub fn load_batch<F>(&self, items: Vec<InitialBuildData>, on_batch_done: F) -> Result<()>
    where
        F: FnOnce(BatchSummary) + Send + 'static,
    {
        if self.is_cancelled() {
            return Err(QuirrusError::PipelineCancelled);
        }
        if items.is_empty() {
            on_batch_done(BatchSummary::default());
            return Ok(());
        }

        let tracker = Arc::new(BatchTracker::new(items.len(), Box::new(on_batch_done)));
        for info in items {
            let tracker = Arc::clone(&tracker);
            let on_done: ItemCallback = Box::new(move |outcome: &ItemOutcome| tracker.settle(outcome));
            self.load(info, Some(on_done))?;
        }
        Ok(())
    }

    /// Stops both stages and every fetch in flight. Callbacks that have not
    /// fired yet are dropped; data already in the directory stays.
    pub fn cancel(&self) {
        self.requests.lock().take();
        for stage in self.stages.lock().iter() {
            stage.abort();
        }
    }

    /// Cancels and waits until both stages have stopped. Once this returns,
    /// the pipeline no longer writes to the directory.
    pub async fn shutdown(&self) {
        self.cancel();
        let stages = std::mem::take(&mut *self.stages.lock());
        for stage in stages {
            if let Err(e) = stage.await {
                if e.is_panic() {
                    error!("Fetch pipeline stage panicked: {e}");
                }
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.requests.lock().is_none()
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .lock()
            .as_ref()
            .ok_or(QuirrusError::PipelineCancelled)?
            .send(request)
            .map_err(|_| QuirrusError::PipelineCancelled)
    }
}

impl Drop for FetchPipeline {
    fn drop(&mut self) {
        for stage in self.stages.get_mut().iter() {
            stage.abort();
        }
    }
}

struct BatchTracker {
    remaining: AtomicUsize,
    loaded: AtomicUsize,
    failed: AtomicUsize,
    on_done: Mutex<Option<BatchCallback>>,
}

impl BatchTracker {
    fn new(size: usize, on_done: BatchCallback) -> Self {
        Self {
            remaining: AtomicUsize::new(size),
            loaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            on_done: Mutex::new(Some(on_done)),
        }
    }

    fn settle(&self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Loaded(_) => self.loaded.fetch_add(1, Ordering::SeqCst),
            ItemOutcome::Failed(_) => self.failed.fetch_add(1, Ordering::SeqCst),
        };

        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            let on_done = self.on_done.lock().take();
            if let Some(on_done) = on_done {
                on_done(BatchSummary {
                    loaded: self.loaded.load(Ordering::SeqCst),
                    failed: self.failed.load(Ordering::SeqCst),
                });
            }
        }
    }
}

async fn run_fetch_stage<S: BuildSource>(
    source: Arc<S>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<Event>,
    limit: Option<Arc<Semaphore>>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(Request { info, reload, on_done }) = request else {
                    break;
                };

                if !reload && events.send(Event::Loading(info.clone())).is_err() {
                    break;
                }

                let source = Arc::clone(&source);
                let events = events.clone();
                let limit = limit.clone();
                in_flight.spawn(async move {
                    let _permit = match limit {
                        Some(limit) => limit.acquire_owned().await.ok(),
                        None => None,
                    };

                    debug!("Fetching details of build {}", info.id);
                    let event = match source.fetch_build_detail(&info.id).await {
                        Ok(build) => Event::Fetched { info, build, on_done },
                        Err(e) => Event::FetchFailed {
                            info,
                            error: e.to_string(),
                            reload,
                            on_done,
                        },
                    };
                    // The reduce stage is gone only after cancellation.
                    let _ = events.send(event);
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Build fetch panicked: {e}");
                    }
                }
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
}

async fn run_reduce_stage(
    directory: BuildDirectory,
    mut events: mpsc::UnboundedReceiver<Event>,
    observer: Option<LoadedObserver>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Loading(info) => directory.mark_loading(info),
            Event::Fetched {
                info,
                build,
                on_done,
            } => {
                let loaded = directory.settle_loaded(info, build);
                if let Some(observer) = &observer {
                    observer(&loaded);
                }
                if let Some(on_done) = on_done {
                    on_done(&ItemOutcome::Loaded(loaded));
                }
            }
            Event::FetchFailed {
                info,
                error,
                reload,
                on_done,
            } => {
                let id = info.id.clone();
                if directory.mark_failed(info, &error, reload) {
                    warn!("Failed to fetch build {id}: {error}");
                } else {
                    warn!("Refreshing build {id} failed, keeping previous data: {error}");
                }
                if let Some(on_done) = on_done {
                    on_done(&ItemOutcome::Failed(error));
                }
            }
        }
    }
}
