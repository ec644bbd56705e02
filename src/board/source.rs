use std::future::Future;

use super::build_data::InitialBuildData;
use crate::cirrus::types::BuildDetail;
use crate::cirrus::CirrusClient;
use crate::error::Result;

/// Where the board gets its build data from.
pub trait BuildSource: Send + Sync + 'static {
    /// Newest-first identifiers of the last `count` builds of `branch`,
    /// optionally restricted to builds created before `before` (ms).
    fn fetch_recent_builds(
        &self,
        repository_id: &str,
        branch: &str,
        count: usize,
        before: Option<i64>,
    ) -> impl Future<Output = Result<Vec<InitialBuildData>>> + Send;

    fn fetch_build_detail(&self, build_id: &str) -> impl Future<Output = Result<BuildDetail>> + Send;

    fn fetch_log(&self, task_id: &str, log_name: &str) -> impl Future<Output = Result<String>> + Send;
}

impl BuildSource for CirrusClient {
    async fn fetch_recent_builds(
        &self,
        repository_id: &str,
        branch: &str,
        count: usize,
        before: Option<i64>,
    ) -> Result<Vec<InitialBuildData>> {
        CirrusClient::fetch_recent_builds(self, repository_id, branch, count, before).await
    }

    async fn fetch_build_detail(&self, build_id: &str) -> Result<BuildDetail> {
        CirrusClient::fetch_build_detail(self, build_id).await
    }

    async fn fetch_log(&self, task_id: &str, log_name: &str) -> Result<String> {
        CirrusClient::fetch_log(self, task_id, log_name).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use super::*;
    use crate::error::QuirrusError;

    /// In-memory source whose fetches can be held back per build.
    #[derive(Default)]
    pub struct FakeSource {
        pub details: Mutex<HashMap<String, std::result::Result<BuildDetail, String>>>,
        pub gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
        /// Newest-first builds per branch
        pub recent: Mutex<HashMap<String, Vec<InitialBuildData>>>,
        pub logs: Mutex<HashMap<String, String>>,
        pub failing_listing: Mutex<bool>,
        pub detail_fetches: AtomicUsize,
    }

    impl FakeSource {
        pub fn with_build(self, detail: BuildDetail) -> Self {
            self.details.lock().insert(detail.id.clone(), Ok(detail));
            self
        }

        pub fn with_failure(self, id: &str) -> Self {
            self.details
                .lock()
                .insert(id.to_string(), Err(format!("boom {id}")));
            self
        }

        pub fn with_branch(self, branch: &str, builds: Vec<InitialBuildData>) -> Self {
            self.recent.lock().insert(branch.to_string(), builds);
            self
        }

        pub fn with_log(self, task_id: &str, log: &str) -> Self {
            self.logs.lock().insert(task_id.to_string(), log.to_string());
            self
        }

        /// The fetch of `id` blocks until the returned sender fires or is dropped.
        pub fn gate(&self, id: &str) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().insert(id.to_string(), rx);
            tx
        }

        pub fn detail_fetches(&self) -> usize {
            self.detail_fetches.load(Ordering::SeqCst)
        }
    }

    impl BuildSource for FakeSource {
        async fn fetch_recent_builds(
            &self,
            repository_id: &str,
            branch: &str,
            count: usize,
            before: Option<i64>,
        ) -> Result<Vec<InitialBuildData>> {
            if *self.failing_listing.lock() {
                return Err(QuirrusError::RepositoryNotFound(repository_id.to_string()));
            }
            let builds = self.recent.lock().get(branch).cloned().unwrap_or_default();
            let selected = builds
                .into_iter()
                .filter(|b| before.map_or(true, |before| b.build_created_timestamp < before))
                .take(count)
                .map(|b| (b.id, b.branch, b.build_created_timestamp));
            Ok(InitialBuildData::chain(selected))
        }

        async fn fetch_build_detail(&self, build_id: &str) -> Result<BuildDetail> {
            let gate = self.gates.lock().remove(build_id);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.detail_fetches.fetch_add(1, Ordering::SeqCst);
            let detail = self.details.lock().get(build_id).cloned();
            match detail {
                Some(Ok(detail)) => Ok(detail),
                Some(Err(message)) => Err(QuirrusError::ApiError {
                    status: 500,
                    message,
                }),
                None => Err(QuirrusError::BuildNotFound(build_id.to_string())),
            }
        }

        async fn fetch_log(&self, task_id: &str, log_name: &str) -> Result<String> {
            let log = self.logs.lock().get(task_id).cloned();
            log.ok_or_else(|| QuirrusError::ApiError {
                status: 404,
                message: format!("no {log_name} for {task_id}"),
            })
        }
    }
}
