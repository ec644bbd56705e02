use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::build_data::{BuildDataItem, InitialBuildData, LoadedBuildData};
use super::diff::TaskDiffData;
use crate::cirrus::types::BuildDetail;

#[derive(Debug, Default)]
struct State {
    items: HashMap<String, BuildDataItem>,
    /// Build IDs per branch, newest first
    branches: IndexMap<String, Vec<String>>,
    task_diffs: HashMap<String, TaskDiffData>,
}

impl State {
    fn find_reference(&self, info: &InitialBuildData) -> Option<Arc<LoadedBuildData>> {
        let mut visited = HashSet::from([info.id.as_str()]);
        let mut next = info.previous_build_id.as_deref();

        while let Some(id) = next {
            if !visited.insert(id) {
                return None;
            }
            let loaded = self.items.get(id)?.as_loaded()?;
            if loaded.is_reference_candidate() {
                return Some(Arc::clone(loaded));
            }
            next = loaded.info.previous_build_id.as_deref();
        }
        None
    }

    /// Walks from `updated` towards the newest build of its branch, re-deriving
    /// each loaded build. Stops at the first build that is not loaded.
    fn recompute_newer_builds(&mut self, updated: &InitialBuildData) {
        let Some(order) = self.branches.get(&updated.branch) else {
            return;
        };
        let Some(index) = order.iter().position(|id| *id == updated.id) else {
            return;
        };
        let newer: Vec<String> = order[..index].iter().rev().cloned().collect();

        for id in newer {
            let Some(current) = self.items.get(&id).and_then(BuildDataItem::as_loaded).cloned()
            else {
                break;
            };
            let reference = self.find_reference(&current.info);
            let refreshed = current.update(reference.as_deref());
            self.items.insert(id, BuildDataItem::Loaded(Arc::new(refreshed)));
        }
    }
}

/// Shared store of build data keyed by build ID, plus the per-branch order.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct BuildDirectory {
    state: Arc<RwLock<State>>,
}

impl BuildDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<BuildDataItem> {
        self.state.read().items.get(id).cloned()
    }

    pub fn get_loaded(&self, id: &str) -> Option<Arc<LoadedBuildData>> {
        self.state
            .read()
            .items
            .get(id)
            .and_then(BuildDataItem::as_loaded)
            .cloned()
    }

    pub fn insert(&self, item: BuildDataItem) {
        self.state.write().items.insert(item.id().to_string(), item);
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.read().branches.keys().cloned().collect()
    }

    /// Build IDs of a branch, newest first.
    pub fn builds_of_branch(&self, branch: &str) -> Vec<String> {
        self.state
            .read()
            .branches
            .get(branch)
            .cloned()
            .unwrap_or_default()
    }

    /// Items of a branch in branch order. IDs without an entry are skipped.
    pub fn branch_items(&self, branch: &str) -> Vec<BuildDataItem> {
        let state = self.state.read();
        state
            .branches
            .get(branch)
            .map(|ids| ids.iter().filter_map(|id| state.items.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Replaces the order of `branch` and marks every build without data yet
    /// as pending. Returns the builds that need loading.
    pub fn register_branch(
        &self,
        branch: &str,
        builds: Vec<InitialBuildData>,
    ) -> Vec<InitialBuildData> {
        let mut state = self.state.write();
        state.branches.insert(
            branch.to_string(),
            builds.iter().map(|b| b.id.clone()).collect(),
        );

        let mut to_load = Vec::new();
        for build in builds {
            let needs_loading = !matches!(
                state.items.get(&build.id),
                Some(BuildDataItem::Loaded(_) | BuildDataItem::Loading(_))
            );
            if needs_loading {
                state
                    .items
                    .insert(build.id.clone(), BuildDataItem::Pending(build.clone()));
                to_load.push(build);
            }
        }
        to_load
    }

    /// Prepends builds newer than the current head of `branch`. `builds` is a
    /// newest-first listing that may overlap the known builds; the overlap is
    /// ignored. Returns the newly added builds.
    pub fn merge_newer(&self, branch: &str, builds: Vec<InitialBuildData>) -> Vec<InitialBuildData> {
        let mut state = self.state.write();
        let known: HashSet<String> = state
            .branches
            .get(branch)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let new_builds: Vec<_> = builds
            .into_iter()
            .take_while(|b| !known.contains(&b.id))
            .collect();
        if new_builds.is_empty() {
            return new_builds;
        }

        let order = state.branches.entry(branch.to_string()).or_default();
        order.splice(0..0, new_builds.iter().map(|b| b.id.clone()));

        for build in &new_builds {
            state
                .items
                .insert(build.id.clone(), BuildDataItem::Pending(build.clone()));
        }
        new_builds
    }

    /// Appends builds older than the current tail of `branch` and links the
    /// former tail to the newest of them. Returns the newly added builds.
    pub fn append_older(&self, branch: &str, builds: Vec<InitialBuildData>) -> Vec<InitialBuildData> {
        let mut state = self.state.write();
        let order = state.branches.entry(branch.to_string()).or_default();
        let known: HashSet<&String> = order.iter().collect();
        let older: Vec<_> = builds.into_iter().filter(|b| !known.contains(&b.id)).collect();
        let Some(first) = older.first() else {
            return older;
        };

        let former_tail = order.last().cloned();
        let link = Some(first.id.clone());
        order.extend(older.iter().map(|b| b.id.clone()));

        if let Some(tail_id) = former_tail {
            if let Some(item) = state.items.get_mut(&tail_id) {
                *item = relinked(item, link);
            }
        }

        for build in &older {
            state
                .items
                .insert(build.id.clone(), BuildDataItem::Pending(build.clone()));
        }
        older
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.items.clear();
        state.branches.clear();
        state.task_diffs.clear();
    }

    /// Walks `previous_build_id` links from `info` through loaded builds until
    /// one qualifies as a reference. Stops at the first missing or unloaded build.
    pub fn find_reference(&self, info: &InitialBuildData) -> Option<Arc<LoadedBuildData>> {
        self.state.read().find_reference(info)
    }

    /// Marks a build as loading unless it is loaded already. An existing entry
    /// keeps its links; `info` is only used for builds not in the directory.
    pub fn mark_loading(&self, info: InitialBuildData) {
        let mut state = self.state.write();
        let info = match state.items.get(&info.id) {
            Some(BuildDataItem::Loaded(_)) => return,
            Some(item) => item.info().clone(),
            None => info,
        };
        state.items.insert(info.id.clone(), BuildDataItem::Loading(info));
    }

    /// Records a failed fetch and returns whether the build is now `Failed`.
    /// With `keep_loaded` a loaded build keeps its data instead.
    pub fn mark_failed(&self, info: InitialBuildData, error: &str, keep_loaded: bool) -> bool {
        let mut state = self.state.write();
        let info = match state.items.get(&info.id) {
            Some(BuildDataItem::Loaded(_)) if keep_loaded => return false,
            Some(item) => item.info().clone(),
            None => info,
        };
        state.items.insert(
            info.id.clone(),
            BuildDataItem::Failed {
                info,
                error: error.to_string(),
            },
        );
        true
    }

    /// Stores a fetched build derived against its current reference and
    /// re-derives the newer builds of its branch, all under one write lock.
    ///
    /// The directory's links win over `info`, which may predate an
    /// [`append_older`](Self::append_older).
    pub fn settle_loaded(&self, info: InitialBuildData, build: BuildDetail) -> Arc<LoadedBuildData> {
        let mut state = self.state.write();
        let info = state
            .items
            .get(&info.id)
            .map_or(info, |item| item.info().clone());

        let reference = state.find_reference(&info);
        let loaded = Arc::new(LoadedBuildData::new(
            info,
            Arc::new(build),
            reference.as_deref(),
        ));
        state
            .items
            .insert(loaded.info.id.clone(), BuildDataItem::Loaded(Arc::clone(&loaded)));
        state.recompute_newer_builds(&loaded.info);
        loaded
    }

    pub fn set_task_diff(&self, task_id: &str, diff: TaskDiffData) {
        self.state.write().task_diffs.insert(task_id.to_string(), diff);
    }

    pub fn task_diff(&self, task_id: &str) -> Option<TaskDiffData> {
        self.state.read().task_diffs.get(task_id).cloned()
    }
}

fn relinked(item: &BuildDataItem, previous_build_id: Option<String>) -> BuildDataItem {
    match item {
        BuildDataItem::Pending(info) => {
            BuildDataItem::Pending(info.clone().with_previous(previous_build_id))
        }
        BuildDataItem::Loading(info) => {
            BuildDataItem::Loading(info.clone().with_previous(previous_build_id))
        }
        BuildDataItem::Failed { info, error } => BuildDataItem::Failed {
            info: info.clone().with_previous(previous_build_id),
            error: error.clone(),
        },
        BuildDataItem::Loaded(loaded) => BuildDataItem::Loaded(Arc::new(LoadedBuildData {
            info: loaded.info.clone().with_previous(previous_build_id),
            ..LoadedBuildData::clone(loaded)
        })),
    }
}
