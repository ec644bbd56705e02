use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use log::error;

use super::status::{Status, StatusCategory};
use crate::cirrus::types::{BuildDetail, Task, TaskStatus};

/// Identity of a build before its detail has been loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialBuildData {
    pub id: String,
    pub branch: String,
    /// Milliseconds since the epoch
    pub build_created_timestamp: i64,
    pub previous_build_id: Option<String>,
}

impl InitialBuildData {
    /// Builds a newest-first list where every build points at the one after it.
    pub fn chain<I>(builds: I) -> Vec<Self>
    where
        I: IntoIterator<Item = (String, String, i64)>,
    {
        let mut chained: Vec<Self> = builds
            .into_iter()
            .map(|(id, branch, build_created_timestamp)| Self {
                id,
                branch,
                build_created_timestamp,
                previous_build_id: None,
            })
            .collect();

        for i in 1..chained.len() {
            let older = chained[i].id.clone();
            chained[i - 1].previous_build_id = Some(older);
        }
        chained
    }

    #[must_use]
    pub fn with_previous(mut self, previous_build_id: Option<String>) -> Self {
        self.previous_build_id = previous_build_id;
        self
    }
}

/// Build and timestamp a task's status last changed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRef {
    pub id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    pub status: Status,
    pub last_build_with_different_status: Option<BuildRef>,
    /// Newest first; the head is the run the status is derived from.
    pub reruns: Vec<Task>,
}

impl TaskMetadata {
    pub fn latest_rerun(&self) -> Option<&Task> {
        self.reruns.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationError {
    pub task_name: String,
    pub message: String,
}

/// A build with its tasks and the status annotations derived against its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedBuildData {
    pub info: InitialBuildData,
    pub build: Arc<BuildDetail>,
    /// Keyed by task name, sorted by name
    pub metadata_by_name: IndexMap<String, TaskMetadata>,
    pub classification_errors: Vec<ClassificationError>,
    pub reference_id: Option<String>,
}

impl LoadedBuildData {
    pub fn new(
        info: InitialBuildData,
        build: Arc<BuildDetail>,
        reference: Option<&LoadedBuildData>,
    ) -> Self {
        let loaded = Self::compute(info, build, reference);
        for failure in &loaded.classification_errors {
            error!(
                "Could not classify task '{}' of build {}: {}",
                failure.task_name, loaded.info.id, failure.message
            );
        }
        loaded
    }

    /// Re-derives the metadata of the same build data against a (possibly new) reference.
    #[must_use]
    pub fn update(&self, reference: Option<&LoadedBuildData>) -> Self {
        Self::compute(self.info.clone(), Arc::clone(&self.build), reference)
    }

    fn compute(
        info: InitialBuildData,
        build: Arc<BuildDetail>,
        reference: Option<&LoadedBuildData>,
    ) -> Self {
        let reference = reference.filter(|r| r.is_reference_candidate());

        let mut grouped: BTreeMap<&str, Vec<Task>> = BTreeMap::new();
        for task in &build.tasks {
            grouped.entry(task.name.as_str()).or_default().push(task.clone());
        }

        let mut metadata_by_name = IndexMap::with_capacity(grouped.len());
        let mut classification_errors = Vec::new();

        for (name, mut reruns) in grouped {
            reruns.sort_by(|a, b| b.creation_timestamp.cmp(&a.creation_timestamp));

            let category = match StatusCategory::classify(&reruns[0]) {
                Ok(category) => category,
                Err(e) => {
                    classification_errors.push(ClassificationError {
                        task_name: name.to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let reference_metadata = reference.and_then(|r| r.metadata_by_name.get(name));
            let is_new = reference_metadata.is_some_and(|m| m.status.category != category);

            let last_build_with_different_status = match reference {
                Some(r) if is_new => Some(BuildRef {
                    id: r.info.id.clone(),
                    timestamp: r.info.build_created_timestamp,
                }),
                _ => reference_metadata.and_then(|m| m.last_build_with_different_status.clone()),
            };

            metadata_by_name.insert(
                name.to_string(),
                TaskMetadata {
                    status: Status::new(category, is_new),
                    last_build_with_different_status,
                    reruns,
                },
            );
        }

        Self {
            info,
            build,
            metadata_by_name,
            classification_errors,
            reference_id: reference.map(|r| r.info.id.clone()),
        }
    }

    /// Whether this build can serve as a freshness baseline: it has at least
    /// one task that was neither skipped nor aborted.
    pub fn is_reference_candidate(&self) -> bool {
        self.build.tasks.iter().any(|task| {
            !matches!(
                task.parsed_status(),
                Ok(TaskStatus::Skipped | TaskStatus::Aborted)
            )
        })
    }

    /// All classified tasks are stale and none failed classification.
    pub fn is_stale(&self) -> bool {
        self.classification_errors.is_empty()
            && self
                .metadata_by_name
                .values()
                .all(|m| m.status.category == StatusCategory::Stale)
    }

    pub fn has_in_progress_tasks(&self) -> bool {
        self.metadata_by_name
            .values()
            .any(|m| m.status.category == StatusCategory::InProgress)
    }
}

/// Lifecycle state of one build's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildDataItem {
    Pending(InitialBuildData),
    Loading(InitialBuildData),
    Failed { info: InitialBuildData, error: String },
    Loaded(Arc<LoadedBuildData>),
}

impl BuildDataItem {
    pub fn info(&self) -> &InitialBuildData {
        match self {
            Self::Pending(info) | Self::Loading(info) => info,
            Self::Failed { info, .. } => info,
            Self::Loaded(loaded) => &loaded.info,
        }
    }

    pub fn id(&self) -> &str {
        &self.info().id
    }

    pub fn as_loaded(&self) -> Option<&Arc<LoadedBuildData>> {
        match self {
            Self::Loaded(loaded) => Some(loaded),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}
