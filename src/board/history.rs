use std::collections::BTreeMap;

use super::build_data::{BuildDataItem, LoadedBuildData, TaskMetadata};
use super::status::Status;

/// Drops loaded builds whose tasks are all stale, except the newest one.
pub fn visible_history(items: Vec<BuildDataItem>) -> Vec<BuildDataItem> {
    items
        .into_iter()
        .enumerate()
        .filter(|(i, item)| *i == 0 || !item.as_loaded().is_some_and(|loaded| loaded.is_stale()))
        .map(|(_, item)| item)
        .collect()
}

/// Tasks of a build grouped by status, highest priority first. Task order
/// within a group follows task name.
pub fn group_by_status(build: &LoadedBuildData) -> Vec<(Status, Vec<(&str, &TaskMetadata)>)> {
    let mut groups: BTreeMap<Status, Vec<(&str, &TaskMetadata)>> = BTreeMap::new();
    for (name, metadata) in &build.metadata_by_name {
        groups
            .entry(metadata.status)
            .or_default()
            .push((name.as_str(), metadata));
    }
    groups.into_iter().rev().collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub failing: usize,
    pub other: usize,
    pub new_failing: usize,
}

pub fn status_counts(build: &LoadedBuildData) -> StatusCounts {
    build
        .metadata_by_name
        .values()
        .fold(StatusCounts::default(), |mut counts, metadata| {
            if metadata.status.category.is_failing() {
                counts.failing += 1;
                if metadata.status.is_new {
                    counts.new_failing += 1;
                }
            } else {
                counts.other += 1;
            }
            counts
        })
}
