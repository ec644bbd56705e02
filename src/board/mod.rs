//! Build history wallboard: incremental loading of per-branch build windows
//! and status freshness annotations.

mod build_data;
mod diff;
mod directory;
mod history;
mod manager;
mod pipeline;
mod source;
mod status;

pub use build_data::{
    BuildDataItem, BuildRef, ClassificationError, InitialBuildData, LoadedBuildData, TaskMetadata,
};
pub use diff::TaskDiffData;
pub use directory::BuildDirectory;
pub use history::{group_by_status, status_counts, visible_history, StatusCounts};
pub use manager::{BuildDataManager, ManagerOptions, DEFAULT_DIFF_LOG};
pub use pipeline::{
    BatchSummary, FetchPipeline, ItemCallback, ItemOutcome, LoadedObserver, PipelineOptions,
};
pub use source::BuildSource;
pub use status::{Status, StatusCategory};
