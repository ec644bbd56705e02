use std::cmp::Ordering;
use std::fmt;

use crate::cirrus::types::{Task, TaskStatus};
use crate::error::Result;

/// Outcome class of a task's latest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    InProgress,
    Completed,
    FailAnalyze,
    DiffSnapshot,
    FailOther,
    Stale,
}

impl StatusCategory {
    pub fn classify(task: &Task) -> Result<Self> {
        Ok(match task.parsed_status()? {
            TaskStatus::Created
            | TaskStatus::Triggered
            | TaskStatus::Scheduled
            | TaskStatus::Executing => Self::InProgress,
            TaskStatus::Completed if task.has_diff_report() => Self::DiffSnapshot,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Aborted | TaskStatus::Failed => {
                let analyze_failed = task
                    .first_failed_command
                    .as_ref()
                    .is_some_and(|command| command.name.contains("analyze"));
                if analyze_failed {
                    Self::FailAnalyze
                } else {
                    Self::FailOther
                }
            }
            TaskStatus::Skipped | TaskStatus::Paused => Self::Stale,
        })
    }

    pub fn is_failing(self) -> bool {
        matches!(self, Self::FailAnalyze | Self::FailOther | Self::DiffSnapshot)
    }

    fn rank(self) -> i32 {
        match self {
            Self::InProgress => 0,
            Self::Completed => 2,
            Self::Stale => 4,
            Self::FailOther => 6,
            Self::DiffSnapshot => 8,
            Self::FailAnalyze => 10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::FailAnalyze => "analysis failed",
            Self::DiffSnapshot => "snapshot diff",
            Self::FailOther => "failed",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A category plus whether it changed relative to the reference build.
///
/// Ordered by rendering priority: failing and new ranks highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    pub category: StatusCategory,
    pub is_new: bool,
}

impl Status {
    pub fn new(category: StatusCategory, is_new: bool) -> Self {
        Self { category, is_new }
    }

    fn rank(self) -> i32 {
        let rank = self.category.rank();
        if self.is_new {
            rank
        } else {
            rank - 1
        }
    }
}

impl Ord for Status {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_new {
            write!(f, "{} (new)", self.category)
        } else {
            write!(f, "{}", self.category)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cirrus::types::fixtures::{diff_task, failed_task, task};
    use crate::error::QuirrusError;

    #[test]
    fn test_classify_lifecycle_states() {
        for status in ["CREATED", "TRIGGERED", "SCHEDULED", "EXECUTING"] {
            assert_eq!(
                StatusCategory::classify(&task("t", status, 1)).unwrap(),
                StatusCategory::InProgress
            );
        }
        assert_eq!(
            StatusCategory::classify(&task("t", "SKIPPED", 1)).unwrap(),
            StatusCategory::Stale
        );
        assert_eq!(
            StatusCategory::classify(&task("t", "PAUSED", 1)).unwrap(),
            StatusCategory::Stale
        );
    }

    #[test]
    fn test_completed_with_diff_report_is_diff_snapshot() {
        assert_eq!(
            StatusCategory::classify(&diff_task("t", 1)).unwrap(),
            StatusCategory::DiffSnapshot
        );
        assert_eq!(
            StatusCategory::classify(&task("t", "COMPLETED", 1)).unwrap(),
            StatusCategory::Completed
        );
    }

    #[test]
    fn test_failures_split_on_analyze_command() {
        assert_eq!(
            StatusCategory::classify(&failed_task("t", "analyze_project", 1)).unwrap(),
            StatusCategory::FailAnalyze
        );
        assert_eq!(
            StatusCategory::classify(&failed_task("t", "build", 1)).unwrap(),
            StatusCategory::FailOther
        );
        assert_eq!(
            StatusCategory::classify(&task("t", "ABORTED", 1)).unwrap(),
            StatusCategory::FailOther
        );
    }

    #[test]
    fn test_unknown_status_fails_classification() {
        let err = StatusCategory::classify(&task("t", "NONE", 1)).unwrap_err();
        assert!(matches!(err, QuirrusError::UnknownTaskStatus(_)));
    }

    #[test]
    fn test_failing_states() {
        assert!(StatusCategory::FailAnalyze.is_failing());
        assert!(StatusCategory::FailOther.is_failing());
        assert!(StatusCategory::DiffSnapshot.is_failing());
        assert!(!StatusCategory::Completed.is_failing());
        assert!(!StatusCategory::Stale.is_failing());
        assert!(!StatusCategory::InProgress.is_failing());
    }

    #[test]
    fn test_status_ordering() {
        let new_analyze = Status::new(StatusCategory::FailAnalyze, true);
        let old_analyze = Status::new(StatusCategory::FailAnalyze, false);
        let new_diff = Status::new(StatusCategory::DiffSnapshot, true);
        let new_progress = Status::new(StatusCategory::InProgress, true);
        let old_progress = Status::new(StatusCategory::InProgress, false);

        assert!(new_analyze > old_analyze);
        assert!(old_analyze > new_diff);
        assert!(new_progress > old_progress);

        let mut statuses = vec![new_progress, new_analyze, old_progress, new_diff, old_analyze];
        statuses.sort();
        assert_eq!(
            statuses,
            vec![old_progress, new_progress, new_diff, old_analyze, new_analyze]
        );
    }
}
