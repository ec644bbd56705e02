use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::QuirrusError;

/// Artifact name whose presence marks a completed task as a pending snapshot diff.
pub const DIFF_REPORT_ARTIFACT: &str = "diff_report";

/// Lifecycle status of a Cirrus task as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Created,
    Triggered,
    Scheduled,
    Executing,
    Aborted,
    Failed,
    Completed,
    Skipped,
    Paused,
}

impl FromStr for TaskStatus {
    type Err = QuirrusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "TRIGGERED" => Ok(Self::Triggered),
            "SCHEDULED" => Ok(Self::Scheduled),
            "EXECUTING" => Ok(Self::Executing),
            "ABORTED" => Ok(Self::Aborted),
            "FAILED" => Ok(Self::Failed),
            "COMPLETED" => Ok(Self::Completed),
            "SKIPPED" => Ok(Self::Skipped),
            "PAUSED" => Ok(Self::Paused),
            other => Err(QuirrusError::UnknownTaskStatus(other.to_string())),
        }
    }
}

/// A single task run within a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Milliseconds since the epoch
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub creation_timestamp: i64,
    /// Raw status string; parsed lazily so one odd value does not fail a whole response
    #[serde(default = "unknown_status")]
    pub status: String,
    #[serde(default)]
    pub automatic_re_run: Option<bool>,
    #[serde(default)]
    pub first_failed_command: Option<FirstFailedCommand>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub artifacts: Vec<Artifact>,
}

impl Task {
    pub fn parsed_status(&self) -> Result<TaskStatus, QuirrusError> {
        self.status.parse()
    }

    pub fn has_diff_report(&self) -> bool {
        self.artifacts
            .iter()
            .any(|artifact| artifact.name == DIFF_REPORT_ARTIFACT && !artifact.files.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstFailedCommand {
    pub name: String,
    #[serde(default)]
    pub duration_in_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub files: Vec<ArtifactFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    #[serde(default)]
    pub size: Option<i64>,
}

/// Lightweight build identity as returned by the build listing query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildNode {
    pub id: String,
    #[serde(default)]
    pub branch: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub build_created_timestamp: i64,
}

/// A build together with all of its task runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDetail {
    pub id: String,
    #[serde(default)]
    pub branch: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub build_created_timestamp: i64,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tasks: Vec<Task>,
}

fn unknown_status() -> String {
    "NONE".to_string()
}

/// Cirrus encodes `Long` scalars either as JSON numbers or as strings.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Number(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Number(value) => Ok(value),
        RawTimestamp::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_deserializes_string_timestamps_and_null_artifacts() {
        let task: Task = serde_json::from_str(
            r#"{
                "id": "123",
                "name": "build_linux",
                "creationTimestamp": "1700000000000",
                "status": "COMPLETED",
                "automaticReRun": false,
                "firstFailedCommand": null,
                "artifacts": null
            }"#,
        )
        .unwrap();

        assert_eq!(task.creation_timestamp, 1_700_000_000_000);
        assert!(task.artifacts.is_empty());
        assert_eq!(task.parsed_status().unwrap(), TaskStatus::Completed);
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let task = fixtures::task("a", "EXPLODED", 1);
        let err = task.parsed_status().unwrap_err();
        assert!(matches!(err, QuirrusError::UnknownTaskStatus(ref s) if s == "EXPLODED"));
    }

    #[test]
    fn test_diff_report_requires_files() {
        let mut task = fixtures::diff_task("a", 1);
        assert!(task.has_diff_report());

        task.artifacts[0].files.clear();
        assert!(!task.has_diff_report());
    }
}
