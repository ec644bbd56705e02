use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{TimeZone, Utc};
use log::info;
use regex::{Regex, RegexBuilder};

use crate::cirrus::types::{BuildDetail, Task};
use crate::cirrus::CirrusClient;
use crate::error::{QuirrusError, Result};

static BUILD_SPEC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<branch>[^~]+)(~(?<number>[0-9]*))?$").expect("valid build spec regex")
});

const DATA_GROUP: &str = "data";

/// A build named as `branch` or `branch~N`, the N-th newest build of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    text: String,
    pub branch: String,
    pub offset: usize,
}

impl FromStr for BuildSpec {
    type Err = QuirrusError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = BUILD_SPEC_REGEX
            .captures(s)
            .ok_or_else(|| QuirrusError::InvalidBuildString(s.to_string()))?;

        let branch = caps
            .name("branch")
            .map(|m| m.as_str().trim())
            .filter(|branch| !branch.is_empty())
            .ok_or_else(|| QuirrusError::MissingBranchName(s.to_string()))?;

        let offset = match caps.name("number").map(|m| m.as_str()) {
            None | Some("") => 1,
            Some(number) => number
                .parse::<usize>()
                .ok()
                .filter(|offset| *offset > 0)
                .ok_or_else(|| QuirrusError::InvalidBuildString(s.to_string()))?,
        };

        Ok(Self {
            text: s.to_string(),
            branch: branch.to_string(),
            offset,
        })
    }
}

impl fmt::Display for BuildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Compiles an extraction regex in multi-line mode. It must define a `data` group.
pub fn compile_extraction_regex(pattern: &str) -> Result<Regex> {
    let regex = RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|e| QuirrusError::Config(format!("Invalid regex '{pattern}': {e}")))?;

    if !regex.capture_names().flatten().any(|name| name == DATA_GROUP) {
        return Err(QuirrusError::Config(format!(
            "Regex '{pattern}' has no named group '{DATA_GROUP}'"
        )));
    }
    Ok(regex)
}

/// A resolved build with the logs of its tasks.
#[derive(Debug, Clone)]
pub struct BuildLogs {
    pub spec: BuildSpec,
    pub build: BuildDetail,
    pub logs: Vec<(Task, String)>,
}

impl BuildLogs {
    /// Column label: `<spec> [<creation date>]`.
    pub fn label(&self) -> String {
        let date = Utc
            .timestamp_millis_opt(self.build.build_created_timestamp)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| self.build.build_created_timestamp.to_string());
        format!("{} [{date}]", self.spec)
    }
}

/// Values one regex extracted per task name and build column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTable {
    pub regex: String,
    pub columns: Vec<String>,
    /// Task name -> one cell per column
    pub rows: BTreeMap<String, Vec<Option<String>>>,
}

impl ExtractionTable {
    pub fn build(regex: &Regex, builds: &[BuildLogs]) -> Self {
        let mut rows: BTreeMap<String, Vec<Option<String>>> = BTreeMap::new();

        for (column, build) in builds.iter().enumerate() {
            for (task, log) in &build.logs {
                let Some(value) = regex
                    .captures(log)
                    .and_then(|caps| caps.name(DATA_GROUP))
                    .map(|m| m.as_str().to_string())
                else {
                    continue;
                };
                rows.entry(task.name.clone())
                    .or_insert_with(|| vec![None; builds.len()])[column] = Some(value);
            }
        }

        Self {
            regex: regex.as_str().to_string(),
            columns: builds.iter().map(BuildLogs::label).collect(),
            rows,
        }
    }

    /// `;`-separated block headed by the regex, one row per task sorted by name.
    pub fn to_csv(&self, not_found: &str) -> String {
        let mut out = format!("# regex: {}\n", self.regex);
        out.push_str(&format!("project;{}\n", self.columns.join(";")));
        for (task, cells) in &self.rows {
            let values: Vec<&str> = cells
                .iter()
                .map(|cell| cell.as_deref().unwrap_or(not_found))
                .collect();
            out.push_str(&format!("{task};{}\n", values.join(";")));
        }
        out
    }
}

impl CirrusClient {
    /// Resolves `spec` to a build and fetches the named log of each of its tasks.
    pub async fn fetch_build_logs(
        &self,
        repository_id: &str,
        spec: &BuildSpec,
        log_name: &str,
    ) -> Result<BuildLogs> {
        let builds = self
            .fetch_builds_with_tasks(repository_id, Some(&spec.branch), spec.offset)
            .await?;
        let build = builds
            .into_iter()
            .nth(spec.offset - 1)
            .ok_or_else(|| QuirrusError::BuildNotFound(spec.to_string()))?;

        info!(
            "Fetching {log_name} of {} tasks for build '{spec}' ({})",
            build.tasks.len(),
            build.id
        );
        let logs = self
            .fetch_logs_for_tasks(&build.tasks, log_name)
            .await
            .into_iter()
            .map(|(task, log)| (task.clone(), log))
            .collect();

        Ok(BuildLogs {
            spec: spec.clone(),
            build,
            logs,
        })
    }
}
