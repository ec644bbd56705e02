use log::{debug, info};

use super::client::CirrusClient;
use super::queries::{
    self, BuildDetailData, BuildDetailVariables, BuildsVariables, BuildsWithTasksData,
    OwnerRepositoryData, RecentBuildsData, RepositoryIdVariables, ViewerData,
};
use super::types::BuildDetail;
use crate::board::InitialBuildData;
use crate::error::{QuirrusError, Result};

const REPOSITORY_PLATFORM: &str = "github";

impl CirrusClient {
    /// Resolves a repository reference to its Cirrus ID.
    ///
    /// Numeric references are already IDs. Otherwise `owner/name` is looked up,
    /// or a bare `name` under `default_owner`.
    pub async fn resolve_repository_id(
        &self,
        repository: &str,
        default_owner: Option<&str>,
    ) -> Result<String> {
        let repository = repository.trim();
        if !repository.is_empty() && repository.chars().all(|c| c.is_ascii_digit()) {
            return Ok(repository.to_string());
        }

        let (owner, name) = match repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => (owner, name),
            None if !repository.is_empty() => (
                default_owner.ok_or_else(|| {
                    QuirrusError::Config(format!(
                        "Repository '{repository}' has no owner; use 'owner/name' or configure a default owner"
                    ))
                })?,
                repository,
            ),
            _ => {
                return Err(QuirrusError::Config(format!(
                    "Invalid repository reference '{repository}'"
                )))
            }
        };

        let data: OwnerRepositoryData = self
            .execute_graphql_request(&queries::repository_id(RepositoryIdVariables {
                platform: REPOSITORY_PLATFORM.to_string(),
                owner: owner.to_string(),
                name: name.to_string(),
            }))
            .await?;

        let id = data
            .owner_repository
            .map(|repo| repo.id)
            .ok_or_else(|| QuirrusError::RepositoryNotFound(format!("{owner}/{name}")))?;

        info!("Found ID '{id}' for repository '{owner}/{name}'");
        Ok(id)
    }

    /// Returns the ID of the authenticated user, which doubles as a credentials check.
    pub async fn fetch_viewer_id(&self) -> Result<String> {
        let data: ViewerData = self.execute_graphql_request(&queries::viewer()).await?;
        data.viewer
            .map(|viewer| viewer.id)
            .ok_or_else(|| QuirrusError::Config("Not authenticated: viewer is null".to_string()))
    }

    /// Fetches identifiers of the last `count` builds of a branch, newest first,
    /// each linked to the next older build of the same result.
    ///
    /// With `before` set, only builds created before that timestamp (ms) are listed.
    pub async fn fetch_recent_builds(
        &self,
        repository_id: &str,
        branch: &str,
        count: usize,
        before: Option<i64>,
    ) -> Result<Vec<InitialBuildData>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let data: RecentBuildsData = self
            .execute_graphql_request(&queries::recent_builds(builds_variables(
                repository_id,
                Some(branch),
                count,
                before,
            )))
            .await?;

        let mut nodes: Vec<_> = data
            .repository
            .ok_or_else(|| QuirrusError::RepositoryNotFound(repository_id.to_string()))?
            .builds
            .map(|builds| builds.edges.into_iter().map(|edge| edge.node).collect())
            .unwrap_or_default();

        nodes.sort_by(|a, b| b.build_created_timestamp.cmp(&a.build_created_timestamp));
        nodes.truncate(count);

        debug!(
            "Fetched {} build IDs for branch '{branch}' of repository {repository_id}",
            nodes.len()
        );

        Ok(InitialBuildData::chain(nodes.into_iter().map(|node| {
            let branch = if node.branch.is_empty() {
                branch.to_string()
            } else {
                node.branch
            };
            (node.id, branch, node.build_created_timestamp)
        })))
    }

    /// Fetches the last `count` builds including their tasks, newest first.
    pub async fn fetch_builds_with_tasks(
        &self,
        repository_id: &str,
        branch: Option<&str>,
        count: usize,
    ) -> Result<Vec<BuildDetail>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let data: BuildsWithTasksData = self
            .execute_graphql_request(&queries::builds_with_tasks(builds_variables(
                repository_id,
                branch,
                count,
                None,
            )))
            .await?;

        let mut builds: Vec<_> = data
            .repository
            .ok_or_else(|| QuirrusError::RepositoryNotFound(repository_id.to_string()))?
            .builds
            .map(|builds| builds.edges.into_iter().map(|edge| edge.node).collect())
            .unwrap_or_default();

        builds.sort_by(|a: &BuildDetail, b| b.build_created_timestamp.cmp(&a.build_created_timestamp));
        Ok(builds)
    }

    /// Fetches the full task list of one build. No retry beyond the transport's.
    pub async fn fetch_build_detail(&self, build_id: &str) -> Result<BuildDetail> {
        let data: BuildDetailData = self
            .execute_graphql_request(&queries::build_detail(BuildDetailVariables {
                build_id: build_id.to_string(),
            }))
            .await?;

        let build = data
            .build
            .ok_or_else(|| QuirrusError::BuildNotFound(build_id.to_string()))?;

        debug!("Fetched {} tasks for build {build_id}", build.tasks.len());
        Ok(build)
    }
}

fn builds_variables(
    repository_id: &str,
    branch: Option<&str>,
    count: usize,
    before: Option<i64>,
) -> BuildsVariables {
    BuildsVariables {
        repository_id: repository_id.to_string(),
        branch: branch.map(ToString::to_string),
        last: i64::try_from(count).unwrap_or(i64::MAX),
        before: before.map(|timestamp| timestamp.to_string()),
    }
}
