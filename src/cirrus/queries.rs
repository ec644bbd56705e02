//! GraphQL documents and the response shapes they produce.

use graphql_client::QueryBody;
use serde::{Deserialize, Serialize};

use super::types::{BuildDetail, BuildNode};

const TASK_FIELDS: &str = r"
        id
        name
        status
        creationTimestamp
        automaticReRun
        firstFailedCommand {
          name
          durationInSeconds
        }
        artifacts {
          name
          files {
            path
            size
          }
        }";

pub const REPOSITORY_ID_QUERY: &str = r"
query RepositoryId($platform: String!, $owner: String!, $name: String!) {
  ownerRepository(platform: $platform, owner: $owner, name: $name) {
    id
  }
}";

pub const VIEWER_QUERY: &str = r"
query Viewer {
  viewer {
    id
  }
}";

pub const RECENT_BUILDS_QUERY: &str = r"
query RecentBuilds($repositoryId: ID!, $branch: String, $last: Int, $before: String) {
  repository(id: $repositoryId) {
    builds(branch: $branch, last: $last, before: $before) {
      edges {
        node {
          id
          branch
          buildCreatedTimestamp
        }
      }
    }
  }
}";

pub fn builds_with_tasks_query() -> &'static str {
    static QUERY: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    QUERY.get_or_init(|| {
        format!(
            r"
query BuildsWithTasks($repositoryId: ID!, $branch: String, $last: Int, $before: String) {{
  repository(id: $repositoryId) {{
    builds(branch: $branch, last: $last, before: $before) {{
      edges {{
        node {{
          id
          branch
          buildCreatedTimestamp
          tasks {{{TASK_FIELDS}
          }}
        }}
      }}
    }}
  }}
}}"
        )
    })
}

pub fn build_detail_query() -> &'static str {
    static QUERY: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    QUERY.get_or_init(|| {
        format!(
            r"
query BuildDetail($buildId: ID!) {{
  build(id: $buildId) {{
    id
    branch
    buildCreatedTimestamp
    tasks {{{TASK_FIELDS}
    }}
  }}
}}"
        )
    })
}

#[derive(Debug, Serialize)]
pub struct RepositoryIdVariables {
    pub platform: String,
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct EmptyVariables {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildsVariables {
    pub repository_id: String,
    pub branch: Option<String>,
    pub last: i64,
    pub before: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDetailVariables {
    pub build_id: String,
}

pub fn repository_id(variables: RepositoryIdVariables) -> QueryBody<RepositoryIdVariables> {
    QueryBody {
        variables,
        query: REPOSITORY_ID_QUERY,
        operation_name: "RepositoryId",
    }
}

pub fn viewer() -> QueryBody<EmptyVariables> {
    QueryBody {
        variables: EmptyVariables {},
        query: VIEWER_QUERY,
        operation_name: "Viewer",
    }
}

pub fn recent_builds(variables: BuildsVariables) -> QueryBody<BuildsVariables> {
    QueryBody {
        variables,
        query: RECENT_BUILDS_QUERY,
        operation_name: "RecentBuilds",
    }
}

pub fn builds_with_tasks(variables: BuildsVariables) -> QueryBody<BuildsVariables> {
    QueryBody {
        variables,
        query: builds_with_tasks_query(),
        operation_name: "BuildsWithTasks",
    }
}

pub fn build_detail(variables: BuildDetailVariables) -> QueryBody<BuildDetailVariables> {
    QueryBody {
        variables,
        query: build_detail_query(),
        operation_name: "BuildDetail",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRepositoryData {
    pub owner_repository: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
pub struct ViewerData {
    pub viewer: Option<IdNode>,
}

#[derive(Debug, Deserialize)]
pub struct IdNode {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryData<N> {
    pub repository: Option<RepositoryNode<N>>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryNode<N> {
    pub builds: Option<BuildConnection<N>>,
}

#[derive(Debug, Deserialize)]
pub struct BuildConnection<N> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<BuildEdge<N>>,
}

#[derive(Debug, Deserialize)]
pub struct BuildEdge<N> {
    pub node: N,
}

pub type RecentBuildsData = RepositoryData<BuildNode>;
pub type BuildsWithTasksData = RepositoryData<BuildDetail>;

#[derive(Debug, Deserialize)]
pub struct BuildDetailData {
    pub build: Option<BuildDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_query_requests_classification_fields() {
        let query = build_detail_query();
        assert!(query.contains("build(id: $buildId)"));
        assert!(query.contains("firstFailedCommand"));
        assert!(query.contains("artifacts"));
    }

    #[test]
    fn test_builds_variables_serialize_camel_case() {
        let body = recent_builds(BuildsVariables {
            repository_id: "42".to_string(),
            branch: Some("main".to_string()),
            last: 10,
            before: None,
        });
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["operationName"], "RecentBuilds");
        assert_eq!(json["variables"]["repositoryId"], "42");
        assert_eq!(json["variables"]["last"], 10);
        assert!(json["variables"]["before"].is_null());
    }
}
