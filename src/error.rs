use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuirrusError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Cirrus API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Cirrus API error (status {status}) persisted after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("GraphQL errors in {query_type}: {errors}")]
    GraphQLError { query_type: String, errors: String },

    #[error("GraphQL response contained no data")]
    NoResponseData,

    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("Build '{0}' not found")]
    BuildNotFound(String),

    #[error("Fetch pipeline has been cancelled")]
    PipelineCancelled,

    #[error("Unknown task status '{0}'")]
    UnknownTaskStatus(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(
        "No authentication details provided. Expecting CIRRUS_TOKEN or CIRRUS_COOKIE to be set \
         or a credentials file at '{0}'. Have you tried authenticating?"
    )]
    MissingAuthentication(String),

    #[error("Could not parse build '{0}'")]
    InvalidBuildString(String),

    #[error("Could not extract branch name from '{0}'")]
    MissingBranchName(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuirrusError {
    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingAuthentication(_) => 2,
            Self::InvalidBuildString(_) => 5,
            Self::MissingBranchName(_) => 6,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, QuirrusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(QuirrusError::MissingAuthentication("x".into()).exit_code(), 2);
        assert_eq!(QuirrusError::InvalidBuildString("~".into()).exit_code(), 5);
        assert_eq!(QuirrusError::MissingBranchName(" ~2".into()).exit_code(), 6);
        assert_eq!(QuirrusError::NoResponseData.exit_code(), 1);
    }

    #[test]
    fn test_missing_authentication_hints_at_auth() {
        let message = QuirrusError::MissingAuthentication("/home/me/.quirrus/auth.conf".into())
            .to_string();
        assert!(message.contains("Have you tried authenticating?"));
        assert!(message.contains("/home/me/.quirrus/auth.conf"));
    }
}
