use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::{ManagerOptions, DEFAULT_DIFF_LOG};
use crate::cirrus::{ClientSettings, DEFAULT_API_URL};

const QUIRRUS_DIR: &str = ".quirrus";
const AUTH_FILE: &str = "auth.conf";
const WALLBOARD_FILE: &str = "branches.conf";

/// Configuration file structure for quirrus.
///
/// Loaded from the current directory or a specified path. Command line flags
/// take precedence over values from the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// GraphQL endpoint
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,

    #[serde(default = "default_connection_retries")]
    pub connection_retries: u32,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Credentials file; defaults to `~/.quirrus/auth.conf`
    pub auth_file: Option<PathBuf>,

    /// Owner used for repository names given without one
    pub default_owner: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BoardConfig {
    #[serde(default = "default_builds_per_branch")]
    pub builds_per_branch: usize,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Cap on concurrent build detail fetches
    pub max_concurrent_fetches: Option<usize>,

    #[serde(default = "default_diff_log_name")]
    pub diff_log_name: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connection_retries: default_connection_retries(),
            max_concurrent_requests: default_max_concurrent_requests(),
            auth_file: None,
            default_owner: None,
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            builds_per_branch: default_builds_per_branch(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_concurrent_fetches: None,
            diff_log_name: default_diff_log_name(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_connection_retries() -> u32 {
    5
}

fn default_max_concurrent_requests() -> usize {
    50
}

fn default_builds_per_branch() -> usize {
    10
}

fn default_refresh_interval_secs() -> u64 {
    20
}

fn default_diff_log_name() -> String {
    DEFAULT_DIFF_LOG.to_string()
}

/// Per-user directory holding credentials and the wallboard file.
pub fn quirrus_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(QUIRRUS_DIR))
        .context("Could not determine the home directory")
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./quirrus.toml
    /// 3. ./quirrus.json
    /// 4. ./quirrus.yaml
    /// 5. ./quirrus.yml
    ///
    /// Returns default configuration if no file is found. A specified path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["quirrus.toml", "quirrus.json", "quirrus.yaml", "quirrus.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    pub fn auth_file(&self) -> Result<PathBuf> {
        match &self.api.auth_file {
            Some(path) => Ok(path.clone()),
            None => Ok(quirrus_dir()?.join(AUTH_FILE)),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            api_url: self.api.url.clone(),
            request_timeout: self.api.request_timeout_ms.map(Duration::from_millis),
            connection_retries: self.api.connection_retries,
            max_concurrent_requests: self.api.max_concurrent_requests,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            builds_per_branch: self.board.builds_per_branch,
            max_concurrent_fetches: self.board.max_concurrent_fetches,
            refresh_interval: Duration::from_secs(self.board.refresh_interval_secs.max(1)),
            diff_log_name: self.board.diff_log_name.clone(),
            ..ManagerOptions::default()
        }
    }
}

/// Branches and repository shown by the wallboard, stored as
/// `branch1,branch2;repo;autoRefresh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WallboardConfig {
    pub branches: Vec<String>,
    pub repo: String,
    pub auto_refresh: bool,
}

impl Default for WallboardConfig {
    fn default() -> Self {
        Self {
            branches: Vec::new(),
            repo: String::new(),
            auto_refresh: true,
        }
    }
}

impl WallboardConfig {
    pub fn default_path() -> Result<PathBuf> {
        Ok(quirrus_dir()?.join(WALLBOARD_FILE))
    }

    /// Values given on the command line replace the saved ones.
    pub fn merged(&self, repo: Option<&str>, branches: &[String], auto_refresh: Option<bool>) -> Self {
        Self {
            branches: if branches.is_empty() {
                self.branches.clone()
            } else {
                branches.to_vec()
            },
            repo: repo.map_or_else(|| self.repo.clone(), ToString::to_string),
            auto_refresh: auto_refresh.unwrap_or(self.auto_refresh),
        }
    }

    /// Whether the board keeps polling after the first draw.
    pub fn polls(&self, once: bool) -> bool {
        self.auto_refresh && !once
    }

    pub fn parse(contents: &str) -> Self {
        let mut fields = contents.trim().split(';');

        let branches = fields
            .next()
            .map(|branches| {
                branches
                    .split(',')
                    .map(str::trim)
                    .filter(|branch| !branch.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let repo = fields.next().unwrap_or_default().trim().to_string();
        let auto_refresh = fields
            .next()
            .and_then(|flag| flag.trim().parse().ok())
            .unwrap_or(true);

        Self {
            branches,
            repo,
            auto_refresh,
        }
    }

    /// Reads the wallboard file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        anyhow::ensure!(
            path.is_file(),
            "Wallboard config '{}' exists but is not a regular file",
            path.display()
        );

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read wallboard config: {}", path.display()))?;
        Ok(Self::parse(&contents))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, self.to_string())
            .with_context(|| format!("Failed to write wallboard config: {}", path.display()))
    }
}

impl std::fmt::Display for WallboardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{};{}", self.branches.join(","), self.repo, self.auto_refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.url, "https://api.cirrus-ci.com/graphql");
        assert_eq!(config.api.request_timeout_ms, Some(60_000));
        assert_eq!(config.api.connection_retries, 5);
        assert_eq!(config.board.builds_per_branch, 10);
        assert_eq!(config.board.diff_log_name, "snapshot_generation.log");
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[api]
url = "https://cirrus.example.com/graphql"
connection-retries = 2
default-owner = "SonarSource"

[board]
builds-per-branch = 25
max-concurrent-fetches = 4
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.api.url, "https://cirrus.example.com/graphql");
        assert_eq!(config.api.connection_retries, 2);
        assert_eq!(config.api.default_owner.as_deref(), Some("SonarSource"));
        assert_eq!(config.api.request_timeout_ms, Some(60_000));
        assert_eq!(config.board.builds_per_branch, 25);
        assert_eq!(config.board.max_concurrent_fetches, Some(4));
        assert_eq!(config.board.refresh_interval_secs, 20);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            temp_file,
            "api:\n  request-timeout-ms: 1500\nboard:\n  refresh-interval-secs: 5\n"
        )
        .unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(
            config.client_settings().request_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            config.manager_options().refresh_interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_specified_config_must_exist() {
        assert!(Config::load(Some(Path::new("nonexistent-quirrus.toml"))).is_err());
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(
            temp_file,
            r#"{{"api": {{"auth-file": "/tmp/cookies.conf"}}, "board": {{"builds-per-branch": 3}}}}"#
        )
        .unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.board.builds_per_branch, 3);
        assert_eq!(config.auth_file().unwrap(), PathBuf::from("/tmp/cookies.conf"));
    }

    #[test]
    fn test_wallboard_config_parsing() {
        let config = WallboardConfig::parse("main, feature/x,;1234;false\n");
        assert_eq!(config.branches, vec!["main", "feature/x"]);
        assert_eq!(config.repo, "1234");
        assert!(!config.auto_refresh);

        let empty = WallboardConfig::parse("");
        assert_eq!(empty, WallboardConfig::default());
    }

    #[test]
    fn test_wallboard_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".quirrus").join("branches.conf");
        assert_eq!(WallboardConfig::load(&path).unwrap(), WallboardConfig::default());

        let config = WallboardConfig {
            branches: vec!["main".to_string(), "release/1.x".to_string()],
            repo: "acme/widgets".to_string(),
            auto_refresh: true,
        };
        config.save(&path).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "main,release/1.x;acme/widgets;true"
        );
        assert_eq!(WallboardConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_wallboard_command_line_overrides() {
        let saved = WallboardConfig {
            branches: vec!["main".to_string()],
            repo: "1234".to_string(),
            auto_refresh: true,
        };

        let unchanged = saved.merged(None, &[], None);
        assert_eq!(unchanged, saved);

        let merged = saved.merged(Some("acme/widgets"), &["dev".to_string()], Some(false));
        assert_eq!(merged.repo, "acme/widgets");
        assert_eq!(merged.branches, vec!["dev"]);
        assert!(!merged.auto_refresh);
    }

    #[test]
    fn test_disabled_auto_refresh_is_persisted_and_stops_polling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("branches.conf");
        let saved = WallboardConfig::parse("main;1234;true");
        assert!(saved.polls(false));
        assert!(!saved.polls(true));

        saved.merged(None, &[], Some(false)).save(&path).unwrap();
        let reloaded = WallboardConfig::load(&path).unwrap();

        assert!(!reloaded.auto_refresh);
        assert!(!reloaded.polls(false));
        assert!(reloaded.merged(None, &[], Some(true)).polls(false));
    }
}
