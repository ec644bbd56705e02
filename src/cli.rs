use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::future::try_join_all;
use log::{info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quirrus::auth::{store_cookies, Credentials};
use quirrus::board::BuildDataManager;
use quirrus::cirrus::{CirrusClient, LogTarget};
use quirrus::config::{Config, WallboardConfig};
use quirrus::extract::{compile_extraction_regex, BuildSpec, ExtractionTable};
use quirrus::output::{
    accent, failure, muted, print_board, print_extraction, success, DownloadProgress, Spinner,
};

#[derive(Parser)]
#[command(name = "quirrus")]
#[command(author, version, about = "Cirrus CI client and build wallboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// GraphQL endpoint of the Cirrus API
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    request_timeout: Option<u64>,

    #[arg(long, global = true, value_name = "N")]
    connection_retries: Option<u32>,

    /// Credentials file holding a Cookie header value
    #[arg(long, global = true)]
    auth_file: Option<PathBuf>,

    #[arg(short, long, global = true, env = "CIRRUS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true, env = "CIRRUS_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// More log output; repeat for debug logs
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, default_value_t = false)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract values from task logs of one or more builds
    Extract {
        #[arg(short, long)]
        repo: String,

        /// Regex with a named group `data`; may be repeated
        #[arg(short = 'x', long = "regex", required = true)]
        regexes: Vec<String>,

        #[arg(short, long)]
        log: String,

        /// Placeholder for tasks without a match
        #[arg(long, default_value = "-")]
        not_found: String,

        #[arg(long, value_enum, default_value_t = ExtractFormat::Csv)]
        format: ExtractFormat,

        /// `branch` or `branch~N` for the N-th newest build
        #[arg(required = true)]
        builds: Vec<String>,
    },

    /// Download task logs into a directory
    Logs {
        #[arg(short, long, required_unless_present = "task_ids")]
        repo: Option<String>,

        #[arg(short, long)]
        branch: Option<String>,

        /// Number of latest builds to take tasks from
        #[arg(short = 'n', long, default_value_t = 1)]
        builds: usize,

        /// Only tasks with these names
        #[arg(short = 'k', long = "tasks", value_delimiter = ',')]
        task_names: Vec<String>,

        /// Explicit task IDs instead of builds
        #[arg(long, value_delimiter = ',')]
        task_ids: Vec<String>,

        #[arg(short, long)]
        log: String,

        directory: PathBuf,
    },

    /// Store browser cookies and verify them against the API
    Auth {
        #[arg(long, default_value_t = false)]
        verify_only: bool,
    },

    /// Show the build history of branches
    Board {
        #[arg(short, long)]
        repo: Option<String>,

        branches: Vec<String>,

        /// Builds per branch
        #[arg(short = 'n', long)]
        builds: Option<usize>,

        /// Keep polling and redraw; saved for later runs
        #[arg(long, value_name = "BOOL")]
        auto_refresh: Option<bool>,

        /// Draw once and exit, whatever the saved auto-refresh says
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Seconds between refreshes
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExtractFormat {
    Csv,
    Table,
}

impl Cli {
    /// Default log filter, overridden by `RUST_LOG`.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(url) = &self.api_url {
            config.api.url.clone_from(url);
        }
        if let Some(timeout) = self.request_timeout {
            config.api.request_timeout_ms = Some(timeout);
        }
        if let Some(retries) = self.connection_retries {
            config.api.connection_retries = retries;
        }
        if let Some(auth_file) = &self.auth_file {
            config.api.auth_file = Some(auth_file.clone());
        }
        Ok(config)
    }

    fn client(&self, config: &Config) -> Result<CirrusClient> {
        let credentials = Credentials::resolve(
            self.token.as_deref(),
            self.cookie.as_deref(),
            &config.auth_file()?,
        )?;
        Ok(CirrusClient::new(&config.client_settings(), Some(credentials))?)
    }

    async fn execute_extract(
        &self,
        repo: &str,
        regexes: &[String],
        log_name: &str,
        not_found: &str,
        format: ExtractFormat,
        builds: &[String],
    ) -> Result<()> {
        let specs = builds
            .iter()
            .map(|build| build.parse::<BuildSpec>())
            .collect::<Result<Vec<_>, _>>()?;
        let regexes = regexes
            .iter()
            .map(|pattern| compile_extraction_regex(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let config = self.load_config()?;
        let client = self.client(&config)?;
        let repository_id = client
            .resolve_repository_id(repo, config.api.default_owner.as_deref())
            .await?;

        info!("Extracting from {log_name} of {} builds", specs.len());
        let spinner = (!self.quiet).then(|| Spinner::start("Fetching build logs"));
        let fetched = try_join_all(
            specs
                .iter()
                .map(|spec| client.fetch_build_logs(&repository_id, spec, log_name)),
        )
        .await;
        let build_logs = match fetched {
            Ok(build_logs) => {
                if let Some(spinner) = spinner {
                    spinner.finish("Fetched build logs");
                }
                build_logs
            }
            Err(e) => {
                if let Some(spinner) = spinner {
                    spinner.fail("Fetching build logs failed");
                }
                return Err(e.into());
            }
        };

        let tables: Vec<ExtractionTable> = regexes
            .iter()
            .map(|regex| ExtractionTable::build(regex, &build_logs))
            .collect();
        print_extraction(&tables, not_found, format == ExtractFormat::Csv);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_logs(
        &self,
        repo: Option<&str>,
        branch: Option<&str>,
        builds: usize,
        task_names: &[String],
        task_ids: &[String],
        log_name: &str,
        directory: &std::path::Path,
    ) -> Result<()> {
        let config = self.load_config()?;
        let client = self.client(&config)?;

        let targets: Vec<LogTarget> = if task_ids.is_empty() {
            let repo = repo.context("A repository is required unless task IDs are given")?;
            let repository_id = client
                .resolve_repository_id(repo, config.api.default_owner.as_deref())
                .await?;
            let details = client
                .fetch_builds_with_tasks(&repository_id, branch, builds)
                .await?;
            details
                .iter()
                .flat_map(|build| {
                    build
                        .tasks
                        .iter()
                        .filter(|task| task_names.is_empty() || task_names.contains(&task.name))
                        .map(|task| LogTarget::for_task(task, &build.branch))
                })
                .collect()
        } else {
            task_ids.iter().map(LogTarget::for_id).collect()
        };

        if targets.is_empty() {
            warn!("No tasks matched; nothing to download");
            return Ok(());
        }

        info!("Downloading {log_name} of {} tasks", targets.len());
        let progress = DownloadProgress::new(targets.len(), self.quiet);
        let report = client
            .download_logs(&targets, log_name, directory, |_, succeeded| {
                progress.record(succeeded);
            })
            .await?;
        progress.finish(report.succeeded.len(), report.failed.len());

        for path in &report.succeeded {
            println!("{} {}", success("✓"), path.display());
        }
        for (task_id, error) in &report.failed {
            println!("{} {} {}", failure("✗"), task_id, muted(error));
        }

        if report.succeeded.is_empty() {
            bail!("None of the {} log downloads succeeded", report.failed.len());
        }
        Ok(())
    }

    async fn execute_auth(&self, verify_only: bool) -> Result<()> {
        let config = self.load_config()?;
        let auth_file = config.auth_file()?;

        if !verify_only {
            let cookies = match self.cookie.as_deref() {
                Some(cookies) => cookies.to_string(),
                None => {
                    eprintln!("Paste the Cookie header of an authenticated cirrus-ci.com session:");
                    let mut line = String::new();
                    std::io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("Failed to read cookies from stdin")?;
                    line
                }
            };
            if cookies.trim().is_empty() {
                bail!("No cookies given");
            }
            let path = store_cookies(&auth_file, &cookies)?;
            info!("Credentials written to: {}", path.display());
        }

        let credentials = Credentials::resolve(self.token.as_deref(), None, &auth_file)?;
        let client = CirrusClient::new(&config.client_settings(), Some(credentials))?;
        let viewer_id = client.fetch_viewer_id().await?;
        println!(
            "{} Authenticated as viewer {}",
            success("✓"),
            accent(viewer_id)
        );
        Ok(())
    }

    async fn execute_board(
        &self,
        repo: Option<&str>,
        branches: &[String],
        builds: Option<usize>,
        auto_refresh: Option<bool>,
        once: bool,
        interval: Option<u64>,
    ) -> Result<()> {
        let config = self.load_config()?;
        let wallboard_path = WallboardConfig::default_path()?;
        let saved = WallboardConfig::load(&wallboard_path)?;

        let wallboard = saved.merged(repo, branches, auto_refresh);
        if wallboard.repo.is_empty() {
            bail!("No repository given and none saved in {}", wallboard_path.display());
        }
        if wallboard.branches.is_empty() {
            bail!("No branches given and none saved in {}", wallboard_path.display());
        }
        if wallboard != saved {
            wallboard.save(&wallboard_path)?;
        }

        let mut options = config.manager_options();
        if let Some(builds) = builds {
            options.builds_per_branch = builds;
        }
        if let Some(interval) = interval {
            options.refresh_interval = Duration::from_secs(interval.max(1));
        }
        let redraw_every = options.refresh_interval;

        let client = self.client(&config)?;
        let repository_id = client
            .resolve_repository_id(&wallboard.repo, config.api.default_owner.as_deref())
            .await?;
        let manager = BuildDataManager::new(Arc::new(client), options);

        let spinner = (!self.quiet).then(|| Spinner::start("Loading builds"));
        let summaries = manager.reload(&repository_id, &wallboard.branches).await;
        let summaries = match summaries {
            Ok(summaries) => {
                if let Some(spinner) = spinner {
                    spinner.finish("Loaded builds");
                }
                summaries
            }
            Err(e) => {
                if let Some(spinner) = spinner {
                    spinner.fail("Loading builds failed");
                }
                return Err(e.into());
            }
        };
        for (branch, summary) in &summaries {
            info!(
                "Branch '{branch}': {} builds loaded, {} failed",
                summary.loaded, summary.failed
            );
        }

        let draw = || {
            let histories: Vec<_> = wallboard
                .branches
                .iter()
                .map(|branch| (branch.clone(), manager.history(branch)))
                .collect();
            print_board(&histories, |task_id| manager.task_diff(task_id));
        };
        draw();

        if !wallboard.polls(once) {
            return Ok(());
        }

        manager.start_background_refresh(repository_id, wallboard.branches.clone());
        let term = console::Term::stdout();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                () = tokio::time::sleep(redraw_every) => {
                    let _ = term.clear_screen();
                    draw();
                }
            }
        }
        manager.stop_background_refresh();

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Extract {
                repo,
                regexes,
                log,
                not_found,
                format,
                builds,
            } => {
                self.execute_extract(repo, regexes, log, not_found, *format, builds)
                    .await
            }
            Commands::Logs {
                repo,
                branch,
                builds,
                task_names,
                task_ids,
                log,
                directory,
            } => {
                self.execute_logs(
                    repo.as_deref(),
                    branch.as_deref(),
                    *builds,
                    task_names,
                    task_ids,
                    log,
                    directory,
                )
                .await
            }
            Commands::Auth { verify_only } => self.execute_auth(*verify_only).await,
            Commands::Board {
                repo,
                branches,
                builds,
                auto_refresh,
                once,
                interval,
            } => {
                self.execute_board(
                    repo.as_deref(),
                    branches,
                    *builds,
                    *auto_refresh,
                    *once,
                    *interval,
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_extract() {
        let cli = Cli::try_parse_from([
            "quirrus", "extract", "-r", "acme/widgets", "-x", r"(?<data>\d+)", "-x", "b(?<data>.)",
            "-l", "build.log", "--format", "table", "main", "main~2",
        ])
        .unwrap();

        match cli.command {
            Commands::Extract {
                regexes,
                format,
                builds,
                not_found,
                ..
            } => {
                assert_eq!(regexes.len(), 2);
                assert_eq!(format, ExtractFormat::Table);
                assert_eq!(builds, vec!["main", "main~2"]);
                assert_eq!(not_found, "-");
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn test_logs_requires_repo_or_task_ids() {
        assert!(Cli::try_parse_from(["quirrus", "logs", "-l", "build.log", "out"]).is_err());
        assert!(Cli::try_parse_from([
            "quirrus", "logs", "--task-ids", "1,2", "-l", "build.log", "out"
        ])
        .is_ok());
    }

    #[test]
    fn test_parse_board_auto_refresh() {
        let cli = Cli::try_parse_from([
            "quirrus", "board", "--auto-refresh", "false", "--once", "main",
        ])
        .unwrap();
        match cli.command {
            Commands::Board {
                auto_refresh,
                once,
                branches,
                ..
            } => {
                assert_eq!(auto_refresh, Some(false));
                assert!(once);
                assert_eq!(branches, vec!["main"]);
            }
            _ => panic!("expected board"),
        }

        let cli = Cli::try_parse_from(["quirrus", "board", "main"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Board {
                auto_refresh: None,
                once: false,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["quirrus", "board", "--auto-refresh", "maybe"]).is_err());
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["quirrus", "-vv", "board", "main"]).unwrap();
        assert_eq!(cli.log_level(), "debug");
        let cli = Cli::try_parse_from(["quirrus", "--quiet", "-v", "auth"]).unwrap();
        assert_eq!(cli.log_level(), "error");
    }

    #[test]
    fn test_flags_override_config_file() {
        let cli = Cli::try_parse_from([
            "quirrus",
            "--api-url",
            "http://localhost:9000/graphql",
            "--connection-retries",
            "1",
            "--config",
            "missing-quirrus.toml",
            "auth",
        ])
        .unwrap();
        assert!(cli.load_config().is_err());

        let cli = Cli::try_parse_from([
            "quirrus",
            "--api-url",
            "http://localhost:9000/graphql",
            "--request-timeout",
            "250",
            "auth",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.api.url, "http://localhost:9000/graphql");
        assert_eq!(config.api.request_timeout_ms, Some(250));
    }
}
