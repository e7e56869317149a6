use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{Backoff, PollPolicy};
use crate::scoring::ScoringPolicy;
use crate::store::compute_roster_key;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    /// Roster file, one login per line
    pub roster: PathBuf,
    /// Where the state database lives; derived from the roster's location when unset
    pub state_dir: Option<PathBuf>,
    /// Leaderboard output file
    pub export_path: PathBuf,
    pub github: GithubConfig,
    pub fetch: FetchConfig,
    pub judge: JudgeConfig,
    pub scoring: ScoringPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    /// Env var holding comma-separated read tokens
    pub tokens_env: String,
    /// Env var holding the token used for forks, branches, PRs and comments
    pub admin_token_env: String,
    /// Quota assumed for a token before the first response reports one
    pub default_quota: u32,
    /// Wait applied when a token is exhausted without a reset time
    pub fallback_reset_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            timeout_ms: 30000,
            tokens_env: "GITHUB_TOKENS".to_string(),
            admin_token_env: "ADMIN".to_string(),
            default_quota: 5000,
            fallback_reset_secs: 60,
        }
    }
}

impl GithubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fallback_reset(&self) -> Duration {
        Duration::from_secs(self.fallback_reset_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: u32,
    /// Upper bound on repositories listed before ranking by stars
    pub max_repo_scan: usize,
    /// Repositories kept per entity, most starred first
    pub max_repos: usize,
    /// How many of the top repositories to read commits from
    pub commit_repos: usize,
    pub max_commits_per_repo: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_repo_scan: 300,
            max_repos: 10,
            commit_repos: 3,
            max_commits_per_repo: 100,
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30000,
        }
    }
}

impl FetchConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.initial_backoff_ms),
            max: Duration::from_millis(self.max_backoff_ms),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_interval_secs: u64,
    pub backoff_factor: f64,
    pub max_interval_secs: u64,
    pub max_attempts: u32,
    pub max_wait_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 30,
            backoff_factor: 1.5,
            max_interval_secs: 120,
            max_attempts: 20,
            max_wait_secs: 600,
        }
    }
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_secs(self.initial_interval_secs),
            backoff_factor: self.backoff_factor,
            max_interval: Duration::from_secs(self.max_interval_secs),
            max_attempts: self.max_attempts,
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Entities processed concurrently
    pub parallelism: usize,
    pub baseline_branch: String,
    /// Substring identifying the review bot's login
    pub review_bot: String,
    pub trigger_comment: String,
    /// Bot replies shorter than this are status notices, not reviews
    pub min_response_len: usize,
    pub poll: PollConfig,
    /// Run the final report phase
    pub summary_enabled: bool,
    pub coderabbit_api_url: String,
    pub coderabbit_key_env: String,
    /// Where generated reports are written
    pub report_dir: PathBuf,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            baseline_branch: "wall-of-shame-baseline".to_string(),
            review_bot: "coderabbit".to_string(),
            trigger_comment: "@coderabbitai review".to_string(),
            min_response_len: 200,
            poll: PollConfig::default(),
            summary_enabled: true,
            coderabbit_api_url: "https://api.coderabbit.ai/api/v1".to_string(),
            coderabbit_key_env: "CODERABBIT_API_KEY".to_string(),
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            roster: PathBuf::from("usernames.txt"),
            state_dir: None,
            export_path: PathBuf::from("frontend/public/data.json"),
            github: GithubConfig::default(),
            fetch: FetchConfig::default(),
            judge: JudgeConfig::default(),
            scoring: ScoringPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// The configured state directory, or `<data_local_dir>/shamewall/state/<roster-key>`.
    pub fn resolve_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(env!("CARGO_PKG_NAME"));
        state_dir_under(&base, &self.roster)
    }
}

/// Ledger directory for `roster` below `base`. Keyed by where the roster
/// lives, so adding logins or comments to it keeps every earlier record.
pub fn state_dir_under(base: &Path, roster: &Path) -> PathBuf {
    base.join("state").join(compute_roster_key(roster))
}
