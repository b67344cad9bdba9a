//! Configuration file handling.
//!
//! This module handles loading `.repocensus.toml`, merging it with
//! command-line arguments and validating the result before any work begins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".repocensus.toml";

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Remote catalog settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Local mirror settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Analysis provider settings.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Basic-auth credentials for the remote and for cloning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Report output path.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Report format.
    #[serde(default)]
    pub format: ReportFormat,

    /// Repositories synced or analyzed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            format: ReportFormat::default(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("repocensus_report.json")
}

fn default_concurrency() -> usize {
    4
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// JSON document (default)
    #[default]
    Json,
    /// Markdown summary
    Markdown,
}

/// Remote catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Repository listing endpoint, without the workspace segment.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Workspace slug.
    #[serde(default)]
    pub workspace: String,

    /// Project keys whose repositories are mirrored and analyzed.
    #[serde(default)]
    pub project_keys: Vec<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_remote_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            workspace: String::new(),
            project_keys: Vec::new(),
            timeout_seconds: default_remote_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.bitbucket.org/2.0/repositories".to_string()
}

fn default_remote_timeout() -> u64 {
    30
}

/// Local mirror settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root directory of the `project_key/repo_name` tree.
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    /// Branch to check out on clone (remote default when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Bound on a single clone or update, in seconds.
    #[serde(default = "default_sync_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            branch: None,
            timeout_seconds: default_sync_timeout(),
        }
    }
}

fn default_destination() -> PathBuf {
    PathBuf::from("repositories")
}

fn default_sync_timeout() -> u64 {
    900
}

/// Options handed to every analysis provider invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Only count commits after this date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,

    /// Only count commits before this date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,

    /// Branch or revision to analyze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, rename = "show_total")]
    pub include_totals: bool,

    #[serde(default, rename = "show_email")]
    pub include_email: bool,

    /// Line counting mode, e.g. `surv` or `ins,del`.
    #[serde(default = "default_loc", rename = "loc")]
    pub line_counting_mode: String,

    /// Output shape requested from the provider. Only `json` can be decoded.
    #[serde(default = "default_output_shape", rename = "format")]
    pub output_shape: String,

    /// Detect moved lines within a file.
    #[serde(default)]
    pub detect_moves: bool,

    /// Detect lines moved or copied across files.
    #[serde(default)]
    pub detect_copies: bool,

    /// Suppress the provider's progress output.
    #[serde(default = "default_true")]
    pub silent_progress: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            branch: None,
            include_totals: false,
            include_email: false,
            line_counting_mode: default_loc(),
            output_shape: default_output_shape(),
            detect_moves: false,
            detect_copies: false,
            silent_progress: true,
        }
    }
}

fn default_loc() -> String {
    "ins,del".to_string()
}

fn default_output_shape() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

/// Analysis provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Program and leading arguments used to invoke the analyzer.
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Bound on a single repository analysis, in seconds.
    #[serde(default = "default_analyzer_timeout")]
    pub timeout_seconds: u64,

    #[serde(flatten)]
    pub options: AnalysisOptions,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            timeout_seconds: default_analyzer_timeout(),
            options: AnalysisOptions::default(),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["python".to_string(), "-m".to_string(), "gitfame".to_string()]
}

fn default_analyzer_timeout() -> u64 {
    600
}

/// Username and app password used for basic authentication.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref workspace) = args.workspace {
            self.remote.workspace = workspace.clone();
        }
        if let Some(ref keys) = args.project {
            self.remote.project_keys = keys.clone();
        }
        if let Some((key, _)) = args.repository_selector() {
            self.remote.project_keys = vec![key];
        }
        if let Some(ref destination) = args.destination {
            self.sync.destination = destination.clone();
        }
        if let Some(ref output) = args.output {
            self.general.output = output.clone();
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }

        // Analysis window
        if let Some(ref since) = args.since {
            self.analyzer.options.since = Some(since.clone());
        }
        if let Some(ref until) = args.until {
            self.analyzer.options.until = Some(until.clone());
        }
        if let Some(ref branch) = args.branch {
            self.sync.branch = Some(branch.clone());
            self.analyzer.options.branch = Some(branch.clone());
        }

        match (&args.username, &args.app_password) {
            (Some(username), Some(password)) => {
                self.credentials = Some(Credentials {
                    username: username.clone(),
                    password: password.clone(),
                });
            }
            // A lone half is kept so that `validate` can reject it.
            (Some(username), None) => {
                let creds = self.credentials.get_or_insert_with(Credentials::default);
                creds.username = username.clone();
            }
            (None, Some(password)) => {
                let creds = self.credentials.get_or_insert_with(Credentials::default);
                creds.password = password.clone();
            }
            (None, None) => {}
        }
    }

    /// Check every setting the run depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.remote.workspace.trim().is_empty() {
            return invalid("remote.workspace must be set");
        }
        if self.remote.project_keys.is_empty() {
            return invalid("remote.project_keys must list at least one project key");
        }
        if self.remote.project_keys.iter().any(|k| k.trim().is_empty()) {
            return invalid("remote.project_keys must not contain empty keys");
        }
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            return invalid("remote.base_url must start with 'http://' or 'https://'");
        }
        if self.sync.destination.as_os_str().is_empty() {
            return invalid("sync.destination must be set");
        }
        if self.general.concurrency == 0 {
            return invalid("general.concurrency must be at least 1");
        }
        if self.remote.timeout_seconds == 0
            || self.sync.timeout_seconds == 0
            || self.analyzer.timeout_seconds == 0
        {
            return invalid("timeouts must be at least 1 second");
        }
        if self.analyzer.command.is_empty() || self.analyzer.command[0].trim().is_empty() {
            return invalid("analyzer.command must name a program");
        }
        if let Some(ref creds) = self.credentials {
            if creds.username.trim().is_empty() || creds.password.is_empty() {
                return invalid("credentials need both a username and an app password");
            }
        }
        if !self.analyzer.options.output_shape.eq_ignore_ascii_case("json") {
            return invalid("analyzer.format must be 'json'; other shapes cannot be decoded");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.remote.workspace = "my-workspace".to_string();
        config.remote.project_keys = vec!["PROJ".to_string()];
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
