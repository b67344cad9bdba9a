//! Command-line interface argument parsing.
//!
//! Every option that also lives in the configuration file is optional here,
//! so that only flags actually given override the file.

use crate::config::ReportFormat;
use clap::Parser;
use std::path::PathBuf;

/// Repocensus - mirror a workspace and report who wrote the code
///
/// Clones or updates every repository of the selected project keys into
/// `destination/project_key/repo_name`, runs a contribution analyzer on each
/// local repository and writes one aggregated report.
///
/// Examples:
///   repocensus --workspace acme --project CORE,WEB
///   repocensus --workspace acme --project CORE --dry-run
///   repocensus --skip-sync --format markdown --output report.md
///   repocensus --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .repocensus.toml in the current directory
    #[arg(short, long, value_name = "FILE", env = "REPOCENSUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote workspace that owns the projects
    #[arg(short, long, value_name = "NAME")]
    pub workspace: Option<String>,

    /// Project keys to mirror and analyze (comma-separated)
    ///
    /// Example: --project CORE,WEB
    #[arg(short, long, value_name = "KEYS", value_delimiter = ',')]
    pub project: Option<Vec<String>>,

    /// Sync the project of a single repository and analyze only that repository
    ///
    /// Example: --repository CORE/api
    #[arg(long, value_name = "KEY/NAME", conflicts_with = "project")]
    pub repository: Option<String>,

    /// Root directory of the local mirror
    #[arg(short, long, value_name = "DIR")]
    pub destination: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (json, markdown)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<ReportFormat>,

    /// Number of repositories synced or analyzed at once
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Only count contributions after this date
    #[arg(long, value_name = "DATE")]
    pub since: Option<String>,

    /// Only count contributions before this date
    #[arg(long, value_name = "DATE")]
    pub until: Option<String>,

    /// Branch to clone and analyze
    ///
    /// If not specified, uses the default branch
    #[arg(short, long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Username for the remote API and HTTPS clones
    #[arg(long, value_name = "USER", env = "BITBUCKET_USERNAME")]
    pub username: Option<String>,

    /// App password for the remote API and HTTPS clones
    #[arg(
        long,
        value_name = "PASSWORD",
        env = "BITBUCKET_APP_PASSWORD",
        hide_env_values = true
    )]
    pub app_password: Option<String>,

    /// Analyze the existing local tree without contacting the remote
    #[arg(long, conflicts_with = "sync_only")]
    pub skip_sync: bool,

    /// Mirror repositories and stop before analysis
    #[arg(long, conflicts_with = "skip_sync")]
    pub sync_only: bool,

    /// Dry run: fetch catalogs and print the clone/update plan
    ///
    /// Nothing is written to disk.
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when any repository failed to sync or analyze
    #[arg(long)]
    pub strict: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .repocensus.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.skip_sync && self.sync_only {
            return Err("Cannot use both --skip-sync and --sync-only".to_string());
        }

        if self.dry_run && self.skip_sync {
            return Err("--dry-run plans the sync; it cannot be combined with --skip-sync".to_string());
        }

        if self.repository.is_some() && self.repository_selector().is_none() {
            return Err("--repository must look like KEY/NAME".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if let Some(ref keys) = self.project {
            if keys.iter().any(|k| k.trim().is_empty()) {
                return Err("Project keys must not be empty".to_string());
            }
        }

        if let Some(ref workspace) = self.workspace {
            if workspace.trim().is_empty() {
                return Err("Workspace must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Project key and repository name given with `--repository`.
    pub fn repository_selector(&self) -> Option<(String, String)> {
        let (key, name) = self.repository.as_deref()?.split_once('/')?;
        let (key, name) = (key.trim(), name.trim());
        if key.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((key.to_string(), name.to_string()))
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
