//! Analysis providers.
//!
//! A provider turns a repository path into [`RepositoryStats`]. The default
//! provider runs a git-fame compatible command and decodes its JSON table.

use crate::config::AnalysisOptions;
use crate::models::{ContributionCounts, RepositoryStats};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors raised while analyzing one repository.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to start analyzer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer exited with {}: {stderr}", exit_label(.status))]
    Failed { status: Option<i32>, stderr: String },

    #[error("analyzer timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("analyzer produced no output")]
    EmptyOutput,

    #[error("failed to decode analyzer output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("analyzer output has no totals")]
    MissingTotal,
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Computes contribution statistics for one repository.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Name recorded in the report metadata.
    fn name(&self) -> String;

    async fn analyze(
        &self,
        repo_path: &Path,
        options: &AnalysisOptions,
    ) -> Result<RepositoryStats, AnalysisError>;
}

/// Runs a git-fame compatible analyzer as a child process.
///
/// Only stdout is decoded. Anything the analyzer writes to stderr is logged
/// as a diagnostic.
#[derive(Debug, Clone)]
pub struct GitFameProvider {
    command: Vec<String>,
}

impl GitFameProvider {
    /// `command` is the program followed by its leading arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

/// Analyzer flags derived from the options, before the repository path.
pub fn gitfame_args(options: &AnalysisOptions) -> Vec<String> {
    let mut args = Vec::new();

    if options.detect_moves {
        args.push("-M".to_string());
    }
    if options.detect_copies {
        args.push("-C".to_string());
    }
    if !options.line_counting_mode.is_empty() {
        args.push(format!("--loc={}", options.line_counting_mode));
    }
    if let Some(ref branch) = options.branch {
        args.push(format!("--branch={}", branch));
    }
    if let Some(ref since) = options.since {
        args.push(format!("--since={}", since));
    }
    if let Some(ref until) = options.until {
        args.push(format!("--until={}", until));
    }
    if options.silent_progress {
        args.push("-s".to_string());
    }
    if options.include_totals {
        args.push("--show-total".to_string());
    }
    if options.include_email {
        args.push("--show-email".to_string());
    }
    args.push(format!("--format={}", options.output_shape));

    args
}

#[async_trait]
impl AnalysisProvider for GitFameProvider {
    fn name(&self) -> String {
        self.command.join(" ")
    }

    async fn analyze(
        &self,
        repo_path: &Path,
        options: &AnalysisOptions,
    ) -> Result<RepositoryStats, AnalysisError> {
        let (program, leading) = self.command.split_first().ok_or_else(|| AnalysisError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(gitfame_args(options))
            .arg(repo_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running analyzer: {:?}", cmd);

        let output = cmd.output().await.map_err(|source| AnalysisError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            warn!("Analyzer diagnostics for {}: {}", repo_path.display(), stderr);
        }

        if !output.status.success() {
            return Err(AnalysisError::Failed {
                status: output.status.code(),
                stderr,
            });
        }

        decode_gitfame(&output.stdout)
    }
}

/// git-fame's JSON document: totals plus an author table.
#[derive(Debug, Deserialize)]
struct GitFameDocument {
    #[serde(default)]
    total: Option<ContributionCounts>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
    #[serde(default)]
    columns: Vec<String>,
}

/// Column positions of the author table.
struct Columns {
    author: usize,
    loc: Option<usize>,
    commits: Option<usize>,
    files: Option<usize>,
}

impl Columns {
    fn resolve(names: &[String]) -> Self {
        if names.is_empty() {
            return Self {
                author: 0,
                loc: Some(1),
                commits: Some(2),
                files: Some(3),
            };
        }

        Self {
            author: position_of(names, &["author"]).unwrap_or(0),
            loc: position_of(names, &["loc"]),
            commits: position_of(names, &["coms", "commits"]),
            files: position_of(names, &["fils", "files"]),
        }
    }
}

fn position_of(names: &[String], candidates: &[&str]) -> Option<usize> {
    names
        .iter()
        .position(|name| candidates.contains(&name.trim().to_lowercase().as_str()))
}

fn count_at(row: &[Value], index: Option<usize>) -> u64 {
    let Some(value) = index.and_then(|i| row.get(i)) else {
        return 0;
    };
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f.max(0.0).round() as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(0)
}

/// Decode the analyzer's stdout into [`RepositoryStats`].
pub fn decode_gitfame(stdout: &[u8]) -> Result<RepositoryStats, AnalysisError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Err(AnalysisError::EmptyOutput);
    }

    let document: GitFameDocument = serde_json::from_str(text)?;
    let total = document.total.ok_or(AnalysisError::MissingTotal)?;
    let columns = Columns::resolve(&document.columns);

    let mut per_author: BTreeMap<String, ContributionCounts> = BTreeMap::new();
    for row in &document.data {
        let Some(author) = row.get(columns.author).and_then(Value::as_str) else {
            debug!("Skipping analyzer row without author: {:?}", row);
            continue;
        };
        let entry = per_author.entry(author.to_string()).or_default();
        entry.loc += count_at(row, columns.loc);
        entry.commits += count_at(row, columns.commits);
        entry.files += count_at(row, columns.files);
    }

    Ok(RepositoryStats { per_author, total })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "total": {"files": 12, "loc": 340, "commits": 27},
        "data": [
            ["Alice", 300, 20, 10, "88.2/74.1/83.3"],
            ["Bob", 40, 7, 2, "11.8/25.9/16.7"]
        ],
        "columns": ["Author", "loc", "coms", "fils", " distribution"]
    }"#;

    #[test]
    fn test_decode_gitfame_table() {
        let stats = decode_gitfame(SAMPLE.as_bytes()).unwrap();
        assert_eq!(stats.total.loc, 340);
        assert_eq!(stats.total.commits, 27);
        assert_eq!(stats.total.files, 12);

        let alice = &stats.per_author["Alice"];
        assert_eq!((alice.loc, alice.commits, alice.files), (300, 20, 10));
        assert_eq!(stats.per_author["Bob"].loc, 40);
    }

    #[test]
    fn test_decode_accepts_abbreviated_total_keys() {
        let stats = decode_gitfame(br#"{"total": {"loc": 5, "coms": 2, "fils": 1}}"#).unwrap();
        assert_eq!(stats.total.commits, 2);
        assert_eq!(stats.total.files, 1);
        assert!(stats.per_author.is_empty());
    }

    #[test]
    fn test_decode_zero_loc_is_valid() {
        let stats = decode_gitfame(br#"{"total": {"loc": 0, "commits": 0, "files": 0}}"#).unwrap();
        assert_eq!(stats.total.loc, 0);
    }

    #[test]
    fn test_decode_missing_total_is_error() {
        let err = decode_gitfame(br#"{"data": [], "columns": []}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingTotal));

        let err = decode_gitfame(br#"{"total": null}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingTotal));
    }

    #[test]
    fn test_decode_rejects_empty_and_malformed_output() {
        assert!(matches!(
            decode_gitfame(b"  \n").unwrap_err(),
            AnalysisError::EmptyOutput
        ));
        assert!(matches!(
            decode_gitfame(b"Total commits: 27").unwrap_err(),
            AnalysisError::Decode(_)
        ));
    }

    #[test]
    fn test_gitfame_args_from_options() {
        let options = AnalysisOptions {
            since: Some("2024-01-01".to_string()),
            until: Some("2024-12-31".to_string()),
            branch: Some("main".to_string()),
            include_totals: true,
            include_email: true,
            detect_moves: true,
            detect_copies: false,
            ..AnalysisOptions::default()
        };

        let args = gitfame_args(&options);
        assert_eq!(
            args,
            vec![
                "-M",
                "--loc=ins,del",
                "--branch=main",
                "--since=2024-01-01",
                "--until=2024-12-31",
                "-s",
                "--show-total",
                "--show-email",
                "--format=json",
            ]
        );
    }

    #[cfg(unix)]
    fn sh(script: &str) -> GitFameProvider {
        GitFameProvider::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "analyzer".to_string(),
        ])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provider_ignores_stderr_diagnostics() {
        let provider = sh(r#"echo "warming up" >&2; printf '%s' '{"total":{"loc":7,"commits":2,"files":1}}'"#);
        let stats = provider
            .analyze(Path::new("."), &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.total.loc, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provider_non_zero_exit_is_failure() {
        let provider = sh("echo 'not a git repository' >&2; exit 3");
        let err = provider
            .analyze(Path::new("."), &AnalysisOptions::default())
            .await
            .unwrap_err();

        match err {
            AnalysisError::Failed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "not a git repository");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_missing_program_is_spawn_error() {
        let provider = GitFameProvider::new(vec!["repocensus-no-such-analyzer".to_string()]);
        let err = provider
            .analyze(Path::new("."), &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Spawn { .. }));
    }
}
