//! Data models shared by the sync and aggregation phases.
//!
//! Remote catalog entries, sync targets and outcomes are rebuilt on every
//! run. The [`Report`] is the only durable value: it is assembled once after
//! all repositories were analyzed and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A repository listed in the remote catalog for a project key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    /// Repository name, also used as the local directory name.
    pub name: String,
    /// HTTPS clone endpoint, if the remote advertised one.
    pub clone_url: Option<String>,
    /// Project key the repository was discovered under.
    pub project_key: String,
}

/// A remote repository joined with its expected local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub project_key: String,
    pub repo_name: String,
    pub clone_url: String,
    pub local_path: PathBuf,
}

/// Result of reconciling one [`SyncTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SyncOutcome {
    /// The destination did not exist and a full clone was made.
    Cloned,
    /// The destination existed and was brought up to date.
    Updated,
    /// Clone or update failed; the reason is kept for the run summary.
    Failed(String),
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Cloned => write!(f, "cloned"),
            SyncOutcome::Updated => write!(f, "updated"),
            SyncOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Line, commit and file counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionCounts {
    #[serde(default)]
    pub loc: u64,
    #[serde(default, alias = "coms")]
    pub commits: u64,
    #[serde(default, alias = "fils")]
    pub files: u64,
}

/// Statistics returned by an analysis provider for one repository.
///
/// Only `total.loc` is interpreted by the aggregation; the per-author detail
/// is carried into the report as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStats {
    #[serde(default)]
    pub per_author: BTreeMap<String, ContributionCounts>,
    pub total: ContributionCounts,
}

/// Per-repository entry in the report: statistics or an error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeOutcome {
    #[serde(rename = "statistics")]
    Stats(RepositoryStats),
    #[serde(rename = "error")]
    Error(String),
}

/// One analyzed (or failed) repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportNode {
    pub repository_name: String,
    #[serde(flatten)]
    pub outcome: NodeOutcome,
}

impl ReportNode {
    pub fn analyzed(repository_name: impl Into<String>, stats: RepositoryStats) -> Self {
        Self {
            repository_name: repository_name.into(),
            outcome: NodeOutcome::Stats(stats),
        }
    }

    pub fn failed(repository_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            outcome: NodeOutcome::Error(error.into()),
        }
    }

    /// Statistics, when the analysis succeeded.
    pub fn stats(&self) -> Option<&RepositoryStats> {
        match &self.outcome {
            NodeOutcome::Stats(stats) => Some(stats),
            NodeOutcome::Error(_) => None,
        }
    }

    /// Error marker, when the analysis failed.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            NodeOutcome::Stats(_) => None,
            NodeOutcome::Error(message) => Some(message),
        }
    }

    /// Lines of code this node contributes to the report total.
    pub fn loc(&self) -> u64 {
        self.stats().map(|s| s.total.loc).unwrap_or(0)
    }
}

/// All repositories found locally under one project key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_name: String,
    pub repositories: Vec<ReportNode>,
}

impl ProjectReport {
    pub fn total_loc(&self) -> u64 {
        self.repositories.iter().map(ReportNode::loc).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.repositories
            .iter()
            .filter(|node| node.error().is_some())
            .count()
    }
}

/// Parameters echoed into the report header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// When the report was assembled.
    pub generated_at: DateTime<Utc>,
    /// Human-readable name of the analysis provider.
    pub analyzer: String,
    /// Analysis options the provider was invoked with.
    pub parameters: serde_json::Value,
    pub description: String,
}

/// The complete contribution report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub project_names: Vec<String>,
    pub repository_names: Vec<String>,
    pub projects: Vec<ProjectReport>,
    pub repository_count: usize,
    pub failed_count: usize,
    pub total_loc: u64,
}

impl Report {
    /// Assemble a report, deriving every aggregate from `projects` alone.
    pub fn from_projects(metadata: ReportMetadata, projects: Vec<ProjectReport>) -> Self {
        let nodes = || projects.iter().flat_map(|p| p.repositories.iter());

        let repository_count = nodes().count();
        let failed_count = nodes().filter(|n| n.error().is_some()).count();
        let total_loc: u64 = nodes().map(ReportNode::loc).sum();

        let project_names = projects.iter().map(|p| p.project_name.clone()).collect();
        let repository_names = nodes().map(|n| n.repository_name.clone()).collect();

        Self {
            metadata,
            project_names,
            repository_names,
            projects,
            repository_count,
            failed_count,
            total_loc,
        }
    }

    /// Look up a project by name.
    pub fn project(&self, name: &str) -> Option<&ProjectReport> {
        self.projects.iter().find(|p| p.project_name == name)
    }
}
