//! Report aggregation over the local workspace tree.
//!
//! The pipeline trusts the local filesystem, not the remote catalog: every
//! directory under `root/project_key` is analyzed, including repositories
//! that were removed remotely or never synced by this tool.

use crate::analysis::provider::{AnalysisError, AnalysisProvider};
use crate::config::AnalysisOptions;
use crate::layout::WorkspaceLayout;
use crate::models::{ProjectReport, Report, ReportMetadata, ReportNode};
use crate::progress;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const REPORT_DESCRIPTION: &str = "Summary of developer contribution";

/// Walks project → repository and builds the [`Report`].
pub struct AggregationPipeline {
    provider: Arc<dyn AnalysisProvider>,
    options: AnalysisOptions,
    timeout: Duration,
    concurrency: usize,
    show_progress: bool,
}

impl AggregationPipeline {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        options: AnalysisOptions,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            options,
            timeout,
            concurrency: concurrency.max(1),
            show_progress: false,
        }
    }

    /// Show a progress bar per project.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Analyze every local repository of every project key.
    ///
    /// One failing repository never stops the run; it is recorded as an
    /// error node. Totals are computed once from the finished projects.
    pub async fn run(&self, layout: &WorkspaceLayout, project_keys: &[String]) -> Report {
        let mut projects = Vec::with_capacity(project_keys.len());

        for project_key in project_keys {
            projects.push(self.run_project(layout, project_key).await);
        }

        let report = Report::from_projects(self.metadata(), projects);
        info!(
            "Analyzed {} repositories ({} failed), {} lines in total",
            report.repository_count, report.failed_count, report.total_loc
        );
        report
    }

    /// Analyze the repositories of a single project key.
    pub async fn run_project(&self, layout: &WorkspaceLayout, project_key: &str) -> ProjectReport {
        let names = match layout.list_repositories(project_key) {
            Ok(names) => names,
            Err(e) => {
                error!("Cannot list repositories of project {}: {}", project_key, e);
                Vec::new()
            }
        };

        if names.is_empty() {
            warn!("No local repositories for project {}", project_key);
        } else {
            info!(
                "Analyzing {} repositories in project {}",
                names.len(),
                project_key
            );
        }

        let project_dir = layout.project_dir(project_key);
        let bar = progress::repository_bar(names.len(), project_key, self.show_progress);

        // `buffered` yields in input order, so the listing order survives
        // concurrent analysis.
        let repositories: Vec<ReportNode> = stream::iter(names)
            .map(|name| {
                let path = project_dir.join(&name);
                let bar = &bar;
                async move {
                    let node = self.analyze_repository(project_key, name, path).await;
                    bar.inc(1);
                    node
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        bar.finish_and_clear();

        ProjectReport {
            project_name: project_key.to_string(),
            repositories,
        }
    }

    /// Analyze one repository of one project.
    ///
    /// The report has a single project with a single node; a missing working
    /// copy is recorded as an error node.
    pub async fn run_repository(
        &self,
        layout: &WorkspaceLayout,
        project_key: &str,
        repo_name: &str,
    ) -> Report {
        let node = match layout.repo_dir(project_key, repo_name) {
            Some(path) if path.is_dir() => {
                self.analyze_repository(project_key, repo_name.to_string(), path)
                    .await
            }
            Some(path) => {
                error!("No local working copy at {}", path.display());
                ReportNode::failed(
                    repo_name,
                    format!("no local working copy at {}", path.display()),
                )
            }
            None => ReportNode::failed(repo_name, "not a valid repository directory name"),
        };

        let project = ProjectReport {
            project_name: project_key.to_string(),
            repositories: vec![node],
        };
        Report::from_projects(self.metadata(), vec![project])
    }

    async fn analyze_repository(
        &self,
        project_key: &str,
        repo_name: String,
        path: PathBuf,
    ) -> ReportNode {
        let result = tokio::time::timeout(self.timeout, self.provider.analyze(&path, &self.options))
            .await
            .unwrap_or(Err(AnalysisError::Timeout(self.timeout)));

        match result {
            Ok(stats) => {
                info!(
                    "Analyzed {}/{}: {} lines, {} commits",
                    project_key, repo_name, stats.total.loc, stats.total.commits
                );
                ReportNode::analyzed(repo_name, stats)
            }
            Err(e) => {
                error!(
                    "Analysis failed for {}/{} ({}): {}",
                    project_key,
                    repo_name,
                    path.display(),
                    e
                );
                ReportNode::failed(repo_name, e.to_string())
            }
        }
    }

    fn metadata(&self) -> ReportMetadata {
        ReportMetadata {
            generated_at: Utc::now(),
            analyzer: self.provider.name(),
            parameters: serde_json::to_value(&self.options).unwrap_or(serde_json::Value::Null),
            description: REPORT_DESCRIPTION.to_string(),
        }
    }
}
