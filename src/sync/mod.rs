//! Fleet synchronization.
//!
//! Drives the catalog client and the reconciler across every project key so
//! that `root/project_key/repo_name` mirrors the remote workspace.

use crate::catalog::{CatalogClient, CatalogError};
use crate::layout::WorkspaceLayout;
use crate::models::{RemoteRepository, SyncOutcome, SyncTarget};
use crate::progress;
use crate::repo::WorkspaceReconciler;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of one repository in a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoSync {
    pub repo_name: String,
    pub outcome: SyncOutcome,
}

/// Sync results of one project key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectSync {
    pub project_key: String,
    /// One entry per repository that had a clone URL, in discovery order.
    pub outcomes: Vec<RepoSync>,
    /// Repositories left alone because they had no usable clone URL or name.
    pub skipped: Vec<String>,
    /// Why the catalog for this key could not be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_error: Option<String>,
}

impl ProjectSync {
    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn outcome(&self, repo_name: &str) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.repo_name == repo_name)
            .map(|r| &r.outcome)
    }
}

/// Counts across a whole sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub cloned: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub catalog_failures: usize,
}

impl SyncSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.catalog_failures > 0
    }
}

/// Sync results keyed by project, in the order the keys were given.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub projects: Vec<ProjectSync>,
}

impl SyncReport {
    pub fn project(&self, project_key: &str) -> Option<&ProjectSync> {
        self.projects.iter().find(|p| p.project_key == project_key)
    }

    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for project in &self.projects {
            summary.cloned += project.count(|o| *o == SyncOutcome::Cloned);
            summary.updated += project.count(|o| *o == SyncOutcome::Updated);
            summary.failed += project.count(SyncOutcome::is_failure);
            summary.skipped += project.skipped.len();
            if project.catalog_error.is_some() {
                summary.catalog_failures += 1;
            }
        }
        summary
    }
}

/// Split a catalog into sync targets and skipped repository names.
pub fn plan_targets(
    layout: &WorkspaceLayout,
    remotes: Vec<RemoteRepository>,
) -> (Vec<SyncTarget>, Vec<String>) {
    let mut targets = Vec::new();
    let mut skipped = Vec::new();

    for remote in remotes {
        let Some(clone_url) = remote.clone_url else {
            warn!(
                "Skipping {}/{}: no HTTPS clone URL",
                remote.project_key, remote.name
            );
            skipped.push(remote.name);
            continue;
        };
        let Some(local_path) = layout.repo_dir(&remote.project_key, &remote.name) else {
            warn!(
                "Skipping {}/{}: name is not usable as a directory",
                remote.project_key, remote.name
            );
            skipped.push(remote.name);
            continue;
        };

        targets.push(SyncTarget {
            project_key: remote.project_key,
            repo_name: remote.name,
            clone_url,
            local_path,
        });
    }

    (targets, skipped)
}

/// Mirrors every project key of the workspace into the local layout.
pub struct FleetSyncCoordinator {
    catalog: CatalogClient,
    reconciler: WorkspaceReconciler,
    layout: WorkspaceLayout,
    concurrency: usize,
    show_progress: bool,
}

impl FleetSyncCoordinator {
    pub fn new(
        catalog: CatalogClient,
        reconciler: WorkspaceReconciler,
        layout: WorkspaceLayout,
        concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            reconciler,
            layout,
            concurrency: concurrency.max(1),
            show_progress: false,
        }
    }

    /// Show a progress bar per project.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Fetch the catalog of a key and plan its targets without touching disk.
    pub async fn plan(
        &self,
        project_key: &str,
    ) -> Result<(Vec<SyncTarget>, Vec<String>), CatalogError> {
        let remotes = self.catalog.fetch(project_key).await?;
        Ok(plan_targets(&self.layout, remotes))
    }

    /// Sync every project key. A failing key is recorded and the next key
    /// is processed; the returned report never aborts early.
    pub async fn sync(&self, project_keys: &[String]) -> SyncReport {
        let mut report = SyncReport::default();

        for project_key in project_keys {
            info!("Looking into project key: {}", project_key);
            report.projects.push(self.sync_project(project_key).await);
        }

        let summary = report.summary();
        info!(
            "Sync finished: {} cloned, {} updated, {} failed, {} skipped, {} catalog failures",
            summary.cloned,
            summary.updated,
            summary.failed,
            summary.skipped,
            summary.catalog_failures
        );
        report
    }

    async fn sync_project(&self, project_key: &str) -> ProjectSync {
        let mut result = ProjectSync {
            project_key: project_key.to_string(),
            ..ProjectSync::default()
        };

        let (targets, skipped) = match self.plan(project_key).await {
            Ok(plan) => plan,
            Err(e) => {
                error!("Catalog fetch failed for project {}: {}", project_key, e);
                result.catalog_error = Some(e.to_string());
                return result;
            }
        };
        result.skipped = skipped;

        // The project directory must exist before any clone into it starts.
        if let Err(e) = self.layout.ensure_project_dir(project_key) {
            error!(
                "Cannot create directory for project {}: {}",
                project_key, e
            );
            let reason = format!("cannot create project directory: {}", e);
            result.outcomes = targets
                .into_iter()
                .map(|t| RepoSync {
                    repo_name: t.repo_name,
                    outcome: SyncOutcome::Failed(reason.clone()),
                })
                .collect();
            return result;
        }

        let bar = progress::repository_bar(targets.len(), project_key, self.show_progress);

        result.outcomes = stream::iter(targets)
            .map(|target| {
                let bar = &bar;
                async move {
                    let outcome = self.reconciler.reconcile(&target).await;
                    bar.inc(1);
                    RepoSync {
                        repo_name: target.repo_name,
                        outcome,
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        bar.finish_and_clear();
        result
    }
}
