//! Clone-or-update reconciliation of one working copy.

use crate::models::{SyncOutcome, SyncTarget};
use crate::repo::transport::{CancelFlag, GitTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Brings a single local working copy in line with its remote.
///
/// Targets touch disjoint directories, so one reconciler can serve many
/// targets concurrently.
#[derive(Clone)]
pub struct WorkspaceReconciler {
    transport: Arc<dyn GitTransport>,
    timeout: Duration,
}

impl WorkspaceReconciler {
    pub fn new(transport: Arc<dyn GitTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Clone when the destination is absent, update it in place otherwise.
    ///
    /// Never fails: transport errors and timeouts become
    /// [`SyncOutcome::Failed`]. A timed-out transfer is cancelled and awaited
    /// before returning, so nothing keeps writing into the working copy
    /// afterwards.
    pub async fn reconcile(&self, target: &SyncTarget) -> SyncOutcome {
        let present = target.local_path.exists();
        let operation = if present { "update" } else { "clone" };
        let cancel = CancelFlag::default();

        let transfer = async {
            if present {
                self.transport.update(&target.local_path, &cancel).await
            } else {
                self.transport
                    .clone_repo(&target.clone_url, &target.local_path, &cancel)
                    .await
            }
        };
        tokio::pin!(transfer);

        let result: Option<Result<(), TransportError>> =
            match tokio::time::timeout(self.timeout, &mut transfer).await {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!(
                        "{} of {}/{} timed out, waiting for the transfer to stop",
                        operation, target.project_key, target.repo_name
                    );
                    cancel.cancel();
                    if let Err(e) = transfer.await {
                        info!(
                            "Stopped {} of {}/{}: {}",
                            operation, target.project_key, target.repo_name, e
                        );
                    }
                    None
                }
            };

        let outcome = match result {
            Some(Ok(())) if present => SyncOutcome::Updated,
            Some(Ok(())) => SyncOutcome::Cloned,
            Some(Err(e)) => SyncOutcome::Failed(format!("{} failed: {}", operation, e)),
            None => SyncOutcome::Failed(format!(
                "{} timed out after {}s",
                operation,
                self.timeout.as_secs()
            )),
        };

        match outcome {
            SyncOutcome::Failed(ref reason) => error!(
                "Failed to sync repository {}/{}: {}",
                target.project_key, target.repo_name, reason
            ),
            _ => info!(
                "Repository {}/{} {}",
                target.project_key, target.repo_name, outcome
            ),
        }

        outcome
    }
}
