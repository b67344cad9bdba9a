//! Git transport operations.
//!
//! This module clones repositories and fast-forwards existing working
//! copies using the git2 library. All work happens on explicit paths; the
//! process working directory is never changed.

use crate::config::Credentials;
use async_trait::async_trait;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Credential callbacks libgit2 may issue before giving up.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Errors raised by clone or update.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("local branch {branch} has diverged from origin; refusing to update")]
    Diverged { branch: String },

    #[error("HEAD is detached in {0}; nothing to fast-forward")]
    DetachedHead(PathBuf),

    #[error("git task failed: {0}")]
    Join(String),

    #[error("transfer cancelled")]
    Cancelled,
}

/// Asks an in-flight clone or update to stop.
///
/// libgit2 checks the flag from its progress callbacks, so a transfer stops
/// at its next callback and cleans up after itself.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clone and update capability used by the reconciler.
///
/// Both operations must be safe to retry and must report failure instead of
/// leaving an empty working copy behind.
#[async_trait]
pub trait GitTransport: Send + Sync {
    /// Clone `url` into `destination`, which must not exist yet.
    async fn clone_repo(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelFlag,
    ) -> Result<(), TransportError>;

    /// Bring the working copy at `destination` up to date with its origin.
    async fn update(&self, destination: &Path, cancel: &CancelFlag) -> Result<(), TransportError>;
}

/// Options for cloning and updating.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Branch to checkout on clone (None for the remote default).
    pub branch: Option<String>,
    /// Credentials for HTTPS remotes.
    pub credentials: Option<Credentials>,
}

/// [`GitTransport`] backed by libgit2.
#[derive(Debug, Clone, Default)]
pub struct Git2Transport {
    options: TransportOptions,
}

impl Git2Transport {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl GitTransport for Git2Transport {
    async fn clone_repo(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelFlag,
    ) -> Result<(), TransportError> {
        let options = self.options.clone();
        let url = url.to_string();
        let destination = destination.to_path_buf();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || clone_blocking(&url, &destination, &options, &cancel))
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?
    }

    async fn update(&self, destination: &Path, cancel: &CancelFlag) -> Result<(), TransportError> {
        let options = self.options.clone();
        let destination = destination.to_path_buf();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || update_blocking(&destination, &options, &cancel))
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?
    }
}

fn fetch_options(credentials: Option<&Credentials>, cancel: &CancelFlag) -> FetchOptions<'static> {
    let mut callbacks = RemoteCallbacks::new();

    if let Some(creds) = credentials.cloned() {
        let mut attempts = 0usize;
        let cancel = cancel.clone();
        callbacks.credentials(move |_url, _username_from_url, _allowed| {
            if cancel.is_cancelled() {
                return Err(git2::Error::from_str("transfer cancelled"));
            }
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("credentials rejected"));
            }
            Cred::userpass_plaintext(&creds.username, &creds.password)
        });
    }

    let sideband_cancel = cancel.clone();
    callbacks.sideband_progress(move |_data| !sideband_cancel.is_cancelled());

    let transfer_cancel = cancel.clone();
    callbacks.transfer_progress(move |progress| {
        debug!(
            "Received {}/{} objects",
            progress.received_objects(),
            progress.total_objects()
        );
        !transfer_cancel.is_cancelled()
    });

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);
    fetch_opts
}

/// Clone a repository, removing the destination again if the clone fails.
fn clone_blocking(
    url: &str,
    destination: &Path,
    options: &TransportOptions,
    cancel: &CancelFlag,
) -> Result<(), TransportError> {
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    info!("Cloning {} into {}", url, destination.display());

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options(options.credentials.as_ref(), cancel));

    if let Some(ref branch) = options.branch {
        builder.branch(branch);
    }

    match builder.clone(url, destination) {
        Ok(_) => {
            info!("Successfully cloned repository to: {}", destination.display());
            Ok(())
        }
        Err(e) => {
            if destination.exists() {
                if let Err(cleanup) = std::fs::remove_dir_all(destination) {
                    warn!(
                        "Failed to remove partial clone at {}: {}",
                        destination.display(),
                        cleanup
                    );
                }
            }
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            Err(e.into())
        }
    }
}

/// Fetch `origin` and fast-forward the checked-out branch.
fn update_blocking(
    destination: &Path,
    options: &TransportOptions,
    cancel: &CancelFlag,
) -> Result<(), TransportError> {
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    info!("Updating {}", destination.display());

    let repo = Repository::open(destination)?;

    let head = repo.head()?;
    if !head.is_branch() {
        return Err(TransportError::DetachedHead(destination.to_path_buf()));
    }
    let branch = head
        .shorthand()
        .ok_or_else(|| git2::Error::from_str("branch name is not valid UTF-8"))?
        .to_string();
    let head_ref = head
        .name()
        .ok_or_else(|| git2::Error::from_str("reference name is not valid UTF-8"))?
        .to_string();
    drop(head);

    let mut remote = repo.find_remote("origin")?;
    let mut fetch_opts = fetch_options(options.credentials.as_ref(), cancel);
    let fetched = remote.fetch::<&str>(&[], Some(&mut fetch_opts), None);
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    fetched?;

    let upstream = repo.find_reference(&format!("refs/remotes/origin/{}", branch))?;
    let upstream_commit = repo.reference_to_annotated_commit(&upstream)?;
    let (analysis, _) = repo.merge_analysis(&[&upstream_commit])?;

    if analysis.is_up_to_date() {
        debug!("{} already up to date", destination.display());
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        return Err(TransportError::Diverged { branch });
    }

    let mut reference = repo.find_reference(&head_ref)?;
    reference.set_target(upstream_commit.id(), "repocensus: fast-forward")?;
    repo.set_head(&head_ref)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

    info!(
        "Fast-forwarded {} to {}",
        destination.display(),
        short_id(upstream_commit.id())
    );
    Ok(())
}

fn short_id(oid: git2::Oid) -> String {
    oid.to_string()[..8].to_string()
}
