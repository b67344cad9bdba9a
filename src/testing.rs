//! Test doubles shared by the unit tests.

use crate::analysis::{AnalysisError, AnalysisProvider};
use crate::catalog::{CatalogError, PageFetcher, PageResponse};
use crate::config::AnalysisOptions;
use crate::models::{ContributionCounts, RepositoryStats};
use crate::repo::{CancelFlag, GitTransport, TransportError};
use async_trait::async_trait;
use git2::{Repository, Signature};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Serves queued catalog responses in order and records every URL asked for.
#[derive(Default)]
pub struct ScriptedPages {
    responses: Mutex<VecDeque<PageResponse>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedPages {
    pub fn push(&self, status: u16, body: String) {
        self.responses
            .lock()
            .unwrap()
            .push_back(PageResponse { status, body });
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedPages {
    async fn get(&self, url: &str) -> Result<PageResponse, CatalogError> {
        self.requested.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CatalogError::Http(format!("no scripted response for {}", url)))
    }
}

/// A catalog entry with both an HTTPS and an SSH clone link.
pub fn descriptor(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "links": {
            "clone": [
                { "name": "ssh", "href": format!("git@bitbucket.example:acme/{}.git", name) },
                { "name": "https", "href": format!("https://bitbucket.example/acme/{}.git", name) }
            ]
        }
    })
}

/// A catalog page body listing `names`, optionally pointing at a next page.
pub fn catalog_page(names: &[&str], next: Option<&str>) -> String {
    let values: Vec<_> = names.iter().map(|name| descriptor(name)).collect();
    let mut page = serde_json::json!({ "values": values, "pagelen": names.len() });
    if let Some(next) = next {
        page["next"] = serde_json::Value::String(next.to_string());
    }
    page.to_string()
}

/// Records transport calls without touching the network.
///
/// A successful clone creates the destination directory so later passes
/// see the repository as present.
#[derive(Default)]
pub struct FakeTransport {
    failing: HashSet<String>,
    delay: Option<Duration>,
    clones: Mutex<Vec<(String, PathBuf)>>,
    updates: Mutex<Vec<PathBuf>>,
    cancellations: Mutex<usize>,
}

impl FakeTransport {
    /// Fail every call whose destination directory has one of these names.
    pub fn failing_for(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        self.clones.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<PathBuf> {
        self.updates.lock().unwrap().clone()
    }

    /// Transfers that observed the cancel flag and stopped early.
    pub fn cancellations(&self) -> usize {
        *self.cancellations.lock().unwrap()
    }

    async fn simulate(&self, destination: &Path, cancel: &CancelFlag) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            let deadline = Instant::now() + delay;
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    *self.cancellations.lock().unwrap() += 1;
                    return Err(TransportError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(TransportError::Git(git2::Error::from_str(
                "simulated transport failure",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GitTransport for FakeTransport {
    async fn clone_repo(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancelFlag,
    ) -> Result<(), TransportError> {
        self.clones
            .lock()
            .unwrap()
            .push((url.to_string(), destination.to_path_buf()));
        self.simulate(destination, cancel).await?;
        fs::create_dir_all(destination).unwrap();
        Ok(())
    }

    async fn update(&self, destination: &Path, cancel: &CancelFlag) -> Result<(), TransportError> {
        self.updates.lock().unwrap().push(destination.to_path_buf());
        self.simulate(destination, cancel).await
    }
}

enum Stub {
    Loc(u64),
    DecodeFailure,
    Failure(String),
}

/// Analysis provider answering from a table keyed by repository directory name.
#[derive(Default)]
pub struct StubProvider {
    stubs: HashMap<String, Stub>,
    delays: HashMap<String, Duration>,
}

impl StubProvider {
    pub fn ok(mut self, name: &str, loc: u64) -> Self {
        self.stubs.insert(name.to_string(), Stub::Loc(loc));
        self
    }

    pub fn decode_failure(mut self, name: &str) -> Self {
        self.stubs.insert(name.to_string(), Stub::DecodeFailure);
        self
    }

    pub fn failure(mut self, name: &str, message: &str) -> Self {
        self.stubs
            .insert(name.to_string(), Stub::Failure(message.to_string()));
        self
    }

    pub fn delayed(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }
}

#[async_trait]
impl AnalysisProvider for StubProvider {
    fn name(&self) -> String {
        "stub".to_string()
    }

    async fn analyze(
        &self,
        repo_path: &Path,
        _options: &AnalysisOptions,
    ) -> Result<RepositoryStats, AnalysisError> {
        let name = repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }

        match self.stubs.get(&name) {
            Some(Stub::Loc(loc)) => Ok(RepositoryStats {
                per_author: [(
                    "Dev".to_string(),
                    ContributionCounts {
                        loc: *loc,
                        commits: 1,
                        files: 1,
                    },
                )]
                .into_iter()
                .collect(),
                total: ContributionCounts {
                    loc: *loc,
                    commits: 1,
                    files: 1,
                },
            }),
            Some(Stub::DecodeFailure) => {
                let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
                Err(AnalysisError::Decode(err))
            }
            Some(Stub::Failure(message)) => Err(AnalysisError::Failed {
                status: Some(1),
                stderr: message.clone(),
            }),
            None => Err(AnalysisError::Failed {
                status: None,
                stderr: format!("no stub for {}", name),
            }),
        }
    }
}

fn signature() -> Signature<'static> {
    Signature::now("Test Author", "author@example.com").unwrap()
}

/// A non-bare repository with a single commit adding `README.md`.
pub fn init_origin(path: &Path) -> Repository {
    fs::create_dir_all(path).unwrap();
    let repo = Repository::init(path).unwrap();
    commit_file(&repo, "README.md", "# origin\n", "initial commit");
    repo
}

/// Write `name` in the working tree and commit it on the current branch.
pub fn commit_file(repo: &Repository, name: &str, contents: &str, message: &str) {
    let workdir = repo.workdir().unwrap();
    fs::write(workdir.join(name), contents).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let sig = signature();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}
