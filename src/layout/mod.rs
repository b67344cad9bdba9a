//! Local workspace layout.
//!
//! Mirrored repositories live at `root/project_key/repo_name`. The sync
//! phase writes into this tree and the aggregation phase reads it back, so
//! this module is the only place that knows the convention.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// The `root/project_key/repo_name` directory convention.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every repository of a project key.
    pub fn project_dir(&self, project_key: &str) -> PathBuf {
        self.root.join(project_key)
    }

    /// Expected working copy path of a repository.
    ///
    /// Returns `None` when the name cannot be used as a single path
    /// component, so a remote name can never escape its project directory.
    pub fn repo_dir(&self, project_key: &str, repo_name: &str) -> Option<PathBuf> {
        if !is_plain_component(repo_name) {
            return None;
        }
        Some(self.project_dir(project_key).join(repo_name))
    }

    /// Create the project directory if needed. Idempotent.
    pub fn ensure_project_dir(&self, project_key: &str) -> io::Result<PathBuf> {
        let dir = self.project_dir(project_key);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// List repository directories of a project, sorted by name.
    ///
    /// A missing project directory yields an empty list. Hidden entries,
    /// plain files and dangling links are ignored. An entry that cannot be
    /// read is skipped without hiding its siblings.
    pub fn list_repositories(&self, project_key: &str) -> io::Result<Vec<String>> {
        let dir = self.project_dir(project_key);

        if !dir.exists() {
            warn!("Project directory does not exist: {}", dir.display());
            return Ok(Vec::new());
        }
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory: {}", dir.display()),
            ));
        }

        let mut repos = Vec::new();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();

            if is_hidden(&name) {
                debug!("Skipping hidden entry {}", entry.path().display());
                continue;
            }

            // Linked working copies count when the link resolves to a directory.
            let is_dir = entry.file_type().is_dir()
                || (entry.path_is_symlink() && entry.path().is_dir());
            if is_dir {
                repos.push(name);
            } else if entry.path_is_symlink() {
                warn!("Skipping link that is not a directory: {}", entry.path().display());
            }
        }

        Ok(repos)
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_plain_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_repo_dir_follows_convention() {
        let layout = WorkspaceLayout::new("/mirror");
        assert_eq!(
            layout.repo_dir("CORE", "api"),
            Some(PathBuf::from("/mirror/CORE/api"))
        );
    }

    #[test]
    fn test_repo_dir_rejects_path_like_names() {
        let layout = WorkspaceLayout::new("/mirror");
        assert!(layout.repo_dir("CORE", "..").is_none());
        assert!(layout.repo_dir("CORE", "a/b").is_none());
        assert!(layout.repo_dir("CORE", "").is_none());
    }

    #[test]
    fn test_list_repositories_sorted_dirs_only() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let project = layout.ensure_project_dir("X").unwrap();

        fs::create_dir(project.join("zeta")).unwrap();
        fs::create_dir(project.join("alpha")).unwrap();
        fs::create_dir(project.join(".cache")).unwrap();
        fs::write(project.join("notes.txt"), "not a repo").unwrap();

        let repos = layout.list_repositories("X").unwrap();
        assert_eq!(repos, vec!["alpha", "zeta"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_does_not_hide_siblings() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let project = layout.ensure_project_dir("X").unwrap();

        fs::create_dir(project.join("a")).unwrap();
        fs::create_dir(project.join("c")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("gone"), project.join("b-link")).unwrap();

        let repos = layout.list_repositories("X").unwrap();
        assert_eq!(repos, vec!["a", "c"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_link_to_directory_is_listed() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path().join("mirror"));
        let project = layout.ensure_project_dir("X").unwrap();
        let elsewhere = tmp.path().join("elsewhere");
        fs::create_dir(&elsewhere).unwrap();

        fs::create_dir(project.join("local")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, project.join("linked")).unwrap();

        let repos = layout.list_repositories("X").unwrap();
        assert_eq!(repos, vec!["linked", "local"]);
    }

    #[test]
    fn test_list_repositories_missing_project_is_empty() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        assert!(layout.list_repositories("NOPE").unwrap().is_empty());
    }

    #[test]
    fn test_ensure_project_dir_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        let first = layout.ensure_project_dir("X").unwrap();
        let second = layout.ensure_project_dir("X").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
