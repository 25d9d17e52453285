use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("working tree has uncommitted changes: {0}")]
    DirtyWorkingTree(String),
    #[error("repository has no commits and a non-empty index; commit it first")]
    UnbornWithStagedChanges,
    #[error("could not run git: {0}")]
    Io(#[from] std::io::Error),
}

/// The git operations the fixer needs. One handle per project directory.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// True when the directory is anywhere inside a work tree, not only at its top.
    async fn is_repository(&self) -> bool;

    async fn init(&self) -> Result<(), GitError>;

    /// Name of the checked-out branch; works on an unborn branch too.
    async fn current_branch(&self) -> Result<String, GitError>;

    async fn branch_exists(&self, name: &str) -> Result<bool, GitError>;

    async fn branch(&self, name: &str) -> Result<(), GitError>;

    async fn checkout(&self, name: &str, force: bool) -> Result<(), GitError>;

    /// Stages `files` and commits, allowing an empty commit. Returns the new HEAD hash.
    async fn commit(&self, message: &str, files: &[PathBuf]) -> Result<String, GitError>;

    async fn merge(&self, branch: &str) -> Result<(), GitError>;

    async fn merge_abort(&self) -> Result<(), GitError>;

    async fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError>;

    /// True when tracked files have no staged or unstaged changes.
    async fn is_clean(&self) -> Result<bool, GitError>;

    /// Untracked, non-ignored files below the project directory, relative to it.
    async fn untracked_files(&self) -> Result<Vec<PathBuf>, GitError>;

    /// Ignored entries below the project directory. Wholly ignored
    /// directories are listed once, with a trailing separator.
    async fn ignored_files(&self) -> Result<Vec<PathBuf>, GitError>;

    async fn reset_hard(&self) -> Result<(), GitError>;
}

/// `git` CLI driven through tokio processes.
pub struct GitRepository {
    dir: PathBuf,
    identity: Option<(String, String)>,
}

impl GitRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            identity: None,
        }
    }

    /// Author used for commits, passed per invocation so user config is untouched.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let mut command = Command::new("git");
        if let Some((name, email)) = &self.identity {
            command
                .arg("-c")
                .arg(format!("user.name={}", name))
                .arg("-c")
                .arg(format!("user.email={}", email));
        }
        let output = command
            .args(args)
            .current_dir(&self.dir)
            .kill_on_drop(true)
            .output()
            .await?;

        debug!(args = ?args, status = ?output.status.code(), "git");
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn has_commits(&self) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", "HEAD"]).await.is_ok()
    }

    /// Makes sure fix branches have a commit to return to.
    ///
    /// A directory inside an existing work tree is driven through that
    /// repository as is; only its missing base commit is added, and that
    /// commit is empty. A directory outside any work tree becomes a new
    /// repository whose first commit holds its current files.
    pub async fn ensure_repository(&self) -> Result<(), GitError> {
        if self.is_repository().await {
            if !self.has_commits().await {
                let staged = self.git(&["status", "--porcelain", "--untracked-files=no"]).await?;
                if !staged.is_empty() {
                    return Err(GitError::UnbornWithStagedChanges);
                }
                self.git(&["commit", "--allow-empty", "-m", "Initial commit by shellmend"])
                    .await?;
            }
            return Ok(());
        }

        info!(dir = %self.dir.display(), "initializing git repository");
        self.init().await?;
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "--allow-empty", "-m", "Initial commit by shellmend"])
            .await?;
        Ok(())
    }

    async fn list_paths(&self, args: &[&str]) -> Result<Vec<PathBuf>, GitError> {
        let listing = self.git(args).await?;
        Ok(listing
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

#[async_trait]
impl VersionControl for GitRepository {
    async fn is_repository(&self) -> bool {
        matches!(
            self.git(&["rev-parse", "--is-inside-work-tree"]).await,
            Ok(inside) if inside == "true"
        )
    }

    async fn init(&self) -> Result<(), GitError> {
        self.git(&["init"]).await.map(|_| ())
    }

    async fn current_branch(&self) -> Result<String, GitError> {
        self.git(&["symbolic-ref", "--short", "HEAD"]).await
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
        let reference = format!("refs/heads/{}", name);
        Ok(self
            .git(&["show-ref", "--verify", "--quiet", &reference])
            .await
            .is_ok())
    }

    async fn branch(&self, name: &str) -> Result<(), GitError> {
        self.git(&["branch", name]).await.map(|_| ())
    }

    async fn checkout(&self, name: &str, force: bool) -> Result<(), GitError> {
        let mut args = vec!["checkout"];
        if force {
            args.push("-f");
        }
        args.push(name);
        self.git(&args).await.map(|_| ())
    }

    async fn commit(&self, message: &str, files: &[PathBuf]) -> Result<String, GitError> {
        if !files.is_empty() {
            let mut args: Vec<String> = vec!["add".into(), "--".into()];
            args.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.git(&args).await?;
        }
        self.git(&["commit", "--allow-empty", "-m", message]).await?;
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn merge(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["merge", "--no-edit", branch]).await.map(|_| ())
    }

    async fn merge_abort(&self) -> Result<(), GitError> {
        self.git(&["merge", "--abort"]).await.map(|_| ())
    }

    async fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.git(&["branch", flag, name]).await.map(|_| ())
    }

    async fn is_clean(&self) -> Result<bool, GitError> {
        let status = self
            .git(&["status", "--porcelain", "--untracked-files=no"])
            .await?;
        Ok(status.is_empty())
    }

    async fn untracked_files(&self) -> Result<Vec<PathBuf>, GitError> {
        self.list_paths(&["ls-files", "--others", "--exclude-standard"])
            .await
    }

    async fn ignored_files(&self) -> Result<Vec<PathBuf>, GitError> {
        self.list_paths(&["ls-files", "--others", "--ignored", "--exclude-standard", "--directory"])
            .await
    }

    async fn reset_hard(&self) -> Result<(), GitError> {
        self.git(&["reset", "--hard"]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    async fn repo() -> (tempfile::TempDir, GitRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = GitRepository::new(dir.path()).with_identity("Test", "test@example.com");
        repo.ensure_repository().await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn ensure_repository_creates_a_base_commit() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();
        let repo = GitRepository::new(dir.path()).with_identity("Test", "test@example.com");

        assert!(!repo.is_repository().await);
        repo.ensure_repository().await.unwrap();

        assert!(repo.is_repository().await);
        assert!(repo.is_clean().await.unwrap());
        assert!(repo.untracked_files().await.unwrap().is_empty());
        assert!(!repo.current_branch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn branch_commit_merge_cycle() {
        if !git_available() {
            return;
        }
        let (dir, repo) = repo().await;
        let base = repo.current_branch().await.unwrap();

        repo.branch("error-fix-1").await.unwrap();
        assert!(repo.branch_exists("error-fix-1").await.unwrap());
        repo.checkout("error-fix-1", false).await.unwrap();

        fs::write(dir.path().join("fixed.txt"), "ok").unwrap();
        assert_eq!(
            repo.untracked_files().await.unwrap(),
            vec![PathBuf::from("fixed.txt")]
        );
        let hash = repo
            .commit("Auto-fix: create file", &[PathBuf::from("fixed.txt")])
            .await
            .unwrap();
        assert_eq!(hash.len(), 40);

        repo.checkout(&base, false).await.unwrap();
        repo.merge("error-fix-1").await.unwrap();
        repo.delete_branch("error-fix-1", false).await.unwrap();

        assert!(!repo.branch_exists("error-fix-1").await.unwrap());
        assert!(dir.path().join("fixed.txt").exists());
    }

    #[tokio::test]
    async fn dirty_tree_is_detected_and_reset() {
        if !git_available() {
            return;
        }
        let (dir, repo) = repo().await;
        fs::write(dir.path().join("tracked.txt"), "v1").unwrap();
        repo.commit("add", &[PathBuf::from("tracked.txt")]).await.unwrap();

        fs::write(dir.path().join("tracked.txt"), "v2").unwrap();
        assert!(!repo.is_clean().await.unwrap());

        repo.reset_hard().await.unwrap();
        assert!(repo.is_clean().await.unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("tracked.txt")).unwrap(), "v1");
    }

    fn git_in(dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[tokio::test]
    async fn subdirectory_of_existing_repo_is_not_reinitialized() {
        if !git_available() {
            return;
        }
        let outer = tempfile::tempdir().unwrap();
        let sub = outer.path().join("src");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("app.py"), "print('app')\n").unwrap();
        git_in(outer.path(), &["init", "-q"]);
        git_in(outer.path(), &["add", "src/app.py"]);
        git_in(outer.path(), &["commit", "-qm", "base"]);
        fs::write(sub.join("wip.py"), "# not ready\n").unwrap();
        let head = git_in(outer.path(), &["rev-parse", "HEAD"]);

        let repo = GitRepository::new(&sub).with_identity("Test", "test@example.com");
        assert!(repo.is_repository().await);
        repo.ensure_repository().await.unwrap();

        assert!(!sub.join(".git").exists());
        assert_eq!(git_in(outer.path(), &["rev-parse", "HEAD"]), head);
        assert_eq!(repo.untracked_files().await.unwrap(), vec![PathBuf::from("wip.py")]);

        // Paths stay relative to the project directory while the enclosing repo records them.
        repo.branch("error-fix-1").await.unwrap();
        repo.checkout("error-fix-1", false).await.unwrap();
        fs::write(sub.join("fixed.txt"), "ok").unwrap();
        let hash = repo.commit("Auto-fix: add file", &[PathBuf::from("fixed.txt")]).await.unwrap();
        assert_eq!(
            git_in(outer.path(), &["show", "--pretty=format:", "--name-only", &hash]),
            "src/fixed.txt"
        );
    }

    #[tokio::test]
    async fn unborn_repo_gets_an_empty_base_commit() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        git_in(dir.path(), &["init", "-q"]);
        fs::write(dir.path().join("draft.txt"), "draft").unwrap();

        let repo = GitRepository::new(dir.path()).with_identity("Test", "test@example.com");
        repo.ensure_repository().await.unwrap();
        assert_eq!(repo.untracked_files().await.unwrap(), vec![PathBuf::from("draft.txt")]);

        let staged = tempfile::tempdir().unwrap();
        git_in(staged.path(), &["init", "-q"]);
        fs::write(staged.path().join("a.txt"), "a").unwrap();
        git_in(staged.path(), &["add", "a.txt"]);
        let err = GitRepository::new(staged.path()).ensure_repository().await.unwrap_err();
        assert!(matches!(err, GitError::UnbornWithStagedChanges));
    }

    #[tokio::test]
    async fn ignored_directories_are_listed_once() {
        if !git_available() {
            return;
        }
        let (dir, repo) = repo().await;
        fs::write(dir.path().join(".gitignore"), "node_modules/\n").unwrap();
        repo.commit("ignore", &[PathBuf::from(".gitignore")]).await.unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();

        assert!(repo.untracked_files().await.unwrap().is_empty());
        assert_eq!(
            repo.ignored_files().await.unwrap(),
            vec![PathBuf::from("node_modules/")]
        );
    }

    #[tokio::test]
    async fn failures_carry_stderr() {
        if !git_available() {
            return;
        }
        let (_dir, repo) = repo().await;
        let err = repo.checkout("no-such-branch", false).await.unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { ref command, .. } if command == "checkout no-such-branch"));
    }
}
