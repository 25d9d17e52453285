//! End-to-end scenarios over the classify, fix and verify pipeline.


use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::executor::{CommandRequest, CommandRunner, ExecError, ExecutionResult};
use crate::fixer::CheckpointedFixer;
use crate::git::GitRepository;

type SideEffect = Box<dyn Fn(&Path) + Send + Sync>;

/// Replays canned results per command and records everything it was asked
/// to run. Commands without a script succeed.
#[derive(Default)]
pub(crate) struct ScenarioRunner {
    scripts: Mutex<HashMap<String, VecDeque<ExecutionResult>>>,
    effects: HashMap<String, SideEffect>,
    seen: Mutex<Vec<String>>,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, command: &str, results: Vec<ExecutionResult>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), results.into());
        self
    }

    /// Runs `effect` in the working directory whenever `command` is executed.
    pub fn effect(mut self, command: &str, effect: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.effects.insert(command.to_string(), Box::new(effect));
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScenarioRunner {
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult, ExecError> {
        self.seen.lock().unwrap().push(request.command.clone());
        if let (Some(effect), Some(cwd)) = (self.effects.get(&request.command), &request.cwd) {
            effect(cwd);
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.command)
            .and_then(|queue| queue.pop_front());
        Ok(next.unwrap_or_else(ok))
    }
}

pub(crate) fn ok() -> ExecutionResult {
    ExecutionResult {
        success: true,
        ..Default::default()
    }
}

pub(crate) fn fail(return_code: i32, stderr: &str) -> ExecutionResult {
    ExecutionResult {
        success: false,
        return_code,
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

pub(crate) fn git_available() -> bool {
    which::which("git").is_ok()
}

/// A project directory under git with one tracked file.
pub(crate) async fn git_project() -> (tempfile::TempDir, GitRepository) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
    let repo = GitRepository::new(dir.path()).with_identity("Test", "test@example.com");
    repo.ensure_repository().await.unwrap();
    (dir, repo)
}

pub(crate) fn git_fixer(dir: &Path, runner: Arc<ScenarioRunner>) -> CheckpointedFixer {
    let repo = GitRepository::new(dir).with_identity("Test", "test@example.com");
    CheckpointedFixer::new(dir, runner)
        .with_git(repo)
        .with_pip_program("pip")
}

/// Every regular file outside `.git`, with its contents.
pub(crate) fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(dir).unwrap().to_path_buf();
            (relative, fs::read(entry.path()).unwrap())
        })
        .collect()
}

/// Fix branches still present in the repository.
pub(crate) fn fix_branches(dir: &Path) -> Vec<String> {
    let output = std::process::Command::new("git")
        .args(["for-each-ref", "--format=%(refname:short)", "refs/heads/error-fix-*"])
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Files touched by a commit.
pub(crate) fn committed_files(dir: &Path, hash: &str) -> Vec<String> {
    let output = std::process::Command::new("git")
        .args(["show", "--name-only", "--format=", hash])
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
