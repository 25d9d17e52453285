//! Checkpointed repairs: every attempt runs on its own git branch and is either
//! merged back or discarded, leaving the tree as it was.

pub mod handlers;
pub mod source_edit;
pub mod strategy;
pub mod workspace;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ai::LanguageModel;
use crate::config::Config;
use crate::diagnosis::{ErrorClassifier, ErrorRecord, ErrorType, VariableResolver};
use crate::executor::CommandRunner;
use crate::git::{GitError, GitRepository, VersionControl};
use crate::shell::ShellType;
use handlers::HandlerContext;
pub use strategy::{FixStrategy, StrategyOutcome};
pub use workspace::WorkspaceJournal;

pub const NOT_AUTO_FIXABLE: &str = "error type not auto-fixable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPhase {
    Idle,
    BranchCreated,
    StrategyDispatched,
    FixSucceeded,
    FixFailed,
    Committed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Pending,
    Succeeded,
    /// The attempt failed and could not be fully rolled back.
    Failed,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAttempt {
    pub branch_name: Option<String>,
    pub error_type: ErrorType,
    pub strategy: Option<FixStrategy>,
    pub modified_files: Vec<PathBuf>,
    pub commit_hash: Option<String>,
    pub status: FixStatus,
    pub phases: Vec<FixPhase>,
    pub started_at: DateTime<Utc>,
}

impl FixAttempt {
    fn new(error_type: ErrorType) -> Self {
        Self {
            branch_name: None,
            error_type,
            strategy: FixStrategy::for_error(error_type),
            modified_files: Vec::new(),
            commit_hash: None,
            status: FixStatus::Pending,
            phases: vec![FixPhase::Idle],
            started_at: Utc::now(),
        }
    }

    fn enter(&mut self, phase: FixPhase) {
        debug!(?phase, branch = ?self.branch_name, "fix attempt transition");
        self.phases.push(phase);
    }

    pub fn phase(&self) -> FixPhase {
        self.phases.last().copied().unwrap_or(FixPhase::Idle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixResult {
    pub success: bool,
    pub description: String,
    /// Command the strategy ran, if any.
    pub command: Option<String>,
    pub attempt: FixAttempt,
}

struct Checkpoint {
    prior_branch: String,
    branch: String,
    untracked_before: HashSet<PathBuf>,
    ignored_before: HashSet<PathBuf>,
}

pub struct CheckpointedFixer {
    project_dir: PathBuf,
    classifier: ErrorClassifier,
    resolver: VariableResolver,
    runner: Arc<dyn CommandRunner>,
    llm: Option<Arc<dyn LanguageModel>>,
    git: Option<Box<dyn VersionControl>>,
    pip_program: &'static str,
}

impl CheckpointedFixer {
    /// A fixer without version control; edits are still rolled back on failure.
    pub fn new(project_dir: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            project_dir: project_dir.into(),
            classifier: ErrorClassifier::new(),
            resolver: VariableResolver::new(),
            runner,
            llm: None,
            git: None,
            pip_program: ShellType::detect().pip_program(),
        }
    }

    /// Builds a fixer for `project_dir`. With git enabled the directory is
    /// turned into a repository with a base commit if it is not one yet.
    pub async fn from_config(
        config: &Config,
        project_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        use_git: bool,
    ) -> Result<Self> {
        let project_dir = project_dir.into();
        let mut fixer = Self::new(&project_dir, runner);
        if use_git && config.fixer.git_enabled {
            let repo = GitRepository::new(&project_dir)
                .with_identity(&config.fixer.git_author_name, &config.fixer.git_author_email);
            repo.ensure_repository().await?;
            fixer = fixer.with_git(repo);
        }
        Ok(fixer)
    }

    pub fn with_git(mut self, git: impl VersionControl + 'static) -> Self {
        self.git = Some(Box::new(git));
        self
    }

    pub fn with_language_model(mut self, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_pip_program(mut self, program: &'static str) -> Self {
        self.pip_program = program;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn git_enabled(&self) -> bool {
        self.git.is_some()
    }

    /// Runs one fix attempt for a failure. Always returns with the attempt in
    /// a terminal state: committed, or abandoned with the tree restored.
    pub async fn handle_error(&mut self, command: &str, return_code: i32, error_text: &str) -> FixResult {
        let record = self.classifier.classify(command, return_code, error_text);
        let mut attempt = FixAttempt::new(record.error_type);
        info!(error_type = %record.error_type, strategy = ?attempt.strategy, "starting fix attempt");

        let Some(strategy) = attempt.strategy else {
            attempt.enter(FixPhase::FixFailed);
            attempt.enter(FixPhase::Abandoned);
            attempt.status = FixStatus::Abandoned;
            return FixResult {
                success: false,
                description: NOT_AUTO_FIXABLE.to_string(),
                command: None,
                attempt,
            };
        };

        let checkpoint = match &self.git {
            Some(git) => match open_checkpoint(&**git).await {
                Ok(checkpoint) => {
                    attempt.branch_name = Some(checkpoint.branch.clone());
                    attempt.enter(FixPhase::BranchCreated);
                    Some(checkpoint)
                }
                Err(e) => {
                    warn!(error = %e, "could not create a fix branch");
                    attempt.enter(FixPhase::FixFailed);
                    attempt.enter(FixPhase::Abandoned);
                    attempt.status = FixStatus::Abandoned;
                    return FixResult {
                        success: false,
                        description: e.to_string(),
                        command: None,
                        attempt,
                    };
                }
            },
            None => None,
        };

        attempt.enter(FixPhase::StrategyDispatched);
        let mut journal = WorkspaceJournal::new(&self.project_dir);
        let outcome = self.dispatch(strategy, &record, &mut journal).await;

        if outcome.success {
            attempt.enter(FixPhase::FixSucceeded);
            match self.commit(checkpoint.as_ref(), &outcome).await {
                Ok((files, hash)) => {
                    journal.commit();
                    attempt.modified_files = files;
                    attempt.commit_hash = hash;
                    attempt.enter(FixPhase::Committed);
                    attempt.status = FixStatus::Succeeded;
                    info!(%strategy, commit = ?attempt.commit_hash, "fix committed");
                    return FixResult {
                        success: true,
                        description: outcome.description,
                        command: outcome.command,
                        attempt,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "could not commit the fix");
                    attempt.enter(FixPhase::FixFailed);
                    let description = format!("{} (commit failed: {})", outcome.description, e);
                    return self
                        .abandon(attempt, journal, checkpoint, description, outcome.command)
                        .await;
                }
            }
        }

        attempt.enter(FixPhase::FixFailed);
        info!(%strategy, reason = %outcome.description, "fix failed");
        self.abandon(attempt, journal, checkpoint, outcome.description, outcome.command)
            .await
    }

    async fn dispatch(
        &self,
        strategy: FixStrategy,
        record: &ErrorRecord,
        journal: &mut WorkspaceJournal,
    ) -> StrategyOutcome {
        let ctx = HandlerContext {
            project_dir: &self.project_dir,
            record,
            runner: self.runner.as_ref(),
            llm: self.llm.as_deref(),
            resolver: &self.resolver,
            journal,
            pip_program: self.pip_program,
        };
        match handlers::run(strategy, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => StrategyOutcome::failed(format!("{:#}", e)),
        }
    }

    /// Stages the reported files that exist, commits and merges the fix
    /// branch back. Without git the reported files are just filtered.
    async fn commit(
        &self,
        checkpoint: Option<&Checkpoint>,
        outcome: &StrategyOutcome,
    ) -> Result<(Vec<PathBuf>, Option<String>), GitError> {
        let files: Vec<PathBuf> = outcome
            .modified_files
            .iter()
            .filter(|path| is_committable(&self.project_dir, path))
            .cloned()
            .collect();

        let (Some(git), Some(checkpoint)) = (&self.git, checkpoint) else {
            return Ok((files, None));
        };

        let summary = outcome.description.lines().next().unwrap_or_default();
        let hash = git.commit(&format!("Auto-fix: {}", summary), &files).await?;
        git.checkout(&checkpoint.prior_branch, false).await?;
        git.merge(&checkpoint.branch).await?;
        if let Err(e) = git.delete_branch(&checkpoint.branch, false).await {
            // Already merged; a leftover branch is harmless.
            warn!(branch = %checkpoint.branch, error = %e, "could not delete merged fix branch");
        }
        Ok((files, Some(hash)))
    }

    async fn abandon(
        &self,
        mut attempt: FixAttempt,
        mut journal: WorkspaceJournal,
        checkpoint: Option<Checkpoint>,
        description: String,
        command: Option<String>,
    ) -> FixResult {
        let mut clean = true;
        if let Err(e) = journal.rollback() {
            error!(error = %e, "could not roll back workspace edits");
            clean = false;
        }
        if let (Some(git), Some(checkpoint)) = (&self.git, &checkpoint) {
            if let Err(e) = restore_checkpoint(&**git, &self.project_dir, checkpoint).await {
                error!(error = %e, branch = %checkpoint.branch, "could not restore the pre-fix state");
                clean = false;
            }
        }

        attempt.enter(FixPhase::Abandoned);
        attempt.status = if clean {
            FixStatus::Abandoned
        } else {
            FixStatus::Failed
        };
        FixResult {
            success: false,
            description,
            command,
            attempt,
        }
    }
}

async fn open_checkpoint(git: &dyn VersionControl) -> Result<Checkpoint, GitError> {
    if !git.is_clean().await? {
        return Err(GitError::DirtyWorkingTree(
            "commit or stash tracked changes before auto-fixing".to_string(),
        ));
    }
    let prior_branch = git.current_branch().await?;
    let untracked_before = git.untracked_files().await?.into_iter().collect();
    let ignored_before = git.ignored_files().await?.into_iter().collect();

    let base = format!("error-fix-{}", Utc::now().timestamp());
    let mut branch = base.clone();
    let mut suffix = 2;
    while git.branch_exists(&branch).await? {
        branch = format!("{}-{}", base, suffix);
        suffix += 1;
    }

    git.branch(&branch).await?;
    if let Err(e) = git.checkout(&branch, false).await {
        let _ = git.delete_branch(&branch, true).await;
        return Err(e);
    }
    info!(%branch, prior = %prior_branch, "created fix branch");
    Ok(Checkpoint {
        prior_branch,
        branch,
        untracked_before,
        ignored_before,
    })
}

async fn restore_checkpoint(git: &dyn VersionControl, project_dir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    // Only fails when no merge is in progress.
    let _ = git.merge_abort().await;
    git.checkout(&checkpoint.prior_branch, true).await?;
    git.reset_hard().await?;

    for path in git.untracked_files().await? {
        if checkpoint.untracked_before.contains(&path) {
            continue;
        }
        let absolute = project_dir.join(&path);
        debug!(path = %path.display(), "removing file created during the attempt");
        fs::remove_file(&absolute)
            .map_err(|e| anyhow!("could not remove {}: {}", absolute.display(), e))?;
        prune_empty_parents(project_dir, &absolute);
    }

    // Ignored output such as node_modules/ survives reset and the untracked sweep.
    for path in git.ignored_files().await? {
        if checkpoint.ignored_before.contains(&path) {
            continue;
        }
        let absolute = project_dir.join(&path);
        debug!(path = %path.display(), "removing ignored output of the attempt");
        let removed = if absolute.is_dir() {
            fs::remove_dir_all(&absolute)
        } else {
            fs::remove_file(&absolute)
        };
        removed.map_err(|e| anyhow!("could not remove {}: {}", absolute.display(), e))?;
        prune_empty_parents(project_dir, &absolute);
    }

    git.delete_branch(&checkpoint.branch, true).await?;
    info!(branch = %checkpoint.branch, "abandoned fix branch");
    Ok(())
}

fn prune_empty_parents(root: &Path, file: &Path) {
    let mut dir = file.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn is_committable(project_dir: &Path, path: &Path) -> bool {
    if path.components().any(|c| c.as_os_str() == ".git") {
        return false;
    }
    let absolute = project_dir.join(path);
    if absolute.is_dir() {
        walkdir::WalkDir::new(&absolute)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_type().is_file())
    } else {
        absolute.exists()
    }
}
