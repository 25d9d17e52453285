//! Run, fix, re-run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::executor::{CommandRunner, ExecutionResult};
use crate::fixer::{CheckpointedFixer, FixResult};
use crate::journal::FixJournal;

pub const ATTEMPTS_EXHAUSTED: &str = "fix attempts exhausted";

#[derive(Debug, Clone)]
pub struct AutoFixReport {
    pub success: bool,
    pub attempts: Vec<FixResult>,
    /// Error output of the last failing run; `None` on success.
    pub last_error: Option<String>,
}

impl AutoFixReport {
    pub fn exhausted(&self) -> bool {
        !self.success && !self.attempts.is_empty()
    }
}

pub struct AutoFixer {
    runner: Arc<dyn CommandRunner>,
    fixer: CheckpointedFixer,
    backoff: Duration,
    journal: Option<FixJournal>,
}

impl AutoFixer {
    pub fn new(runner: Arc<dyn CommandRunner>, fixer: CheckpointedFixer) -> Self {
        Self {
            runner,
            fixer,
            backoff: Duration::from_secs(1),
            journal: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_journal(mut self, journal: FixJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn project_dir(&self) -> PathBuf {
        self.fixer.project_dir().to_path_buf()
    }

    async fn execute(&self, command: &str) -> ExecutionResult {
        match self.runner.run(command, self.fixer.project_dir()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%command, error = %e, "command could not be run");
                e.into()
            }
        }
    }

    pub async fn run_with_auto_fix(&mut self, command: &str, max_attempts: u32) -> bool {
        self.run_with_report(command, max_attempts).await.success
    }

    pub async fn run_with_report(&mut self, command: &str, max_attempts: u32) -> AutoFixReport {
        info!(%command, "running command");
        let mut result = self.execute(command).await;
        let mut attempts = Vec::new();

        let mut attempt = 0;
        while !result.success && attempt < max_attempts {
            attempt += 1;
            info!(%command, attempt, max_attempts, "command failed, attempting auto-fix");

            let fix = self
                .fixer
                .handle_error(command, result.return_code, result.error_output())
                .await;
            if let Some(journal) = &self.journal {
                journal.record(command, self.fixer.project_dir(), &fix).await;
            }
            let fixed = fix.success;
            attempts.push(fix);

            if fixed {
                info!(%command, "retrying command after fix");
                result = self.execute(command).await;
            } else if attempt < max_attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        if result.success {
            return AutoFixReport {
                success: true,
                attempts,
                last_error: None,
            };
        }

        warn!(%command, attempts = attempts.len(), "{}", ATTEMPTS_EXHAUSTED);
        AutoFixReport {
            success: false,
            attempts,
            last_error: Some(result.error_output().to_string()),
        }
    }

    /// Runs each command with auto-fix. Stops at the first failure unless
    /// `continue_on_error` is set.
    pub async fn run_script(
        &mut self,
        commands: &[String],
        continue_on_error: bool,
        max_attempts: u32,
    ) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            info!(index = i + 1, total = commands.len(), %command, "running script command");
            let success = self.run_with_auto_fix(command, max_attempts).await;
            results.push((command.clone(), success));
            if !success && !continue_on_error {
                warn!(%command, "stopping script after failed command");
                break;
            }
        }
        results
    }
}

/// Commands of a script file: trimmed, non-empty lines that are not comments.
pub fn parse_script(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
