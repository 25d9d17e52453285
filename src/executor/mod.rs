pub mod validation;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::shell::ShellType;
use validation::CommandValidator;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);
// How long to wait for pipe readers once the process group is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Command blocked ({reason}): {command}")]
    Blocked { command: String, reason: String },
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while running command: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub resources: Option<ResourceUsage>,
}

impl ExecutionResult {
    /// A result for a command that never produced an exit status.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            return_code: -1,
            stdout: String::new(),
            stderr: message.into(),
            resources: None,
        }
    }

    /// The text the classifier should look at: stderr, or stdout when stderr is empty.
    pub fn error_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

impl From<ExecError> for ExecutionResult {
    fn from(error: ExecError) -> Self {
        ExecutionResult::failed(error.to_string())
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult, ExecError>;

    /// Runs `command` in `cwd` with the runner's default timeout.
    async fn run(&self, command: &str, cwd: &Path) -> Result<ExecutionResult, ExecError> {
        self.execute(CommandRequest::new(command).cwd(cwd)).await
    }
}

/// Runs commands through the platform shell in their own process group.
pub struct ShellRunner {
    shell: ShellType,
    validator: CommandValidator,
    default_timeout: Duration,
    kill_grace: Duration,
}

impl ShellRunner {
    pub fn new(shell: ShellType, validator: CommandValidator) -> Self {
        Self {
            shell,
            validator,
            default_timeout: DEFAULT_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ShellType::detect(),
            CommandValidator::new(config.security.dangerous_commands.clone()),
        )
        .with_timeout(config.executor.timeout())
        .with_kill_grace(config.executor.kill_grace())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn build_command(&self, request: &CommandRequest) -> Command {
        let (shell, args) = self.shell.get_shell_command();
        let mut cmd = Command::new(shell);
        cmd.args(args)
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// SIGTERM to the whole group, then SIGKILL once the grace period runs out.
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let group = Pid::from_raw(pid as i32);
            if let Err(e) = killpg(group, Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM to process group failed");
            }
            if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                let _ = killpg(group, Signal::SIGKILL);
                return;
            }
            warn!(pid, "process group ignored SIGTERM, sending SIGKILL");
            let _ = killpg(group, Signal::SIGKILL);
        }

        if let Err(e) = child.kill().await {
            debug!(error = %e, "kill after timeout failed");
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn execute(&self, request: CommandRequest) -> Result<ExecutionResult, ExecError> {
        if let Some(reason) = self.validator.dangerous_match(&request.command) {
            warn!(command = %request.command, %reason, "refusing dangerous command");
            return Err(ExecError::Blocked {
                command: request.command,
                reason,
            });
        }

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        debug!(command = %request.command, cwd = ?request.cwd, ?timeout, "running command");

        let usage_before = child_usage();
        let started = Instant::now();
        let mut child = self
            .build_command(&request)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: request.command.clone(),
                source,
            })?;

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(command = %request.command, ?timeout, "command timed out");
                self.terminate(&mut child).await;
                let stdout = drain(stdout_reader).await;
                drain(stderr_reader).await;
                return Ok(ExecutionResult {
                    success: false,
                    return_code: -1,
                    stdout,
                    stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
                    resources: Some(resource_usage(usage_before, started)),
                });
            }
        };

        let stdout = drain(stdout_reader).await;
        let stderr = drain(stderr_reader).await;
        let return_code = status.code().unwrap_or(-1);

        debug!(command = %request.command, return_code, "command finished");

        Ok(ExecutionResult {
            success: status.success(),
            return_code,
            stdout,
            stderr,
            resources: Some(resource_usage(usage_before, started)),
        })
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        buf
    })
}

async fn drain(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

/// CPU seconds and peak RSS (MB) of reaped children so far.
#[cfg(unix)]
fn child_usage() -> Option<(f64, f64)> {
    use nix::sys::resource::{getrusage, UsageWho};

    let usage = getrusage(UsageWho::RUSAGE_CHILDREN).ok()?;
    let seconds = |tv: nix::sys::time::TimeVal| tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1e6;
    let cpu = seconds(usage.user_time()) + seconds(usage.system_time());

    // ru_maxrss is bytes on macOS and kilobytes elsewhere.
    #[cfg(target_os = "macos")]
    let memory_mb = usage.max_rss() as f64 / (1024.0 * 1024.0);
    #[cfg(not(target_os = "macos"))]
    let memory_mb = usage.max_rss() as f64 / 1024.0;

    Some((cpu, memory_mb))
}

#[cfg(not(unix))]
fn child_usage() -> Option<(f64, f64)> {
    None
}

fn resource_usage(before: Option<(f64, f64)>, started: Instant) -> ResourceUsage {
    let elapsed = started.elapsed().as_secs_f64();
    let (cpu_percent, memory_mb) = match (before, child_usage()) {
        (Some((cpu_before, _)), Some((cpu_after, rss))) if elapsed > 0.0 => {
            (((cpu_after - cpu_before).max(0.0) / elapsed) * 100.0, rss)
        }
        _ => (0.0, 0.0),
    };
    ResourceUsage {
        cpu_percent,
        memory_mb,
        elapsed_seconds: elapsed,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner() -> ShellRunner {
        ShellRunner::new(ShellType::Bash, CommandValidator::default())
            .with_kill_grace(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn captures_output_and_exit_status() {
        let result = runner()
            .execute(CommandRequest::new("echo hello; echo oops >&2"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
        assert!(result.resources.is_some());
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let result = runner().execute(CommandRequest::new("exit 3")).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.return_code, 3);
    }

    #[tokio::test]
    async fn honours_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner()
            .execute(
                CommandRequest::new("pwd; echo $SHELLMEND_PROBE")
                    .cwd(dir.path())
                    .env("SHELLMEND_PROBE", "probe-value"),
            )
            .await
            .unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert!(result.stdout.contains(canonical.to_str().unwrap()));
        assert!(result.stdout.contains("probe-value"));
    }

    #[tokio::test]
    async fn blocked_commands_never_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = format!("touch {} && rm -rf /", marker.display());

        let err = runner().execute(CommandRequest::new(command)).await.unwrap_err();

        assert!(matches!(err, ExecError::Blocked { .. }));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn error_output_falls_back_to_stdout() {
        let result = runner()
            .execute(CommandRequest::new("echo only-stdout; exit 1"))
            .await
            .unwrap();
        assert_eq!(result.error_output().trim(), "only-stdout");
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let command = format!("echo $$ > {}; sleep 10", pid_file.display());

        let started = Instant::now();
        let result = runner()
            .execute(CommandRequest::new(command).timeout(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(!result.success);
        assert_eq!(result.return_code, -1);
        assert!(result.stderr.contains("timed out"));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(kill(Pid::from_raw(pid), None).is_err());
    }
}
