use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::diagnosis::ErrorType;

/// Closed set of automated repairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    InstallDependency,
    CreateMissingFileOrDir,
    FixPermissions,
    FixReactHook,
    AddNullCheck,
    FixSyntax,
    InitGitRepo,
}

impl FixStrategy {
    /// The repair for an error type, or `None` when it is report-only.
    pub fn for_error(error_type: ErrorType) -> Option<Self> {
        match error_type {
            ErrorType::PythonImportError
            | ErrorType::PythonModuleNotFound
            | ErrorType::NpmPackageNotFound
            | ErrorType::ReactModuleNotFound => Some(FixStrategy::InstallDependency),
            ErrorType::FileNotFound => Some(FixStrategy::CreateMissingFileOrDir),
            ErrorType::PermissionDenied => Some(FixStrategy::FixPermissions),
            ErrorType::ReactHookConditional => Some(FixStrategy::FixReactHook),
            ErrorType::JsUndefinedProperty => Some(FixStrategy::AddNullCheck),
            ErrorType::PythonSyntaxError => Some(FixStrategy::FixSyntax),
            ErrorType::GitNotARepo => Some(FixStrategy::InitGitRepo),
            ErrorType::PythonTypeError
            | ErrorType::PythonValueError
            | ErrorType::PythonAttributeError
            | ErrorType::ShellCommandNotFound
            | ErrorType::GitConnectionError
            | ErrorType::GitPushError
            | ErrorType::PipPackageNotFound
            | ErrorType::Timeout
            | ErrorType::MemoryError
            | ErrorType::SegmentationFault
            | ErrorType::ReactInvalidElement
            | ErrorType::NpmInvalidSelfOperation
            | ErrorType::NpmPermissionError
            | ErrorType::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FixStrategy::InstallDependency => "install_dependency",
            FixStrategy::CreateMissingFileOrDir => "create_missing_file_or_dir",
            FixStrategy::FixPermissions => "fix_permissions",
            FixStrategy::FixReactHook => "fix_react_hook",
            FixStrategy::AddNullCheck => "add_null_check",
            FixStrategy::FixSyntax => "fix_syntax",
            FixStrategy::InitGitRepo => "init_git_repo",
        }
    }
}

impl fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a strategy handler reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutcome {
    pub success: bool,
    pub description: String,
    /// Paths relative to the project directory.
    pub modified_files: Vec<PathBuf>,
    pub command: Option<String>,
}

impl StrategyOutcome {
    pub fn succeeded(description: impl Into<String>, modified_files: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            description: description.into(),
            modified_files,
            command: None,
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
            modified_files: Vec::new(),
            command: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}
