//! Turning raw error output into typed records with candidate solutions.

pub mod classifier;
pub mod extract;
pub mod resolver;
pub mod templates;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use crate::search::{ProviderFailure, SearchResult};

pub use classifier::ErrorClassifier;
pub use extract::ExtractionTable;
pub use resolver::VariableResolver;

/// Closed error taxonomy. Declaration order mirrors the classifier's rule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    PythonImportError,
    PythonModuleNotFound,
    PythonSyntaxError,
    PythonTypeError,
    PythonValueError,
    PythonAttributeError,
    ShellCommandNotFound,
    FileNotFound,
    PermissionDenied,
    GitNotARepo,
    GitConnectionError,
    GitPushError,
    PipPackageNotFound,
    #[serde(rename = "timeout_error")]
    Timeout,
    MemoryError,
    SegmentationFault,
    ReactHookConditional,
    ReactInvalidElement,
    JsUndefinedProperty,
    ReactModuleNotFound,
    NpmPackageNotFound,
    NpmInvalidSelfOperation,
    NpmPermissionError,
    #[serde(rename = "unknown_error")]
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::PythonImportError => "python_import_error",
            ErrorType::PythonModuleNotFound => "python_module_not_found",
            ErrorType::PythonSyntaxError => "python_syntax_error",
            ErrorType::PythonTypeError => "python_type_error",
            ErrorType::PythonValueError => "python_value_error",
            ErrorType::PythonAttributeError => "python_attribute_error",
            ErrorType::ShellCommandNotFound => "shell_command_not_found",
            ErrorType::FileNotFound => "file_not_found",
            ErrorType::PermissionDenied => "permission_denied",
            ErrorType::GitNotARepo => "git_not_a_repo",
            ErrorType::GitConnectionError => "git_connection_error",
            ErrorType::GitPushError => "git_push_error",
            ErrorType::PipPackageNotFound => "pip_package_not_found",
            ErrorType::Timeout => "timeout_error",
            ErrorType::MemoryError => "memory_error",
            ErrorType::SegmentationFault => "segmentation_fault",
            ErrorType::ReactHookConditional => "react_hook_conditional",
            ErrorType::ReactInvalidElement => "react_invalid_element",
            ErrorType::JsUndefinedProperty => "js_undefined_property",
            ErrorType::ReactModuleNotFound => "react_module_not_found",
            ErrorType::NpmPackageNotFound => "npm_package_not_found",
            ErrorType::NpmInvalidSelfOperation => "npm_invalid_self_operation",
            ErrorType::NpmPermissionError => "npm_permission_error",
            ErrorType::Unknown => "unknown_error",
        }
    }

    pub fn is_python(&self) -> bool {
        matches!(
            self,
            ErrorType::PythonImportError
                | ErrorType::PythonModuleNotFound
                | ErrorType::PythonSyntaxError
                | ErrorType::PythonTypeError
                | ErrorType::PythonValueError
                | ErrorType::PythonAttributeError
                | ErrorType::PipPackageNotFound
        )
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Where a candidate solution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionOrigin {
    Template,
    KnowledgeBase,
    LanguageModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub description: String,
    pub command_template: Option<String>,
    pub variables: BTreeSet<String>,
    pub confidence: Confidence,
    pub resolved_command: Option<String>,
    pub explanation: Option<String>,
    pub origin: SolutionOrigin,
}

impl Solution {
    /// Advice with nothing to run.
    pub fn advice(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command_template: None,
            variables: BTreeSet::new(),
            confidence: Confidence::Medium,
            resolved_command: None,
            explanation: None,
            origin: SolutionOrigin::Template,
        }
    }

    /// A solution with a command template; its variables are the `{name}` placeholders.
    pub fn command(description: impl Into<String>, template: impl Into<String>) -> Self {
        let template = template.into();
        Self {
            variables: placeholders(&template),
            command_template: Some(template),
            ..Self::advice(description)
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_origin(mut self, origin: SolutionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The best command text available: resolved if resolution ran, else the template.
    pub fn command_text(&self) -> Option<&str> {
        self.resolved_command
            .as_deref()
            .or(self.command_template.as_deref())
    }

    pub fn unresolved_variables(&self) -> BTreeSet<String> {
        self.command_text().map(placeholders).unwrap_or_default()
    }

    /// Only resolved commands with no placeholder left may ever be run.
    pub fn is_executable(&self) -> bool {
        match &self.resolved_command {
            Some(command) => !command.trim().is_empty() && placeholders(command).is_empty(),
            None => false,
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `${VAR}` is shell syntax, not a template placeholder.
    RE.get_or_init(|| Regex::new(r"(^|[^$])\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern"))
}

/// Names of the `{name}` placeholders in `text`.
pub fn placeholders(text: &str) -> BTreeSet<String> {
    placeholder_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(2).map(|m| m.as_str().to_string()))
        .collect()
}

/// A classified failure. Built by the classifier and enriched by the aggregator.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub raw_text: String,
    pub command: String,
    pub return_code: i32,
    pub error_type: ErrorType,
    pub description: String,
    pub search_query: String,
    pub user_explanation: String,
    pub common_causes: Vec<String>,
    pub solutions: Vec<Solution>,
    pub sources: Vec<SearchResult>,
    pub variables: BTreeMap<String, String>,
    pub degraded: Vec<ProviderFailure>,
}

impl ErrorRecord {
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}
