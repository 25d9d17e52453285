pub mod ai;
pub mod autofix;
pub mod cli;
pub mod config;
pub mod diagnosis;
pub mod executor;
pub mod fixer;
pub mod git;
pub mod journal;
pub mod knowledge;
pub mod logging;
pub mod retry;
pub mod search;
pub mod shell;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use autofix::{AutoFixReport, AutoFixer};
pub use config::Config;
pub use diagnosis::{ErrorClassifier, ErrorRecord, ErrorType};
pub use fixer::{CheckpointedFixer, FixResult};
pub use search::SolutionAggregator;
pub use shell::ShellType;
