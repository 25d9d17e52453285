//! Persistent record of fix attempts, one JSON file per attempt.

mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::fixer::FixResult;
pub use storage::JournalStorage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub recorded_at: DateTime<Utc>,
    pub command: String,
    pub project_dir: PathBuf,
    pub result: FixResult,
}

pub struct FixJournal {
    storage: JournalStorage,
}

impl FixJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: JournalStorage::new(dir.into()),
        }
    }

    /// Persists one attempt. Failures are logged, never returned: losing a
    /// journal entry must not fail the fix itself.
    pub async fn record(&self, command: &str, project_dir: impl Into<PathBuf>, result: &FixResult) {
        let entry = JournalEntry {
            recorded_at: Utc::now(),
            command: command.to_string(),
            project_dir: project_dir.into(),
            result: result.clone(),
        };
        if let Err(e) = self.storage.store(&entry).await {
            warn!(error = %e, "failed to write fix journal entry");
        }
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> anyhow::Result<Vec<JournalEntry>> {
        self.storage.recent(limit).await
    }
}
