use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

use super::JournalEntry;

pub struct JournalStorage {
    dir: PathBuf,
}

impl JournalStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn store(&self, entry: &JournalEntry) -> Result<PathBuf> {
        let file_name = format!(
            "fix_{}.json",
            entry.recorded_at.format("%Y%m%d_%H%M%S_%f")
        );
        let path = self.dir.join(file_name);

        let json = serde_json::to_string_pretty(entry)?;
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(path = %path.display(), "stored fix journal entry");
        Ok(path)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();

        if fs::try_exists(&self.dir).await.unwrap_or(false) {
            let mut listing = fs::read_dir(&self.dir).await?;
            while let Some(item) = listing.next_entry().await? {
                let path = item.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                let content = fs::read_to_string(&path).await?;
                match serde_json::from_str::<JournalEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable journal entry"),
                }
            }
        }

        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::diagnosis::ErrorType;
    use crate::fixer::{FixAttempt, FixStatus};

    fn result(error_type: ErrorType) -> FixResult {
        let attempt: FixAttempt = serde_json::from_value(serde_json::json!({
            "branch_name": null,
            "error_type": error_type,
            "strategy": null,
            "modified_files": [],
            "commit_hash": null,
            "status": "abandoned",
            "phases": ["idle", "fix_failed", "abandoned"],
            "started_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        FixResult {
            success: false,
            description: "error type not auto-fixable".into(),
            command: None,
            attempt,
        }
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FixJournal::new(dir.path());

        journal.record("./a", "/p", &result(ErrorType::Timeout)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        journal.record("./b", "/p", &result(ErrorType::MemoryError)).await;
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let entries = journal.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, "./b");
        assert_eq!(entries[0].result.attempt.status, FixStatus::Abandoned);

        assert_eq!(journal.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FixJournal::new(dir.path().join("nope"));
        assert!(journal.recent(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        // A regular file where the directory should be.
        FixJournal::new(&blocker)
            .record("./a", "/p", &result(ErrorType::Timeout))
            .await;
    }
}
