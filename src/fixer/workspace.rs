//! Undo log for the filesystem edits of one fix attempt.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
enum Entry {
    CreatedFile(PathBuf),
    CreatedDir(PathBuf),
    Modified { path: PathBuf, original: Vec<u8> },
    #[cfg(unix)]
    Mode { path: PathBuf, mode: u32 },
}

/// Every edit a handler makes goes through here, so a failed attempt can be
/// undone even when git is not tracking the project.
#[derive(Debug)]
pub struct WorkspaceJournal {
    root: PathBuf,
    entries: Vec<Entry>,
}

impl WorkspaceJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute path for a project-relative (or already absolute) path.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Path relative to the project root when it lies inside it.
    pub fn relative(&self, path: impl AsRef<Path>) -> PathBuf {
        let absolute = normalize(&self.resolve(path));
        let root = normalize(&self.root);
        absolute
            .strip_prefix(&root)
            .map(Path::to_path_buf)
            .unwrap_or(absolute)
    }

    pub fn create_dir_all(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let target = self.resolve(path);
        let mut missing = Vec::new();
        let mut cursor = Some(target.as_path());
        while let Some(dir) = cursor {
            if dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }
        if let Some(existing) = cursor {
            if !existing.is_dir() {
                bail!("{} exists and is not a directory", existing.display());
            }
        }

        for dir in missing.into_iter().rev() {
            fs::create_dir(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            debug!(path = %dir.display(), "created directory");
            self.entries.push(Entry::CreatedDir(dir));
        }
        Ok(())
    }

    /// Creates an empty file, and its parents. An existing file is left alone.
    pub fn create_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let target = self.resolve(path);
        if target.exists() {
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            self.create_dir_all(parent)?;
        }
        fs::write(&target, b"").with_context(|| format!("Failed to create {}", target.display()))?;
        debug!(path = %target.display(), "created file");
        self.entries.push(Entry::CreatedFile(target));
        Ok(())
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let target = self.resolve(path);
        fs::read_to_string(&target).with_context(|| format!("Failed to read {}", target.display()))
    }

    pub fn write(&mut self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let target = self.resolve(path);
        if target.exists() {
            if !self.records_content_of(&target) {
                let original = fs::read(&target)
                    .with_context(|| format!("Failed to read {}", target.display()))?;
                self.entries.push(Entry::Modified {
                    path: target.clone(),
                    original,
                });
            }
        } else {
            self.create_file(&target)?;
        }
        fs::write(&target, contents).with_context(|| format!("Failed to write {}", target.display()))?;
        debug!(path = %target.display(), "rewrote file");
        Ok(())
    }

    fn records_content_of(&self, target: &Path) -> bool {
        self.entries.iter().any(|entry| match entry {
            Entry::Modified { path, .. } | Entry::CreatedFile(path) => path == target,
            _ => false,
        })
    }

    #[cfg(unix)]
    pub fn set_mode(&mut self, path: impl AsRef<Path>, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let target = self.resolve(path);
        let current = fs::metadata(&target)
            .with_context(|| format!("Failed to stat {}", target.display()))?
            .permissions()
            .mode()
            & 0o7777;
        let already_recorded = self
            .entries
            .iter()
            .any(|entry| matches!(entry, Entry::Mode { path, .. } if *path == target));
        if !already_recorded {
            self.entries.push(Entry::Mode {
                path: target.clone(),
                mode: current,
            });
        }
        fs::set_permissions(&target, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to chmod {}", target.display()))?;
        debug!(path = %target.display(), mode = %format!("{:o}", mode), "changed mode");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn set_mode(&mut self, path: impl AsRef<Path>, _mode: u32) -> Result<()> {
        bail!("changing permissions of {} is only supported on unix", path.as_ref().display())
    }

    /// Keeps the edits; the journal is empty afterwards.
    pub fn commit(&mut self) {
        self.entries.clear();
    }

    /// Undoes every recorded edit, newest first. Keeps going past individual
    /// failures and reports the first one.
    pub fn rollback(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(entry) = self.entries.pop() {
            let outcome = match &entry {
                Entry::CreatedFile(path) => remove_if_present(path, false),
                Entry::CreatedDir(path) => remove_if_present(path, true),
                Entry::Modified { path, original } => fs::write(path, original)
                    .with_context(|| format!("Failed to restore {}", path.display())),
                #[cfg(unix)]
                Entry::Mode { path, mode } => {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(path, fs::Permissions::from_mode(*mode))
                        .with_context(|| format!("Failed to restore mode of {}", path.display()))
                }
            };
            if let Err(e) = outcome {
                warn!(error = %e, "rollback step failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn remove_if_present(path: &Path, dir: bool) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let result = if dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

/// Lexical normalisation: drops `.` and folds `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_removes_created_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = WorkspaceJournal::new(dir.path());

        journal.create_file("out/reports/today.txt").unwrap();
        assert!(dir.path().join("out/reports/today.txt").is_file());

        journal.rollback().unwrap();
        assert!(!dir.path().join("out").exists());
        assert!(journal.is_empty());
    }

    #[test]
    fn rollback_restores_original_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("App.js"), "original").unwrap();
        let mut journal = WorkspaceJournal::new(dir.path());

        journal.write("App.js", "first edit").unwrap();
        journal.write("App.js", "second edit").unwrap();
        journal.rollback().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("App.js")).unwrap(), "original");
    }

    #[cfg(unix)]
    #[test]
    fn rollback_restores_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let mut journal = WorkspaceJournal::new(dir.path());
        journal.set_mode("run.sh", 0o755).unwrap();
        assert_eq!(fs::metadata(&script).unwrap().permissions().mode() & 0o777, 0o755);

        journal.rollback().unwrap();
        assert_eq!(fs::metadata(&script).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[test]
    fn commit_keeps_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = WorkspaceJournal::new(dir.path());
        journal.create_dir_all("data/cache").unwrap();
        journal.commit();
        journal.rollback().unwrap();
        assert!(dir.path().join("data/cache").is_dir());
    }

    #[test]
    fn relative_paths() {
        let journal = WorkspaceJournal::new("/work/project");
        assert_eq!(journal.relative("src/App.js"), PathBuf::from("src/App.js"));
        assert_eq!(journal.relative("./src/../lib/x.js"), PathBuf::from("lib/x.js"));
        assert_eq!(journal.relative("/elsewhere/file"), PathBuf::from("/elsewhere/file"));
    }
}
