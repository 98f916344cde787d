use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::constants::LOG_LOCK_SUFFIX;
use crate::error::{DocBatchError, Result};
use crate::io::sibling_path;

/// Exclusive advisory lock on `<log>.lock`, held until dropped.
#[derive(Debug)]
pub struct OutputLock {
    file: File,
    path: PathBuf,
}

impl OutputLock {
    /// Lock the output log at `log_path` without blocking.
    pub fn acquire(log_path: &Path) -> Result<Self> {
        let path = sibling_path(log_path, LOG_LOCK_SUFFIX);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|err| {
            DocBatchError::Lock(format!(
                "{} is held by another process: {err}",
                path.display()
            ))
        })?;
        tracing::debug!(lock.path = %path.display(), "acquired output lock");
        Ok(Self { file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(lock.path = %self.path.display(), error = %err, "failed to release output lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("out.jsonl");
        let held = OutputLock::acquire(&log).expect("first lock");
        assert!(held.path().ends_with("out.jsonl.lock"));
        assert!(matches!(OutputLock::acquire(&log), Err(DocBatchError::Lock(_))));
        drop(held);
        OutputLock::acquire(&log).expect("relock after release");
    }
}
