pub mod input;
pub mod lock;
pub mod output_log;
mod snapshot;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// `path` with `.{suffix}` appended to its full file name.
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Length of the file at `path`, or `None` if it does not exist.
pub(crate) fn existing_len(path: &Path) -> std::io::Result<Option<u64>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Remove `path`, treating an already-missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_keeps_full_name() {
        assert_eq!(
            sibling_path(Path::new("/tmp/out.jsonl"), "cache"),
            PathBuf::from("/tmp/out.jsonl.cache")
        );
    }
}
