//! What happens once the monitor declares a processing slowdown.

use std::io::Write;
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use serde_json::{Map, Value};

use crate::constants::RESTARTS_REPORT_KEY;
use crate::error::{DocBatchError, Result};

/// Invoked once per job when throughput has collapsed. Implementations arrange
/// for the process to be relaunched; resuming from the log does the rest.
pub trait RestartHandler {
    /// `last_good_batch_index` is the 0-based index of the last committed
    /// batch; `elapsed_secs` is wall time since the job started.
    fn recover(&mut self, last_good_batch_index: u64, elapsed_secs: u64) -> Result<()>;
}

/// Records the request in the log and leaves the relaunch to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRestartHandler;

impl RestartHandler for LoggingRestartHandler {
    fn recover(&mut self, last_good_batch_index: u64, elapsed_secs: u64) -> Result<()> {
        tracing::warn!(
            batch.last_good = last_good_batch_index,
            job.elapsed_secs = elapsed_secs,
            "processing slowdown: restart requested"
        );
        Ok(())
    }
}

/// Counts restarts in a JSON completion report before delegating.
#[derive(Debug)]
pub struct CompletionReport<H> {
    path: PathBuf,
    inner: H,
}

impl<H: RestartHandler> CompletionReport<H> {
    pub fn new(path: impl Into<PathBuf>, inner: H) -> Self {
        Self {
            path: path.into(),
            inner,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Restarts recorded in the completion report at `path`; zero when it does
/// not exist yet.
pub fn recorded_restarts(path: &Path) -> Result<u64> {
    Ok(read_report(path)?
        .get(RESTARTS_REPORT_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(0))
}

fn read_report(path: &Path) -> Result<Map<String, Value>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => return Err(err.into()),
    };
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        other => Err(DocBatchError::InvalidRecord {
            line: 1,
            reason: format!("completion report must be a JSON object, found {other}"),
        }),
    }
}

impl<H: RestartHandler> RestartHandler for CompletionReport<H> {
    fn recover(&mut self, last_good_batch_index: u64, elapsed_secs: u64) -> Result<()> {
        let mut report = read_report(&self.path)?;
        let restarts = report
            .get(RESTARTS_REPORT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        report.insert(RESTARTS_REPORT_KEY.to_owned(), Value::from(restarts));

        let mut file = AtomicWriteFile::open(&self.path)?;
        file.write_all(serde_json::to_string(&report)?.as_bytes())?;
        file.commit()?;
        tracing::info!(report.path = %self.path.display(), report.restarts = restarts, "updated completion report");

        self.inner.recover(last_good_batch_index, elapsed_secs)
    }
}
