//! Resume-aware batch source.
//!
//! Construction replays the output log against the input: records and
//! documents are walked in lockstep, every fully committed batch is reported
//! to the monitor again, and a batch whose commit was interrupted is cut from
//! the log so its documents are processed again. Afterwards the sequencer
//! yields fresh batches from wherever the log left off.

use chrono::{DateTime, Utc};

use crate::engine::batch::{Batch, batch_stats};
use crate::engine::monitor::BatchMonitor;
use crate::error::{DocBatchError, Result};
use crate::io::input::InputSource;
use crate::io::output_log::OutputLog;
use crate::types::BatchMark;

/// What startup recovery found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Records present in the log when it was opened.
    pub records_found: usize,
    /// Committed batches replayed into the monitor.
    pub batches_replayed: u64,
    /// Records cut because their batch never finished committing.
    pub records_dropped: usize,
    /// Index of the first input document still to be processed.
    pub resume_at: usize,
    /// The log already holds every input document.
    pub complete: bool,
}

impl RecoveryReport {
    #[must_use]
    pub fn torn_commit(&self) -> bool {
        self.records_dropped > 0
    }
}

#[derive(Debug)]
pub struct BatchSequencer<I> {
    input: I,
    log: OutputLog,
    monitor: BatchMonitor,
    batch_size: usize,
    recovery: RecoveryReport,
}

impl<I: InputSource> BatchSequencer<I> {
    pub fn new(mut input: I, mut log: OutputLog, mut monitor: BatchMonitor, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DocBatchError::InvalidOptions {
                reason: "batch_size must be positive".into(),
            });
        }
        let recovery = recover(&mut input, &mut log, &mut monitor)?;
        tracing::info!(
            log.records = recovery.records_found,
            recovery.batches_replayed = recovery.batches_replayed,
            recovery.records_dropped = recovery.records_dropped,
            recovery.resume_at = recovery.resume_at,
            recovery.complete = recovery.complete,
            "recovered job state"
        );
        Ok(Self {
            input,
            log,
            monitor,
            batch_size,
            recovery,
        })
    }

    #[must_use]
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn input(&self) -> &I {
        &self.input
    }

    #[must_use]
    pub fn log(&self) -> &OutputLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut OutputLog {
        &mut self.log
    }

    #[must_use]
    pub fn monitor(&self) -> &BatchMonitor {
        &self.monitor
    }

    /// Both halves a commit needs at once.
    pub fn parts_mut(&mut self) -> (&mut OutputLog, &mut BatchMonitor) {
        (&mut self.log, &mut self.monitor)
    }

    #[must_use]
    pub fn into_parts(self) -> (I, OutputLog, BatchMonitor) {
        (self.input, self.log, self.monitor)
    }
}

impl<I: InputSource> Iterator for BatchSequencer<I> {
    type Item = Batch;

    /// Up to `batch_size` documents; `None` once the input yields nothing.
    fn next(&mut self) -> Option<Batch> {
        let mut batch = Batch::new(self.monitor.batches(), self.batch_size);
        while batch.len() < self.batch_size {
            match self.input.next_document() {
                Some(document) => batch.push(document),
                None => break,
            }
        }
        if batch.is_empty() { None } else { Some(batch) }
    }
}

fn recover<I: InputSource>(
    input: &mut I,
    log: &mut OutputLog,
    monitor: &mut BatchMonitor,
) -> Result<RecoveryReport> {
    let records_found = log.len();
    let mut open: Option<(usize, DateTime<Utc>)> = None;
    let mut last_good: Option<usize> = None;
    let mut batches_replayed = 0;

    for index in 0..records_found {
        let record = log.record_at(index)?;
        let document = input.next_document().ok_or_else(|| {
            DocBatchError::corrupt(
                index,
                format!("output log has {records_found} records but the input has only {index} documents"),
            )
        })?;
        if document.id() != record.id() {
            tracing::error!(log.index = index, expected = document.id(), actual = record.id(), "output log does not match input");
            return Err(DocBatchError::corrupt(
                index,
                format!("expected document {:?}, found {:?}", document.id(), record.id()),
            ));
        }

        open = match (record.begin(), open) {
            (BatchMark::At(begin), None) => Some((index, begin)),
            (BatchMark::NotBoundary, Some(scope)) => Some(scope),
            (BatchMark::At(_), Some((start, _))) => {
                return Err(DocBatchError::corrupt(
                    index,
                    format!("batch begins while the batch begun at record {start} is still open"),
                ));
            }
            (BatchMark::NotBoundary, None) => {
                return Err(DocBatchError::corrupt(
                    index,
                    "record continues a batch that never began",
                ));
            }
        };

        if let BatchMark::At(end) = record.end() {
            if let Some((start, begin)) = open.take() {
                let stats = batch_stats(&log.records()[start..=index], begin, end);
                monitor.post_batch_update(stats)?;
                batches_replayed += 1;
                last_good = Some(index);
            }
        }
    }

    let resume_at = last_good.map_or(0, |index| index + 1);
    let mut records_dropped = 0;
    if let Some((start, _)) = open {
        records_dropped = records_found - resume_at;
        if log.is_sealed() {
            return Err(DocBatchError::corrupt(
                start,
                "sealed log ends inside an unfinished batch",
            ));
        }
        tracing::warn!(
            log.index = records_found - 1,
            batch.begin = start,
            recovery.keep_through = ?last_good,
            recovery.resume_at = resume_at,
            "last batch was interrupted mid-commit; truncating and rewinding input"
        );
        log.truncate_after(last_good)?;
        input.set_cursor(resume_at)?;
    } else if !log.is_sealed() {
        log.truncate_after(last_good)?;
    }

    let complete = log.len() >= input.len();
    if !complete {
        if log.is_sealed() {
            tracing::warn!(
                log.records = log.len(),
                input.documents = input.len(),
                "input has grown past a sealed log; reopening it for appending"
            );
            log.unseal()?;
        }
        log.open_for_appending()?;
    }

    Ok(RecoveryReport {
        records_found,
        batches_replayed,
        records_dropped,
        resume_at,
        complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::input::MemoryInput;
    use crate::types::{EngineOptions, IdKey, InputDocument};
    use tempfile::TempDir;

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let options = EngineOptions::default();
        let document = InputDocument::try_new("a", IdKey::DocumentId, vec!["One sentence.".into()])
            .expect("document");
        let input = MemoryInput::new(vec![document]);
        let log = OutputLog::open(dir.path().join("out.jsonl"), "p").expect("open");
        let monitor = BatchMonitor::new(input.totals(), &options).expect("monitor");

        let err = BatchSequencer::new(input, log, monitor, 0).expect_err("zero batch size");
        assert!(matches!(err, DocBatchError::InvalidOptions { .. }), "{err}");
        assert!(!dir.path().join("out.jsonl").exists());
    }
}
