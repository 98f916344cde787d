use std::time::Instant;

use chrono::Utc;

use crate::engine::annotate::Annotator;
use crate::engine::monitor::SlowdownState;
use crate::engine::sequencer::BatchSequencer;
use crate::error::Result;
use crate::io::input::InputSource;
use crate::types::{EngineOptions, Totals};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Batches committed by this run, not counting replayed ones.
    pub batches_committed: u64,
    /// Documents appended by this run.
    pub documents_written: u64,
    /// Totals over the whole log.
    pub log_totals: Totals,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Input exhausted and the log sealed.
    Completed(RunSummary),
    /// The monitor declared a slowdown and its restart handler has run. The log
    /// is consistent up to and including `last_good_batch_index`.
    RestartRequested {
        last_good_batch_index: u64,
        elapsed_secs: u64,
        summary: RunSummary,
    },
}

/// Drive `sequencer` to completion: annotate, stamp, and commit each batch,
/// checking for a slowdown after every commit.
pub fn run_job<I, A>(
    sequencer: &mut BatchSequencer<I>,
    annotator: &mut A,
    options: &EngineOptions,
) -> Result<RunOutcome>
where
    I: InputSource,
    A: Annotator + ?Sized,
{
    let started = Instant::now();
    let mut batches_committed = 0;
    let mut documents_written = 0;

    while let Some(mut batch) = sequencer.next() {
        let begin = Utc::now();
        if let Some(drill) = options.slowdown_drill {
            if let Some(delay) = sequencer.monitor().drill_delay(drill, batch.totals().sentences) {
                std::thread::sleep(delay);
            }
        }
        batch.annotate(annotator)?;
        let end = Utc::now();

        let stamped = batch.stamp(begin, end)?;
        let documents = stamped.records().len() as u64;
        let (log, monitor) = sequencer.parts_mut();
        stamped.commit(log, monitor)?;
        batches_committed += 1;
        documents_written += documents;

        let elapsed_secs = started.elapsed().as_secs();
        if monitor.check_for_slowdown(elapsed_secs)? == SlowdownState::SlowdownDeclared {
            let summary = RunSummary {
                batches_committed,
                documents_written,
                log_totals: log.totals(),
                elapsed_secs,
            };
            return Ok(RunOutcome::RestartRequested {
                last_good_batch_index: monitor.batches().saturating_sub(1),
                elapsed_secs,
                summary,
            });
        }
    }

    let log = sequencer.log_mut();
    if !log.is_sealed() {
        log.seal()?;
    }
    let summary = RunSummary {
        batches_committed,
        documents_written,
        log_totals: log.totals(),
        elapsed_secs: started.elapsed().as_secs(),
    };
    tracing::info!(
        run.batches = summary.batches_committed,
        run.documents = summary.documents_written,
        log.documents = summary.log_totals.documents,
        run.elapsed_secs = summary.elapsed_secs,
        "job complete"
    );
    Ok(RunOutcome::Completed(summary))
}
