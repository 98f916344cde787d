//! Batch assembly, recovery, monitoring, and the job loop.

pub mod annotate;
pub mod batch;
pub mod monitor;
pub mod restart;
pub mod runner;
pub mod sequencer;

pub use annotate::{Annotator, LengthAnnotator};
pub use batch::{Batch, StampedBatch};
pub use monitor::{BatchMonitor, MemorySink, ProgressSink, SlowdownState, TracingProgressSink};
pub use restart::{CompletionReport, LoggingRestartHandler, RestartHandler, recorded_restarts};
pub use runner::{RunOutcome, RunSummary, run_job};
pub use sequencer::{BatchSequencer, RecoveryReport};
