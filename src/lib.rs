#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: public APIs carry docs where the name is not enough.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: counts and byte lengths stay far below the ranges where these
// casts lose information.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
//
// Style/complexity
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::unnecessary_wraps)]

//! Checkpointed document batch engine.
//!
//! Documents are pulled from an [`InputSource`] in fixed-size batches,
//! annotated, and appended to an [`OutputLog`] whose first and last record of
//! every batch carry its begin and end timestamps. Those markers are the only
//! checkpoint: on startup [`BatchSequencer`] replays the log, cuts a batch
//! whose commit was interrupted, and resumes exactly after the last complete
//! one. [`BatchMonitor`] tracks throughput and asks a [`RestartHandler`] for a
//! relaunch when it collapses.

/// The docbatch-core crate version (matches `Cargo.toml`).
pub const DOCBATCH_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod constants;
pub mod engine;
pub mod error;
pub mod io;
pub mod text;
pub mod types;

pub use engine::{
    Annotator, Batch, BatchMonitor, BatchSequencer, CompletionReport, LengthAnnotator,
    LoggingRestartHandler, MemorySink, ProgressSink, RecoveryReport, RestartHandler, RunOutcome,
    RunSummary, SlowdownState, StampedBatch, TracingProgressSink, recorded_restarts, run_job,
};
pub use error::{DocBatchError, Result};
pub use io::input::{InputSource, JsonlInput, MemoryInput, parse_document};
pub use io::lock::OutputLock;
pub use io::output_log::OutputLog;
pub use text::{SentenceSplitter, TextLengths, UnicodeSentenceSplitter, cap_sentences};
pub use types::{
    BatchMark, BatchStats, DocumentRecord, EngineOptions, EngineOptionsBuilder, IdKey,
    InputDocument, ProgressReport, Rates, SlowdownDrill, SyncPolicy, Totals, format_hms,
};
