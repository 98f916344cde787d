//! A throughput collapse stops the job with a consistent log, and the
//! relaunched job finishes it.

use std::path::Path;

use tempfile::TempDir;

use docbatch::{
    BatchMonitor, BatchSequencer, CompletionReport, EngineOptions, IdKey, InputDocument,
    InputSource, LengthAnnotator, LoggingRestartHandler, MemoryInput, MemorySink, OutputLog,
    RunOutcome, SlowdownState, SyncPolicy, recorded_restarts, run_job,
};

/// Three ten-sentence documents, then four one-sentence ones. With one
/// document per batch the sentence rate falls from 10/s to 1/s.
fn documents() -> Vec<InputDocument> {
    (0..7)
        .map(|i| {
            let sentences = if i < 3 { 10 } else { 1 };
            InputDocument::try_new(
                format!("doc-{i}"),
                IdKey::DocumentId,
                (0..sentences).map(|s| format!("Sentence {s} of doc {i}.")).collect(),
            )
            .unwrap()
        })
        .collect()
}

fn options() -> EngineOptions {
    EngineOptions::builder()
        .batch_size(1)
        .slowdown_window(2)
        .slowdown_factor(2.0)
        .sync(SyncPolicy::Never)
        .build()
        .unwrap()
}

fn sequencer(log_path: &Path, report_path: &Path, sink: MemorySink) -> BatchSequencer<MemoryInput> {
    let options = options();
    let input = MemoryInput::new(documents());
    let log = OutputLog::open(log_path, options.predicted_statistics_key.clone()).unwrap();
    let monitor = BatchMonitor::new(input.totals(), &options)
        .unwrap()
        .with_sink(sink)
        .with_restart_handler(CompletionReport::new(report_path, LoggingRestartHandler));
    BatchSequencer::new(input, log, monitor, options.batch_size).unwrap()
}

#[test]
fn collapse_requests_restart_and_rerun_completes() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("out.jsonl");
    let report_path = dir.path().join("report.json");

    // First launch: rates 10, 10, 10, 1, 1. The window average drops to 1,
    // below half of the record 10, after the fifth batch.
    let mut seq = sequencer(&log_path, &report_path, MemorySink::new());
    let outcome = run_job(&mut seq, &mut LengthAnnotator, &options()).unwrap();
    let RunOutcome::RestartRequested {
        last_good_batch_index,
        summary,
        ..
    } = outcome
    else {
        panic!("expected a restart request, got {outcome:?}");
    };
    assert_eq!(last_good_batch_index, 4);
    assert_eq!(summary.batches_committed, 5);
    assert_eq!(summary.documents_written, 5);
    assert_eq!(seq.monitor().state(), SlowdownState::SlowdownDeclared);
    assert_eq!(seq.monitor().record_high(), 10.0);
    assert_eq!(seq.log().len(), 5);
    assert!(!seq.log().is_sealed());
    drop(seq);

    assert!(!dir.path().join("out.jsonl.cache").exists());
    assert_eq!(recorded_restarts(&report_path).unwrap(), 1);

    // Relaunch: five batches replay, two more run, and the log is sealed.
    let sink = MemorySink::new();
    let mut seq = sequencer(&log_path, &report_path, sink.clone());
    assert_eq!(seq.recovery().batches_replayed, 5);
    assert_eq!(seq.recovery().resume_at, 5);
    let outcome = run_job(&mut seq, &mut LengthAnnotator, &options()).unwrap();
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.batches_committed, 2);
    assert_eq!(summary.log_totals.documents, 7);
    assert!(seq.log().is_sealed());

    let reports = sink.reports();
    assert_eq!(reports.len(), 7);
    assert_eq!(reports.last().unwrap().processed.documents, 7);
    assert_eq!(recorded_restarts(&report_path).unwrap(), 1);
}

#[test]
fn steady_throughput_never_restarts() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("out.jsonl");
    let report_path = dir.path().join("report.json");

    let docs: Vec<InputDocument> = (0..6)
        .map(|i| {
            InputDocument::try_new(format!("doc-{i}"), IdKey::DocumentId, vec!["Same size.".into()])
                .unwrap()
        })
        .collect();
    let options = options();
    let input = MemoryInput::new(docs);
    let log = OutputLog::open(&log_path, options.predicted_statistics_key.clone()).unwrap();
    let monitor = BatchMonitor::new(input.totals(), &options)
        .unwrap()
        .with_restart_handler(CompletionReport::new(&report_path, LoggingRestartHandler));
    let mut seq = BatchSequencer::new(input, log, monitor, 1).unwrap();

    let outcome = run_job(&mut seq, &mut LengthAnnotator, &options).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.documents_written == 6));
    assert_eq!(seq.monitor().state(), SlowdownState::Steady);
    assert!(!report_path.exists());
}
