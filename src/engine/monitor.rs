//! Throughput bookkeeping and slowdown detection.
//!
//! The monitor is fed one [`BatchStats`] per committed batch, including the
//! batches replayed from the log on resume. It keeps running totals, derives
//! rates and a completion estimate, and watches a sliding window of per-batch
//! sentence rates. When the window average falls below `record_high / factor`
//! it declares a slowdown and hands control to the [`RestartHandler`] once.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::engine::restart::{LoggingRestartHandler, RestartHandler};
use crate::error::Result;
use crate::types::{
    BatchStats, EngineOptions, ProgressReport, Rates, SlowdownDrill, Totals, format_hms,
};

/// Receives a report after every posted batch.
pub trait ProgressSink {
    fn publish(&mut self, report: &ProgressReport);
}

/// Emits each report as a structured `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn publish(&mut self, report: &ProgressReport) {
        tracing::info!(
            batch.index = report.batch_index,
            batch.documents = report.batch.documents,
            batch.sentences = report.batch.sentences,
            batch.words = report.batch.words,
            batch.chars = report.batch.chars,
            batch.secs = report.batch.seconds,
            batch.sents_per_sec = format_args!("{:.4}", report.batch_rates.sentences),
            total.documents = report.processed.documents,
            total.elapsed = %format_hms(report.elapsed_secs as f64),
            total.sents_per_sec = format_args!("{:.4}", report.cumulative_rates.sentences),
            total.chars_per_sec = format_args!("{:.4}", report.cumulative_rates.chars),
            eta.remaining = %format_hms(report.remaining_secs),
            eta.total = %format_hms(report.estimated_total_secs),
            budget.used = format_args!("{:.4}", report.budget_used),
            budget.projected = format_args!("{:.4}", report.budget_projected),
            progress.percent = format_args!("{:.2}", report.percent_complete()),
            "batch progress"
        );
    }
}

/// Keeps every report in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: Rc<RefCell<Vec<ProgressReport>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<ProgressReport> {
        self.reports.borrow().clone()
    }
}

impl ProgressSink for MemorySink {
    fn publish(&mut self, report: &ProgressReport) {
        self.reports.borrow_mut().push(report.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowdownState {
    /// Fewer than `window` batches seen.
    FillingWindow,
    Steady,
    /// Terminal until the process is restarted.
    SlowdownDeclared,
}

pub struct BatchMonitor {
    input: Totals,
    window_size: usize,
    factor: f64,
    time_budget_secs: u64,

    processed: Totals,
    elapsed_secs: u64,
    batches: u64,

    window: VecDeque<f64>,
    window_filled_at: Option<u64>,
    record_high: f64,
    state: SlowdownState,

    sink: Box<dyn ProgressSink>,
    restart: Box<dyn RestartHandler>,
}

impl std::fmt::Debug for BatchMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchMonitor")
            .field("input", &self.input)
            .field("processed", &self.processed)
            .field("elapsed_secs", &self.elapsed_secs)
            .field("batches", &self.batches)
            .field("window", &self.window)
            .field("record_high", &self.record_high)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl BatchMonitor {
    /// Monitor a job over an input with the given `input` totals. Reports go
    /// to tracing and restarts are only logged until replaced.
    ///
    /// Fails with `InvalidOptions` when `options` does not validate.
    pub fn new(input: Totals, options: &EngineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            input,
            window_size: options.slowdown_window,
            factor: options.slowdown_factor,
            time_budget_secs: options.time_budget_hours * 3600,
            processed: Totals::default(),
            elapsed_secs: 0,
            batches: 0,
            window: VecDeque::with_capacity(options.slowdown_window),
            window_filled_at: None,
            record_high: 0.0,
            state: SlowdownState::FillingWindow,
            sink: Box::new(TracingProgressSink),
            restart: Box::new(LoggingRestartHandler),
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    #[must_use]
    pub fn with_restart_handler(mut self, handler: impl RestartHandler + 'static) -> Self {
        self.restart = Box::new(handler);
        self
    }

    /// Batches posted so far.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches
    }

    #[must_use]
    pub fn processed(&self) -> Totals {
        self.processed
    }

    /// Sum of posted batch durations.
    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    #[must_use]
    pub fn state(&self) -> SlowdownState {
        self.state
    }

    #[must_use]
    pub fn record_high(&self) -> f64 {
        self.record_high
    }

    #[must_use]
    pub fn window(&self) -> &VecDeque<f64> {
        &self.window
    }

    pub fn post_batch_update(&mut self, batch: BatchStats) -> Result<ProgressReport> {
        batch.validate()?;

        self.processed.documents += batch.documents;
        self.processed.sentences += batch.sentences;
        self.processed.words += batch.words;
        self.processed.chars += batch.chars;
        self.elapsed_secs += batch.seconds;
        self.batches += 1;

        let batch_rates = batch.rates();
        let cumulative_rates = Rates::over(self.processed, self.elapsed_secs as f64);

        self.window.push_back(batch_rates.sentences);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }
        if self.window_filled_at.is_none() && self.window.len() == self.window_size {
            self.window_filled_at = Some(self.batches);
            if self.state == SlowdownState::FillingWindow {
                self.state = SlowdownState::Steady;
            }
            tracing::debug!(batch.index = self.batches, window.size = self.window_size, "rate window full");
        }

        let chars_remaining = self.input.chars.saturating_sub(self.processed.chars);
        let remaining_secs = if cumulative_rates.chars > 0.0 {
            chars_remaining as f64 / cumulative_rates.chars
        } else {
            f64::INFINITY
        };
        let estimated_total_secs = self.elapsed_secs as f64 + remaining_secs;
        let budget = self.time_budget_secs as f64;

        let report = ProgressReport {
            batch_index: self.batches,
            batch,
            batch_rates,
            processed: self.processed,
            elapsed_secs: self.elapsed_secs,
            cumulative_rates,
            input: self.input,
            chars_remaining,
            remaining_secs,
            estimated_total_secs,
            budget_used: self.elapsed_secs as f64 / budget,
            budget_projected: estimated_total_secs / budget,
        };
        self.sink.publish(&report);
        Ok(report)
    }

    /// Compare the window average to its record high, declaring a slowdown
    /// (and invoking the restart handler) the first time it falls below
    /// `record_high / factor`.
    pub fn check_for_slowdown(&mut self, elapsed_secs: u64) -> Result<SlowdownState> {
        if self.state != SlowdownState::Steady {
            return Ok(self.state);
        }
        let average = self.window.iter().sum::<f64>() / self.window.len() as f64;
        if average > self.record_high {
            tracing::debug!(window.average = average, window.previous_high = self.record_high, "new rate record");
            self.record_high = average;
            return Ok(self.state);
        }
        let threshold = self.record_high / self.factor;
        if average < threshold {
            let last_good = self.batches.saturating_sub(1);
            tracing::warn!(
                window.average = average,
                window.record_high = self.record_high,
                window.threshold = threshold,
                batch.last_good = last_good,
                "processing slowdown declared"
            );
            self.state = SlowdownState::SlowdownDeclared;
            self.restart.recover(last_good, elapsed_secs)?;
        }
        Ok(self.state)
    }

    /// How long the slowdown drill should stall a batch of `batch_sentences`
    /// sentences, if it is armed yet.
    #[must_use]
    pub fn drill_delay(&self, drill: SlowdownDrill, batch_sentences: u64) -> Option<Duration> {
        let filled_at = self.window_filled_at?;
        let delayed = self.batches.saturating_sub(filled_at);
        if delayed < drill.delay_batches as u64 || self.record_high <= 0.0 || batch_sentences == 0 {
            return None;
        }
        let target_rate = self.record_high / self.factor;
        let secs = batch_sentences as f64 / target_rate;
        tracing::debug!(drill.delayed = delayed, drill.sleep_secs = secs, "slowdown drill stalling batch");
        Some(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(window: usize, factor: f64) -> EngineOptions {
        EngineOptions::builder()
            .slowdown_window(window)
            .slowdown_factor(factor)
            .build()
            .expect("options")
    }

    fn stats(sentences: u64, seconds: u64) -> BatchStats {
        BatchStats {
            documents: 1,
            sentences,
            words: sentences * 10,
            chars: sentences * 50,
            seconds,
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<(u64, u64)>>>);

    impl RestartHandler for Recorder {
        fn recover(&mut self, last_good_batch_index: u64, elapsed_secs: u64) -> Result<()> {
            self.0.borrow_mut().push((last_good_batch_index, elapsed_secs));
            Ok(())
        }
    }

    #[test]
    fn unvalidated_options_are_rejected() {
        let empty_window = EngineOptions {
            slowdown_window: 0,
            ..EngineOptions::default()
        };
        assert!(matches!(
            BatchMonitor::new(Totals::default(), &empty_window),
            Err(crate::error::DocBatchError::InvalidOptions { .. })
        ));

        let nan_factor = EngineOptions {
            slowdown_factor: f64::NAN,
            ..EngineOptions::default()
        };
        assert!(BatchMonitor::new(Totals::default(), &nan_factor).is_err());
    }

    #[test]
    fn single_batch_scenario_finishes_input() {
        let input = Totals {
            documents: 4,
            sentences: 40,
            words: 400,
            chars: 2000,
        };
        let sink = MemorySink::new();
        let mut monitor = BatchMonitor::new(input, &options(5, 2.0))
            .expect("monitor")
            .with_sink(sink.clone());
        let report = monitor
            .post_batch_update(BatchStats {
                documents: 4,
                sentences: 40,
                words: 400,
                chars: 2000,
                seconds: 10,
            })
            .expect("update");
        assert_eq!(report.batch_rates.sentences, 4.0);
        assert_eq!(report.chars_remaining, 0);
        assert_eq!(report.remaining_secs, 0.0);
        assert_eq!(report.estimated_total_secs, 10.0);
        assert_eq!(report.percent_complete(), 100.0);
        assert_eq!(sink.reports(), vec![report]);
    }

    #[test]
    fn non_positive_statistics_are_rejected() {
        let mut monitor = BatchMonitor::new(Totals::default(), &options(3, 2.0)).expect("monitor");
        assert!(monitor.post_batch_update(stats(0, 1)).is_err());
        assert_eq!(monitor.batches(), 0);
    }

    #[test]
    fn budget_fractions_and_estimates() {
        let input = Totals {
            documents: 10,
            sentences: 100,
            words: 1000,
            chars: 5000,
        };
        let opts = EngineOptions::builder().time_budget_hours(1).build().expect("options");
        let mut monitor = BatchMonitor::new(input, &opts).expect("monitor");
        // 20 sentences -> 1000 chars in 360s: 4000 chars left at 1000/360 chars/s.
        let report = monitor.post_batch_update(stats(20, 360)).expect("update");
        assert!((report.remaining_secs - 1440.0).abs() < 1e-9);
        assert!((report.budget_used - 0.1).abs() < 1e-9);
        assert!((report.budget_projected - 0.5).abs() < 1e-9);
        assert!((report.percent_complete() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rising_then_falling_rates_trigger_exactly_one_slowdown() {
        let recorder = Recorder::default();
        let mut monitor = BatchMonitor::new(Totals::default(), &options(3, 2.0))
            .expect("monitor")
            .with_restart_handler(recorder.clone());

        // Sentence rates per batch (seconds fixed at 1).
        let rates = [10, 10, 10, 20, 20, 20, 5, 5, 5, 5, 1];
        let mut states = Vec::new();
        for (i, rate) in rates.iter().enumerate() {
            monitor.post_batch_update(stats(*rate, 1)).expect("update");
            states.push(monitor.check_for_slowdown(100 + i as u64).expect("check"));
        }

        use SlowdownState::{FillingWindow, SlowdownDeclared, Steady};
        // Window averages from batch 3 on: 10, 13.3, 16.7, 20, 15, 10, 5 (< 20/2).
        assert_eq!(
            states,
            vec![
                FillingWindow,
                FillingWindow,
                Steady,
                Steady,
                Steady,
                Steady,
                Steady,
                Steady,
                SlowdownDeclared,
                SlowdownDeclared,
                SlowdownDeclared,
            ]
        );
        assert_eq!(monitor.record_high(), 20.0);
        assert_eq!(*recorder.0.borrow(), vec![(8, 108)]);
    }

    #[test]
    fn window_holds_at_most_its_size() {
        let mut monitor = BatchMonitor::new(Totals::default(), &options(2, 2.0)).expect("monitor");
        for rate in [1, 2, 3, 4] {
            monitor.post_batch_update(stats(rate, 1)).expect("update");
        }
        assert_eq!(monitor.window().iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0]);
    }

    #[test]
    fn drill_waits_for_delay_then_targets_threshold() {
        let mut monitor = BatchMonitor::new(Totals::default(), &options(2, 2.0)).expect("monitor");
        let drill = SlowdownDrill { delay_batches: 1 };
        monitor.post_batch_update(stats(8, 1)).expect("update");
        assert!(monitor.drill_delay(drill, 8).is_none());
        monitor.post_batch_update(stats(8, 1)).expect("update");
        monitor.check_for_slowdown(2).expect("check");
        assert_eq!(monitor.record_high(), 8.0);
        // Window just filled: nothing delayed yet.
        assert!(monitor.drill_delay(drill, 8).is_none());
        monitor.post_batch_update(stats(8, 1)).expect("update");
        assert_eq!(monitor.drill_delay(drill, 8), Some(Duration::from_secs(2)));
    }
}
