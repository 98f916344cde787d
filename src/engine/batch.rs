//! A group of documents committed to the log together.
//!
//! An open [`Batch`] collects input documents and their predictions.
//! [`Batch::stamp`] fixes the boundary markers and turns it into a
//! [`StampedBatch`] of final records, and [`StampedBatch::commit`] consumes
//! that, so a batch can be neither restamped nor committed twice.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::engine::annotate::Annotator;
use crate::engine::monitor::BatchMonitor;
use crate::error::{DocBatchError, Result};
use crate::io::output_log::OutputLog;
use crate::types::{BatchMark, BatchStats, DocumentRecord, InputDocument, ProgressReport, Totals};

#[derive(Debug, Clone)]
struct BatchEntry {
    document: InputDocument,
    prediction: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct Batch {
    index: u64,
    entries: Vec<BatchEntry>,
}

impl Batch {
    pub(crate) fn new(index: u64, capacity: usize) -> Self {
        Self {
            index,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// 0-based position of this batch in the job.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, document: InputDocument) {
        self.entries.push(BatchEntry {
            document,
            prediction: None,
        });
    }

    pub fn documents(&self) -> impl Iterator<Item = &InputDocument> {
        self.entries.iter().map(|entry| &entry.document)
    }

    #[must_use]
    pub fn totals(&self) -> Totals {
        Totals::from_lengths(self.documents().map(InputDocument::lengths))
    }

    /// Attach the prediction for the document at `position`. Set once.
    pub fn set_prediction(&mut self, position: usize, prediction: Value) -> Result<()> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(position)
            .ok_or(DocBatchError::OutOfRange { index: position, len })?;
        if entry.prediction.is_some() {
            return Err(DocBatchError::AlreadyDone {
                operation: "set_prediction",
            });
        }
        entry.prediction = Some(prediction);
        Ok(())
    }

    /// Run `annotator` over every document still lacking a prediction.
    pub fn annotate<A: Annotator + ?Sized>(&mut self, annotator: &mut A) -> Result<()> {
        for entry in self.entries.iter_mut().filter(|entry| entry.prediction.is_none()) {
            entry.prediction = Some(annotator.annotate(&entry.document)?);
        }
        Ok(())
    }

    /// Fix the batch's boundary markers: `begin` on the first record, `end` on
    /// the last, sentinels everywhere else.
    pub fn stamp(self, begin: DateTime<Utc>, end: DateTime<Utc>) -> Result<StampedBatch> {
        if self.entries.is_empty() {
            return Err(DocBatchError::NotReady {
                operation: "stamp",
                requirement: "at least one document",
            });
        }
        if self.entries.iter().any(|entry| entry.prediction.is_none()) {
            return Err(DocBatchError::NotReady {
                operation: "stamp",
                requirement: "a prediction for every document",
            });
        }

        let last = self.entries.len() - 1;
        let records: Vec<DocumentRecord> = self
            .entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| {
                let begin_mark = if position == 0 {
                    BatchMark::At(begin)
                } else {
                    BatchMark::NotBoundary
                };
                let end_mark = if position == last {
                    BatchMark::At(end)
                } else {
                    BatchMark::NotBoundary
                };
                DocumentRecord::finalize(
                    entry.document,
                    entry.prediction.unwrap_or(Value::Null),
                    begin_mark,
                    end_mark,
                )
            })
            .collect();
        let stats = batch_stats(&records, begin, end);
        Ok(StampedBatch {
            index: self.index,
            records,
            stats,
        })
    }
}

/// A batch whose records are final and ready to be written.
#[derive(Debug, Clone)]
pub struct StampedBatch {
    index: u64,
    records: Vec<DocumentRecord>,
    stats: BatchStats,
}

impl StampedBatch {
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[must_use]
    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    #[must_use]
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Append every record in order, then report the batch to `monitor`.
    pub fn commit(self, log: &mut OutputLog, monitor: &mut BatchMonitor) -> Result<ProgressReport> {
        let count = self.records.len();
        for record in self.records {
            log.append(record)?;
        }
        log.finish_batch()?;
        tracing::debug!(batch.index = self.index, batch.documents = count, "committed batch");
        monitor.post_batch_update(self.stats)
    }
}

/// Aggregate statistics for the records of one batch spanning `begin..end`.
///
/// Durations are rounded up to whole seconds, with a floor of one second.
pub(crate) fn batch_stats(
    records: &[DocumentRecord],
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BatchStats {
    let totals = Totals::from_lengths(records.iter().map(DocumentRecord::lengths));
    let micros = (end - begin).num_microseconds().unwrap_or(i64::MAX);
    let seconds = (micros as f64 / 1_000_000.0).ceil().max(1.0) as u64;
    BatchStats {
        documents: totals.documents,
        sentences: totals.sentences,
        words: totals.words,
        chars: totals.chars,
        seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdKey;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn doc(id: &str) -> InputDocument {
        InputDocument::try_new(id, IdKey::DocumentId, vec!["Two words.".into()]).expect("document")
    }

    fn batch(ids: &[&str]) -> Batch {
        let mut batch = Batch::new(0, ids.len());
        for id in ids {
            batch.push(doc(id));
        }
        batch
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn only_first_and_last_carry_timestamps() {
        let mut open = batch(&["a", "b", "c"]);
        open.annotate(&mut |_: &InputDocument| -> Result<Value> { Ok(json!({})) })
            .expect("annotate");
        let stamped = open.stamp(at(0), at(5)).expect("stamp");
        let marks: Vec<(bool, bool)> = stamped
            .records()
            .iter()
            .map(|r| (r.begin().is_boundary(), r.end().is_boundary()))
            .collect();
        assert_eq!(marks, vec![(true, false), (false, false), (false, true)]);
        assert_eq!(stamped.records()[0].begin(), BatchMark::At(at(0)));
        assert_eq!(stamped.records()[2].end(), BatchMark::At(at(5)));
    }

    #[test]
    fn single_document_batch_carries_both_marks() {
        let mut open = batch(&["solo"]);
        open.set_prediction(0, json!({"x": 1})).expect("prediction");
        let stamped = open.stamp(at(0), at(1)).expect("stamp");
        let record = &stamped.records()[0];
        assert!(record.begin().is_boundary() && record.end().is_boundary());
        assert_eq!(record.predicted_statistics(), &json!({"x": 1}));
    }

    #[test]
    fn stamping_requires_documents_and_predictions() {
        assert!(matches!(
            batch(&[]).stamp(at(0), at(1)),
            Err(DocBatchError::NotReady { .. })
        ));
        let mut open = batch(&["a", "b"]);
        open.set_prediction(0, json!(1)).expect("prediction");
        assert!(matches!(
            open.set_prediction(0, json!(2)),
            Err(DocBatchError::AlreadyDone { .. })
        ));
        assert!(open.set_prediction(5, json!(2)).is_err());
        assert!(matches!(
            open.stamp(at(0), at(1)),
            Err(DocBatchError::NotReady { .. })
        ));
    }

    #[test]
    fn seconds_round_up_with_one_second_floor() {
        let records = vec![DocumentRecord::finalize(
            doc("a"),
            json!({}),
            BatchMark::NotBoundary,
            BatchMark::NotBoundary,
        )];
        let same = batch_stats(&records, at(0), at(0));
        assert_eq!(same.seconds, 1);
        let fractional = batch_stats(&records, at(0), at(2) + Duration::milliseconds(1));
        assert_eq!(fractional.seconds, 3);
        assert_eq!(fractional.words, 2);
    }
}
