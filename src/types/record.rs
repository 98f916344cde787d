//! Per-document values: what the input hands the engine and what the log stores.
//!
//! An [`InputDocument`] has no batch markers yet. Stamping a batch turns each
//! one into a [`DocumentRecord`], whose markers are fixed from then on; records
//! read back from the log are built directly in that finalized form.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{
    BEGIN_BATCH_KEY, END_BATCH_KEY, ID_KEYS, LEN_IN_CHARS_KEY, LEN_IN_SENTS_KEY,
    LEN_IN_WORDS_KEY, NOT_FIRST_IN_BATCH, NOT_LAST_IN_BATCH,
};
use crate::error::{DocBatchError, Result};
use crate::text::TextLengths;

/// Which JSON key a document's identity was read under; written back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKey {
    DocumentId,
    DocumentIdCamel,
}

impl IdKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentId => ID_KEYS[0],
            Self::DocumentIdCamel => ID_KEYS[1],
        }
    }

    /// Find the first recognised id key present in `object`.
    pub(crate) fn find(object: &Map<String, Value>) -> Option<(Self, &Value)> {
        [Self::DocumentId, Self::DocumentIdCamel]
            .into_iter()
            .find_map(|key| object.get(key.as_str()).map(|value| (key, value)))
    }
}

/// Batch boundary marker: a real timestamp on the first/last record of a
/// batch, `NotBoundary` everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMark {
    At(DateTime<Utc>),
    NotBoundary,
}

impl BatchMark {
    #[must_use]
    pub fn timestamp(self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(ts) => Some(ts),
            Self::NotBoundary => None,
        }
    }

    #[must_use]
    pub fn is_boundary(self) -> bool {
        matches!(self, Self::At(_))
    }

    fn to_json(self, sentinel: &str) -> Value {
        match self {
            Self::At(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Self::NotBoundary => Value::String(sentinel.to_owned()),
        }
    }

    fn from_json(value: &Value, sentinel: &str) -> std::result::Result<Self, String> {
        let text = value
            .as_str()
            .ok_or_else(|| format!("expected a string, found {value}"))?;
        if text == sentinel {
            return Ok(Self::NotBoundary);
        }
        parse_timestamp(text).map(Self::At)
    }
}

/// Accept RFC 3339 as well as offset-less ISO-8601, which is read as UTC.
fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| format!("invalid timestamp {text:?}: {err}"))
}

/// A segmented input document, not yet part of any batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDocument {
    id: String,
    id_key: IdKey,
    sentences: Vec<String>,
    lengths: TextLengths,
}

impl InputDocument {
    /// Build a document from already-capped sentences.
    ///
    /// Returns `None` when the sentences contain no words or characters, since
    /// every length statistic must be positive.
    #[must_use]
    pub fn try_new(id: impl Into<String>, id_key: IdKey, sentences: Vec<String>) -> Option<Self> {
        let lengths = TextLengths::measure(&sentences);
        if !lengths.all_positive() {
            return None;
        }
        Some(Self {
            id: id.into(),
            id_key,
            sentences,
            lengths,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn id_key(&self) -> IdKey {
        self.id_key
    }

    #[must_use]
    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    #[must_use]
    pub fn lengths(&self) -> TextLengths {
        self.lengths
    }
}

/// A committed (or about-to-be-committed) log record.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    id: String,
    id_key: IdKey,
    lengths: TextLengths,
    begin: BatchMark,
    end: BatchMark,
    predicted_statistics: Value,
}

impl DocumentRecord {
    pub(crate) fn finalize(
        document: InputDocument,
        predicted_statistics: Value,
        begin: BatchMark,
        end: BatchMark,
    ) -> Self {
        Self {
            id: document.id,
            id_key: document.id_key,
            lengths: document.lengths,
            begin,
            end,
            predicted_statistics,
        }
    }

    pub(crate) fn from_parts(
        id: String,
        id_key: IdKey,
        lengths: TextLengths,
        begin: BatchMark,
        end: BatchMark,
        predicted_statistics: Value,
    ) -> Self {
        Self {
            id,
            id_key,
            lengths,
            begin,
            end,
            predicted_statistics,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn id_key(&self) -> IdKey {
        self.id_key
    }

    #[must_use]
    pub fn lengths(&self) -> TextLengths {
        self.lengths
    }

    #[must_use]
    pub fn begin(&self) -> BatchMark {
        self.begin
    }

    #[must_use]
    pub fn end(&self) -> BatchMark {
        self.end
    }

    #[must_use]
    pub fn predicted_statistics(&self) -> &Value {
        &self.predicted_statistics
    }

    /// Serialize to a single JSON line (no separator).
    pub fn to_json_line(&self, stats_key: &str) -> Result<String> {
        let mut object = Map::new();
        object.insert(self.id_key.as_str().to_owned(), Value::from(self.id.clone()));
        object.insert(LEN_IN_SENTS_KEY.to_owned(), Value::from(self.lengths.sentences));
        object.insert(LEN_IN_WORDS_KEY.to_owned(), Value::from(self.lengths.words));
        object.insert(LEN_IN_CHARS_KEY.to_owned(), Value::from(self.lengths.chars));
        object.insert(BEGIN_BATCH_KEY.to_owned(), self.begin.to_json(NOT_FIRST_IN_BATCH));
        object.insert(END_BATCH_KEY.to_owned(), self.end.to_json(NOT_LAST_IN_BATCH));
        object.insert(stats_key.to_owned(), self.predicted_statistics.clone());
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    /// Parse one log line. `line` is 1-based and only used for error context.
    pub fn from_json_line(line: usize, bytes: &[u8], stats_key: &str) -> Result<Self> {
        let invalid = |reason: String| DocBatchError::InvalidRecord { line, reason };

        let value: Value = serde_json::from_slice(bytes).map_err(|err| invalid(err.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(invalid("expected a JSON object".into()));
        };

        let (id_key, id) = IdKey::find(&object)
            .ok_or_else(|| invalid(format!("none of the id keys {ID_KEYS:?} present")))?;
        let id = id
            .as_str()
            .ok_or_else(|| invalid(format!("{} must be a string", id_key.as_str())))?
            .to_owned();

        let positive = |key: &str| -> Result<u64> {
            object
                .get(key)
                .and_then(Value::as_u64)
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid(format!("{key} must be a positive integer")))
        };
        let lengths = TextLengths {
            sentences: positive(LEN_IN_SENTS_KEY)?,
            words: positive(LEN_IN_WORDS_KEY)?,
            chars: positive(LEN_IN_CHARS_KEY)?,
        };

        let mark = |key: &str, sentinel: &str| -> Result<BatchMark> {
            let value = object
                .get(key)
                .ok_or_else(|| invalid(format!("missing {key}")))?;
            BatchMark::from_json(value, sentinel).map_err(|reason| invalid(format!("{key}: {reason}")))
        };
        let begin = mark(BEGIN_BATCH_KEY, NOT_FIRST_IN_BATCH)?;
        let end = mark(END_BATCH_KEY, NOT_LAST_IN_BATCH)?;

        let predicted_statistics = object
            .remove(stats_key)
            .ok_or_else(|| invalid(format!("missing predicted statistics key {stats_key:?}")))?;

        Ok(Self {
            id,
            id_key,
            lengths,
            begin,
            end,
            predicted_statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(id: &str) -> InputDocument {
        InputDocument::try_new(id, IdKey::DocumentIdCamel, vec!["One two.".into(), "Three.".into()])
            .expect("non-empty document")
    }

    #[test]
    fn json_line_round_trip_keeps_id_key_and_markers() {
        let begin = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let record = DocumentRecord::finalize(
            doc("abc"),
            json!({"label": "x", "score": 0.5}),
            BatchMark::At(begin),
            BatchMark::NotBoundary,
        );
        let line = record.to_json_line("preds").expect("serialize");
        assert!(line.contains("\"documentID\":\"abc\""));
        assert!(line.contains(NOT_LAST_IN_BATCH));
        assert!(!line.contains('\n'));

        let parsed = DocumentRecord::from_json_line(1, line.as_bytes(), "preds").expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let line = br#"{"document_id":"a","len_in_sents":1,"len_in_words":2,"len_in_chars":3,
            "begin_doc_batch_datetime":"2024-05-06T07:08:09.123456",
            "end_doc_batch_datetime":"2024-05-06T07:08:19","p":{}}"#;
        let record = DocumentRecord::from_json_line(4, line, "p").expect("parse");
        let begin = record.begin().timestamp().expect("real begin");
        assert_eq!(begin.timestamp(), 1_714_979_289);
        assert!(record.end().is_boundary());
    }

    #[test]
    fn rejects_missing_statistics_key() {
        let line = br#"{"document_id":"a","len_in_sents":1,"len_in_words":1,"len_in_chars":1,
            "begin_doc_batch_datetime":"not first doc in doc batch",
            "end_doc_batch_datetime":"not last doc in doc batch"}"#;
        let err = DocumentRecord::from_json_line(9, line, "p").unwrap_err();
        assert!(matches!(err, DocBatchError::InvalidRecord { line: 9, .. }));
    }

    #[test]
    fn rejects_zero_lengths_and_swapped_sentinels() {
        let zero = br#"{"document_id":"a","len_in_sents":0,"len_in_words":1,"len_in_chars":1,
            "begin_doc_batch_datetime":"not first doc in doc batch",
            "end_doc_batch_datetime":"not last doc in doc batch","p":{}}"#;
        assert!(DocumentRecord::from_json_line(1, zero, "p").is_err());

        let swapped = br#"{"document_id":"a","len_in_sents":1,"len_in_words":1,"len_in_chars":1,
            "begin_doc_batch_datetime":"not last doc in doc batch",
            "end_doc_batch_datetime":"not last doc in doc batch","p":{}}"#;
        assert!(DocumentRecord::from_json_line(1, swapped, "p").is_err());
    }

    #[test]
    fn empty_documents_are_refused() {
        assert!(InputDocument::try_new("x", IdKey::DocumentId, vec![]).is_none());
        assert!(InputDocument::try_new("x", IdKey::DocumentId, vec!["...".into()]).is_some());
    }
}
