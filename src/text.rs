//! Sentence segmentation and the length bookkeeping derived from it.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Splits raw document text into sentences.
///
/// Implementations must be deterministic: the same text always yields the same
/// sentences, otherwise length statistics drift between a run and its resume.
pub trait SentenceSplitter {
    fn split(&self, text: &str) -> Vec<String>;
}

/// UAX #29 sentence boundaries, trimmed, with whitespace-only pieces dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeSentenceSplitter;

impl SentenceSplitter for UnicodeSentenceSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        text.split_sentence_bounds()
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Truncate `text` to at most `max_chars` Unicode scalar values.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Cap every sentence at `max_chars`, logging each truncation.
pub fn cap_sentences(doc_id: &str, sentences: Vec<String>, max_chars: usize) -> Vec<String> {
    sentences
        .into_iter()
        .enumerate()
        .map(|(index, sentence)| {
            let original = sentence.chars().count();
            if original <= max_chars {
                return sentence;
            }
            tracing::debug!(
                doc.id = doc_id,
                sentence.index = index,
                sentence.chars = original,
                sentence.max_chars = max_chars,
                "sentence truncated"
            );
            truncate_chars(&sentence, max_chars).to_owned()
        })
        .collect()
}

/// Sentence, word, and character counts of an already-segmented document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextLengths {
    pub sentences: u64,
    pub words: u64,
    pub chars: u64,
}

impl TextLengths {
    #[must_use]
    pub fn measure(sentences: &[String]) -> Self {
        Self {
            sentences: sentences.len() as u64,
            words: sentences
                .iter()
                .map(|s| s.split_whitespace().count() as u64)
                .sum(),
            chars: sentences.iter().map(|s| s.chars().count() as u64).sum(),
        }
    }

    #[must_use]
    pub fn all_positive(&self) -> bool {
        self.sentences > 0 && self.words > 0 && self.chars > 0
    }
}
