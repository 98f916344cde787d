use serde_json::{Value, json};

use crate::error::Result;
use crate::types::InputDocument;

/// Produces the prediction payload stored with each record. The engine never
/// looks inside it.
pub trait Annotator {
    fn annotate(&mut self, document: &InputDocument) -> Result<Value>;
}

impl<F> Annotator for F
where
    F: FnMut(&InputDocument) -> Result<Value>,
{
    fn annotate(&mut self, document: &InputDocument) -> Result<Value> {
        self(document)
    }
}

/// Simple surface statistics; useful as a stand-in for a real model.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthAnnotator;

impl Annotator for LengthAnnotator {
    fn annotate(&mut self, document: &InputDocument) -> Result<Value> {
        let lengths = document.lengths();
        let sentences = lengths.sentences as f64;
        Ok(json!({
            "sentence_count": lengths.sentences,
            "mean_sentence_chars": lengths.chars as f64 / sentences,
            "mean_words_per_sentence": lengths.words as f64 / sentences,
        }))
    }
}
