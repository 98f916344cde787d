//! Ordered input documents with a one-time rewind.

use std::io::Write;
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{INPUT_CACHE_SUFFIX, INPUT_CACHE_VERSION, SCAN_PROGRESS_EVERY, TEXT_KEYS};
use crate::error::{DocBatchError, Result};
use crate::io::{existing_len, remove_if_exists};
use crate::text::{SentenceSplitter, cap_sentences};
use crate::types::{IdKey, InputDocument, Totals};

/// Where the engine pulls documents from.
///
/// Sources are positional: document `i` of the source must be record `i` of
/// the output log.
pub trait InputSource {
    /// Number of documents in the source.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Totals over every document in the source.
    fn totals(&self) -> Totals;

    /// Index of the document `next_document` will return.
    fn cursor(&self) -> usize;

    fn has_next(&self) -> bool {
        self.cursor() < self.len()
    }

    fn next_document(&mut self) -> Option<InputDocument>;

    /// Rewind so the next document returned is `index`. Only used by recovery,
    /// and only once.
    fn set_cursor(&mut self, index: usize) -> Result<()>;
}

/// Documents held in memory.
#[derive(Debug, Clone)]
pub struct MemoryInput {
    documents: Vec<InputDocument>,
    totals: Totals,
    cursor: usize,
    rewound: bool,
}

impl MemoryInput {
    #[must_use]
    pub fn new(documents: Vec<InputDocument>) -> Self {
        let totals = Totals::from_lengths(documents.iter().map(InputDocument::lengths));
        Self {
            documents,
            totals,
            cursor: 0,
            rewound: false,
        }
    }

    #[must_use]
    pub fn documents(&self) -> &[InputDocument] {
        &self.documents
    }
}

impl InputSource for MemoryInput {
    fn len(&self) -> usize {
        self.documents.len()
    }

    fn totals(&self) -> Totals {
        self.totals
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn next_document(&mut self) -> Option<InputDocument> {
        let document = self.documents.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(document)
    }

    fn set_cursor(&mut self, index: usize) -> Result<()> {
        if self.rewound {
            return Err(DocBatchError::AlreadyDone {
                operation: "set_cursor",
            });
        }
        if index >= self.documents.len() || index > self.cursor {
            return Err(DocBatchError::OutOfRange {
                index,
                len: self.cursor.min(self.documents.len()),
            });
        }
        tracing::debug!(input.from = self.cursor, input.to = index, "rewound input cursor");
        self.cursor = index;
        self.rewound = true;
        Ok(())
    }
}

fn cache_config() -> impl Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

#[derive(Debug, Serialize, Deserialize)]
struct InputCache {
    version: u32,
    source_len: u64,
    source_checksum: [u8; 32],
    max_sentence_chars: u64,
    documents: Vec<InputDocument>,
}

/// A JSON-lines input file, parsed once and cached beside the source.
#[derive(Debug)]
pub struct JsonlInput {
    path: PathBuf,
    inner: MemoryInput,
}

impl JsonlInput {
    pub fn open(
        path: impl Into<PathBuf>,
        max_sentence_chars: usize,
        splitter: &dyn SentenceSplitter,
    ) -> Result<Self> {
        let path = path.into();
        let source = std::fs::read(&path)?;
        let source_len = source.len() as u64;
        let source_checksum: [u8; 32] = blake3::hash(&source).into();
        let cache_path = Self::cache_path(&path);

        let documents =
            match Self::load_cache(&cache_path, source_len, &source_checksum, max_sentence_chars)? {
                Some(documents) => documents,
                None => {
                    let text = String::from_utf8(source)
                        .map_err(|err| DocBatchError::malformed(0, format!("input is not UTF-8: {err}")))?;
                    let documents = parse(&text, max_sentence_chars, splitter)?;
                    Self::write_cache(
                        &cache_path,
                        source_len,
                        source_checksum,
                        max_sentence_chars,
                        &documents,
                    )?;
                    documents
                }
            };

        let inner = MemoryInput::new(documents);
        let totals = inner.totals();
        tracing::info!(
            input.path = %path.display(),
            input.documents = totals.documents,
            input.sentences = totals.sentences,
            input.words = totals.words,
            input.chars = totals.chars,
            "opened input"
        );
        Ok(Self { path, inner })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<dir>/<stem>.input_cache_v1.bin`.
    #[must_use]
    pub fn cache_path(path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map_or_else(|| "input".into(), |stem| stem.to_string_lossy().into_owned());
        path.with_file_name(format!("{stem}.{INPUT_CACHE_SUFFIX}"))
    }

    fn load_cache(
        cache_path: &Path,
        source_len: u64,
        source_checksum: &[u8; 32],
        max_sentence_chars: usize,
    ) -> Result<Option<Vec<InputDocument>>> {
        match existing_len(cache_path)? {
            None => return Ok(None),
            Some(0) => {
                remove_if_exists(cache_path)?;
                tracing::debug!(cache.path = %cache_path.display(), "removed empty input cache");
                return Ok(None);
            }
            Some(_) => {}
        }
        let bytes = std::fs::read(cache_path)?;
        let stale = match decode_from_slice::<InputCache, _>(&bytes, cache_config()) {
            Ok((cache, _)) if cache.version != INPUT_CACHE_VERSION => {
                format!("unsupported version {}", cache.version)
            }
            Ok((cache, _)) if cache.source_len != source_len => {
                format!("built from {} source bytes, source has {source_len}", cache.source_len)
            }
            Ok((cache, _)) if &cache.source_checksum != source_checksum => {
                "source checksum changed".to_owned()
            }
            Ok((cache, _)) if cache.max_sentence_chars != max_sentence_chars as u64 => {
                format!("built with max_sentence_chars {}", cache.max_sentence_chars)
            }
            Ok((cache, _)) => {
                tracing::debug!(cache.path = %cache_path.display(), "loaded input cache");
                return Ok(Some(cache.documents));
            }
            Err(err) => err.to_string(),
        };
        tracing::warn!(cache.path = %cache_path.display(), reason = %stale, "rebuilding input cache");
        Ok(None)
    }

    fn write_cache(
        cache_path: &Path,
        source_len: u64,
        source_checksum: [u8; 32],
        max_sentence_chars: usize,
        documents: &[InputDocument],
    ) -> Result<()> {
        let cache = InputCache {
            version: INPUT_CACHE_VERSION,
            source_len,
            source_checksum,
            max_sentence_chars: max_sentence_chars as u64,
            documents: documents.to_vec(),
        };
        let bytes = encode_to_vec(&cache, cache_config())?;
        let mut file = AtomicWriteFile::open(cache_path)?;
        file.write_all(&bytes)?;
        file.commit()?;
        tracing::debug!(cache.path = %cache_path.display(), cache.bytes = bytes.len(), "wrote input cache");
        Ok(())
    }
}

impl InputSource for JsonlInput {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn totals(&self) -> Totals {
        self.inner.totals()
    }

    fn cursor(&self) -> usize {
        self.inner.cursor()
    }

    fn next_document(&mut self) -> Option<InputDocument> {
        self.inner.next_document()
    }

    fn set_cursor(&mut self, index: usize) -> Result<()> {
        self.inner.set_cursor(index)
    }
}

fn parse(
    text: &str,
    max_sentence_chars: usize,
    splitter: &dyn SentenceSplitter,
) -> Result<Vec<InputDocument>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return Err(DocBatchError::malformed(0, "input contains no documents"));
    }

    let mut documents = Vec::with_capacity(lines.len());
    for (position, (line, json)) in lines.iter().enumerate() {
        if position == 0 || (position + 1) % SCAN_PROGRESS_EVERY == 0 || position + 1 == lines.len() {
            tracing::debug!(input.document = position + 1, input.documents = lines.len(), "parsing input");
        }
        documents.push(parse_document(*line, json, max_sentence_chars, splitter)?);
    }
    Ok(documents)
}

/// Build one document from an input JSON line. `line` is 1-based.
pub fn parse_document(
    line: usize,
    json: &str,
    max_sentence_chars: usize,
    splitter: &dyn SentenceSplitter,
) -> Result<InputDocument> {
    let value: Value =
        serde_json::from_str(json).map_err(|err| DocBatchError::malformed(line, err.to_string()))?;
    let Value::Object(object) = value else {
        return Err(DocBatchError::malformed(line, "expected a JSON object"));
    };

    let (id_key, id) = IdKey::find(&object)
        .ok_or_else(|| DocBatchError::malformed(line, "document has no id"))?;
    let id = match id {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        other => {
            return Err(DocBatchError::malformed(
                line,
                format!("{} must be a string, found {other}", id_key.as_str()),
            ));
        }
    };

    let text = TEXT_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .ok_or_else(|| {
            DocBatchError::malformed(
                line,
                format!("document {id} has none of the text keys {TEXT_KEYS:?}"),
            )
        })?
        .as_str()
        .ok_or_else(|| DocBatchError::malformed(line, format!("text of document {id} is not a string")))?;

    let sentences = cap_sentences(&id, splitter.split(text), max_sentence_chars);
    InputDocument::try_new(id.clone(), id_key, sentences)
        .ok_or_else(|| DocBatchError::malformed(line, format!("document {id} has no text")))
}
