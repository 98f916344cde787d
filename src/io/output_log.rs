//! Append-only JSON-lines record log with byte-exact truncation.
//!
//! The file holds one record per line and never ends with a newline: every
//! append after the first is prefixed with `\n`. While a freshly scanned log
//! has not been repaired yet, `offset_after(i)` is the exact byte length that
//! keeps records `[0..=i]`, which is what `truncate_after` cuts back to.
//!
//! State moves strictly forward:
//! `Scanned -> Truncated -> Appending -> Sealed`, or straight to `Sealed`
//! when opened from a valid snapshot. A sealed log goes back to `Truncated`
//! only through `unseal`, which drops its snapshot.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::{LOG_CACHE_SUFFIX, SCAN_PROGRESS_EVERY};
use crate::error::{DocBatchError, Result};
use crate::io::{existing_len, remove_if_exists, sibling_path, snapshot};
use crate::types::{DocumentRecord, SyncPolicy, Totals};

#[derive(Debug)]
enum LogState {
    /// Parsed from disk; `offsets[i]` is the end of record `i`.
    Scanned { offsets: Vec<u64>, file_len: u64 },
    /// Recovery cut applied; file is `len` bytes long.
    Truncated { len: u64 },
    Appending { file: File, len: u64 },
    /// Read-only; file is `len` bytes long.
    Sealed { len: u64 },
}

#[derive(Debug)]
pub struct OutputLog {
    path: PathBuf,
    cache_path: PathBuf,
    stats_key: String,
    sync: SyncPolicy,
    records: Vec<DocumentRecord>,
    totals: Totals,
    state: LogState,
}

impl OutputLog {
    /// Open the log at `path`, loading its snapshot when one matches the log
    /// and scanning the lines otherwise. A missing or empty log opens empty.
    ///
    /// Not read-only: an empty log file is deleted, and so is a snapshot that
    /// is empty, stale, or has no log beside it.
    pub fn open(path: impl Into<PathBuf>, stats_key: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let stats_key = stats_key.into();
        let cache_path = sibling_path(&path, LOG_CACHE_SUFFIX);

        let mut log_len = existing_len(&path)?;
        if log_len == Some(0) {
            remove_if_exists(&path)?;
            tracing::debug!(log.path = %path.display(), "removed empty output log");
            log_len = None;
        }

        match (existing_len(&cache_path)?, log_len) {
            (None, _) => {}
            (Some(cache_len), Some(log_len)) if cache_len > 0 => {
                if let Some((records, totals)) = snapshot::load(&cache_path, log_len, &stats_key)? {
                    tracing::info!(
                        log.path = %path.display(),
                        log.records = records.len(),
                        "opened sealed output log from snapshot"
                    );
                    return Ok(Self {
                        path,
                        cache_path,
                        stats_key,
                        sync: SyncPolicy::default(),
                        records,
                        totals,
                        state: LogState::Sealed { len: log_len },
                    });
                }
                remove_if_exists(&cache_path)?;
            }
            (Some(_), _) => {
                remove_if_exists(&cache_path)?;
                tracing::debug!(cache.path = %cache_path.display(), "removed unusable log snapshot");
            }
        }

        let (records, offsets, file_len) = match log_len {
            Some(file_len) => {
                let (records, offsets) = scan(&path, &stats_key)?;
                (records, offsets, file_len)
            }
            None => (Vec::new(), Vec::new(), 0),
        };
        let totals = Totals::from_lengths(records.iter().map(DocumentRecord::lengths));
        tracing::info!(
            log.path = %path.display(),
            log.records = records.len(),
            log.bytes = file_len,
            "scanned output log"
        );
        Ok(Self {
            path,
            cache_path,
            stats_key,
            sync: SyncPolicy::default(),
            records,
            totals,
            state: LogState::Scanned { offsets, file_len },
        })
    }

    #[must_use]
    pub fn with_sync_policy(mut self, sync: SyncPolicy) -> Self {
        self.sync = sync;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn stats_key(&self) -> &str {
        &self.stats_key
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    pub fn record_at(&self, index: usize) -> Result<&DocumentRecord> {
        self.records.get(index).ok_or(DocBatchError::OutOfRange {
            index,
            len: self.records.len(),
        })
    }

    /// Totals over the records currently in the log.
    #[must_use]
    pub fn totals(&self) -> Totals {
        self.totals
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(self.state, LogState::Sealed { .. })
    }

    #[must_use]
    pub fn is_appending(&self) -> bool {
        matches!(self.state, LogState::Appending { .. })
    }

    /// Byte length that keeps records `[0..=index]`. Only available before
    /// `truncate_after` has run.
    pub fn offset_after(&self, index: usize) -> Result<u64> {
        match &self.state {
            LogState::Scanned { offsets, .. } => {
                offsets.get(index).copied().ok_or(DocBatchError::OutOfRange {
                    index,
                    len: offsets.len(),
                })
            }
            _ => Err(DocBatchError::NotReady {
                operation: "offset_after",
                requirement: "an unrepaired, freshly scanned log",
            }),
        }
    }

    /// Keep exactly records `[0..=index]`; `None` deletes the file.
    ///
    /// Also cuts any torn tail line, so keeping every record can still shrink
    /// the file. Runs at most once.
    pub fn truncate_after(&mut self, keep: Option<usize>) -> Result<()> {
        let (target, file_len) = match &self.state {
            LogState::Scanned { offsets, file_len } => {
                let target = match keep {
                    None => None,
                    Some(index) => {
                        let len = offsets.get(index).copied().ok_or(DocBatchError::OutOfRange {
                            index,
                            len: offsets.len(),
                        })?;
                        Some((index, len))
                    }
                };
                (target, *file_len)
            }
            LogState::Sealed { .. } => return Err(self.sealed()),
            LogState::Truncated { .. } | LogState::Appending { .. } => {
                return Err(DocBatchError::AlreadyDone {
                    operation: "truncate_after",
                });
            }
        };

        let dropped = match target {
            None => {
                if remove_if_exists(&self.path)? {
                    tracing::warn!(
                        log.path = %self.path.display(),
                        log.records = self.records.len(),
                        "deleted output log"
                    );
                }
                let dropped = self.records.len();
                self.records.clear();
                self.state = LogState::Truncated { len: 0 };
                dropped
            }
            Some((index, len)) => {
                if len != file_len {
                    let file = OpenOptions::new().write(true).open(&self.path)?;
                    file.set_len(len)?;
                    file.sync_all()?;
                    tracing::warn!(
                        log.path = %self.path.display(),
                        log.keep_through = index,
                        log.bytes_before = file_len,
                        log.bytes_after = len,
                        "truncated output log"
                    );
                }
                let dropped = self.records.len() - (index + 1);
                self.records.truncate(index + 1);
                self.state = LogState::Truncated { len };
                dropped
            }
        };
        if dropped > 0 {
            self.totals = Totals::from_lengths(self.records.iter().map(DocumentRecord::lengths));
        }
        Ok(())
    }

    pub fn open_for_appending(&mut self) -> Result<()> {
        let len = match &self.state {
            LogState::Truncated { len } => *len,
            LogState::Scanned { .. } => {
                return Err(DocBatchError::NotReady {
                    operation: "open_for_appending",
                    requirement: "truncate_after",
                });
            }
            LogState::Appending { .. } => {
                return Err(DocBatchError::AlreadyDone {
                    operation: "open_for_appending",
                });
            }
            LogState::Sealed { .. } => return Err(self.sealed()),
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        tracing::debug!(log.path = %self.path.display(), log.bytes = len, "output log open for appending");
        self.state = LogState::Appending { file, len };
        Ok(())
    }

    /// Append one record as a new line. Existing bytes are never rewritten.
    pub fn append(&mut self, record: DocumentRecord) -> Result<()> {
        let line = record.to_json_line(&self.stats_key)?;
        let (file, len) = self.writer("append")?;

        let mut bytes = Vec::with_capacity(line.len() + 1);
        if *len > 0 {
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(line.as_bytes());
        file.write_all(&bytes)?;
        *len += bytes.len() as u64;

        tracing::debug!(log.index = self.records.len(), doc.id = record.id(), "appended record");
        self.totals.add(record.lengths());
        self.records.push(record);
        Ok(())
    }

    /// Flush appended records to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        let (file, _) = self.writer("sync")?;
        file.sync_data()?;
        Ok(())
    }

    /// Called once a batch's records are all appended.
    pub(crate) fn finish_batch(&mut self) -> Result<()> {
        match self.sync {
            SyncPolicy::PerBatch => self.sync(),
            SyncPolicy::Never => Ok(()),
        }
    }

    /// Make the log read-only and write its snapshot beside it.
    pub fn seal(&mut self) -> Result<()> {
        let len = match &self.state {
            LogState::Truncated { len } => *len,
            LogState::Appending { file, len } => {
                file.sync_all()?;
                *len
            }
            LogState::Scanned { .. } => {
                return Err(DocBatchError::NotReady {
                    operation: "seal",
                    requirement: "truncate_after",
                });
            }
            LogState::Sealed { .. } => return Err(DocBatchError::AlreadyDone { operation: "seal" }),
        };
        if !self.records.is_empty() {
            snapshot::write(&self.cache_path, len, &self.stats_key, &self.records, self.totals)?;
        }
        self.state = LogState::Sealed { len };
        tracing::info!(
            log.path = %self.path.display(),
            log.records = self.records.len(),
            log.bytes = len,
            "sealed output log"
        );
        Ok(())
    }

    /// Drop the snapshot of a sealed log so more records can be appended.
    /// The log moves to the same state `truncate_after` leaves it in.
    pub fn unseal(&mut self) -> Result<()> {
        let LogState::Sealed { len } = self.state else {
            return Err(DocBatchError::NotReady {
                operation: "unseal",
                requirement: "seal",
            });
        };
        remove_if_exists(&self.cache_path)?;
        tracing::info!(
            log.path = %self.path.display(),
            log.records = self.records.len(),
            log.bytes = len,
            "unsealed output log"
        );
        self.state = LogState::Truncated { len };
        Ok(())
    }

    fn writer(&mut self, operation: &'static str) -> Result<(&mut File, &mut u64)> {
        match &mut self.state {
            LogState::Appending { file, len } => Ok((file, len)),
            LogState::Sealed { .. } => Err(DocBatchError::Sealed {
                path: self.path.clone(),
            }),
            LogState::Scanned { .. } | LogState::Truncated { .. } => Err(DocBatchError::NotReady {
                operation,
                requirement: "open_for_appending",
            }),
        }
    }

    fn sealed(&self) -> DocBatchError {
        DocBatchError::Sealed {
            path: self.path.clone(),
        }
    }
}

/// Parse every line, returning records and the end offset of each.
///
/// An unparseable final line is a torn write and is left out; an unparseable
/// line anywhere else means the log was damaged and is fatal.
fn scan(path: &Path, stats_key: &str) -> Result<(Vec<DocumentRecord>, Vec<u64>)> {
    let bytes = std::fs::read(path)?;
    let lines: Vec<&[u8]> = bytes.split(|byte| *byte == b'\n').collect();
    let last = lines.len() - 1;

    let mut records = Vec::with_capacity(lines.len());
    let mut offsets = Vec::with_capacity(lines.len());
    let mut start = 0u64;
    for (index, line) in lines.iter().enumerate() {
        let end = start + line.len() as u64;
        match DocumentRecord::from_json_line(index + 1, line, stats_key) {
            Ok(record) => {
                records.push(record);
                offsets.push(end);
            }
            Err(err) if index == last => {
                tracing::warn!(
                    log.path = %path.display(),
                    log.line = index + 1,
                    log.torn_bytes = line.len(),
                    error = %err,
                    "ignoring torn final line"
                );
            }
            Err(err) => {
                tracing::error!(log.path = %path.display(), log.line = index + 1, error = %err, "damaged output log");
                return Err(DocBatchError::corrupt(index, err.to_string()));
            }
        }
        if (index + 1) % SCAN_PROGRESS_EVERY == 0 {
            tracing::debug!(log.scanned = index + 1, log.lines = lines.len(), "scanning output log");
        }
        start = end + 1;
    }
    Ok((records, offsets))
}
