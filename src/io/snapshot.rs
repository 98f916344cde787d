//! Sealed-log cache: the parsed records of a finished output log, so reopening
//! it for inspection skips the line scan.
//!
//! Layout: `[blake3(payload): 32 bytes][payload]`, where the payload is the
//! bincode encoding of [`LogSnapshot`]. The log stays the source of truth; a
//! cache that disagrees with it in any way is dropped.

use std::io::Write;
use std::path::Path;

use atomic_write_file::AtomicWriteFile;
use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::LOG_SNAPSHOT_VERSION;
use crate::error::Result;
use crate::text::TextLengths;
use crate::types::{BatchMark, DocumentRecord, IdKey, Totals};

const CHECKSUM_LEN: usize = 32;

fn snapshot_config() -> impl Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

// `serde_json::Value` needs a self-describing format, so the payload travels
// as JSON text and the markers as epoch microseconds.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    id: String,
    id_key: IdKey,
    lengths: TextLengths,
    begin_micros: Option<i64>,
    end_micros: Option<i64>,
    predicted_statistics: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogSnapshot {
    version: u32,
    log_len: u64,
    stats_key: String,
    records: Vec<SnapshotRecord>,
    totals: Totals,
}

fn mark_to_micros(mark: BatchMark) -> Option<i64> {
    mark.timestamp().map(|ts| ts.timestamp_micros())
}

fn micros_to_mark(micros: Option<i64>) -> std::result::Result<BatchMark, String> {
    match micros {
        None => Ok(BatchMark::NotBoundary),
        Some(value) => DateTime::<Utc>::from_timestamp_micros(value)
            .map(BatchMark::At)
            .ok_or_else(|| format!("timestamp {value} out of range")),
    }
}

/// Write the snapshot for a log of `log_len` bytes holding `records`.
pub(crate) fn write(
    cache_path: &Path,
    log_len: u64,
    stats_key: &str,
    records: &[DocumentRecord],
    totals: Totals,
) -> Result<()> {
    let records = records
        .iter()
        .map(|record| -> Result<SnapshotRecord> {
            Ok(SnapshotRecord {
                id: record.id().to_owned(),
                id_key: record.id_key(),
                lengths: record.lengths(),
                begin_micros: mark_to_micros(record.begin()),
                end_micros: mark_to_micros(record.end()),
                predicted_statistics: serde_json::to_string(record.predicted_statistics())?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let snapshot = LogSnapshot {
        version: LOG_SNAPSHOT_VERSION,
        log_len,
        stats_key: stats_key.to_owned(),
        records,
        totals,
    };
    let payload = encode_to_vec(&snapshot, snapshot_config())?;
    let checksum: [u8; CHECKSUM_LEN] = blake3::hash(&payload).into();

    let mut file = AtomicWriteFile::open(cache_path)?;
    file.write_all(&checksum)?;
    file.write_all(&payload)?;
    file.commit()?;
    tracing::debug!(
        cache.path = %cache_path.display(),
        cache.records = snapshot.records.len(),
        cache.bytes = payload.len() + CHECKSUM_LEN,
        "wrote log snapshot"
    );
    Ok(())
}

/// Load a snapshot, returning `Ok(None)` if it is unusable for a log that is
/// currently `log_len` bytes long under `stats_key`.
pub(crate) fn load(
    cache_path: &Path,
    log_len: u64,
    stats_key: &str,
) -> Result<Option<(Vec<DocumentRecord>, Totals)>> {
    let bytes = std::fs::read(cache_path)?;
    match decode(&bytes, log_len, stats_key) {
        Ok(loaded) => Ok(Some(loaded)),
        Err(reason) => {
            tracing::warn!(cache.path = %cache_path.display(), %reason, "discarding stale log snapshot");
            Ok(None)
        }
    }
}

fn decode(
    bytes: &[u8],
    log_len: u64,
    stats_key: &str,
) -> std::result::Result<(Vec<DocumentRecord>, Totals), String> {
    if bytes.len() < CHECKSUM_LEN {
        return Err("truncated snapshot".into());
    }
    let (checksum, payload) = bytes.split_at(CHECKSUM_LEN);
    let actual: [u8; CHECKSUM_LEN] = blake3::hash(payload).into();
    if actual.as_slice() != checksum {
        return Err("checksum mismatch".into());
    }
    let (snapshot, _): (LogSnapshot, usize) =
        decode_from_slice(payload, snapshot_config()).map_err(|err| err.to_string())?;
    if snapshot.version != LOG_SNAPSHOT_VERSION {
        return Err(format!("unsupported snapshot version {}", snapshot.version));
    }
    if snapshot.stats_key != stats_key {
        return Err(format!(
            "snapshot written for statistics key {:?}",
            snapshot.stats_key
        ));
    }
    if snapshot.log_len != log_len {
        return Err(format!(
            "snapshot covers {} log bytes, log has {log_len}",
            snapshot.log_len
        ));
    }

    let records = snapshot
        .records
        .into_iter()
        .map(|record| -> std::result::Result<DocumentRecord, String> {
            let predicted_statistics: Value = serde_json::from_str(&record.predicted_statistics)
                .map_err(|err| err.to_string())?;
            Ok(DocumentRecord::from_parts(
                record.id,
                record.id_key,
                record.lengths,
                micros_to_mark(record.begin_micros)?,
                micros_to_mark(record.end_micros)?,
                predicted_statistics,
            ))
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    let recomputed = Totals::from_lengths(records.iter().map(DocumentRecord::lengths));
    if recomputed != snapshot.totals {
        return Err("snapshot totals disagree with its records".into());
    }
    Ok((records, snapshot.totals))
}
