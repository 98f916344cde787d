//! Wire-level literals and tunable defaults shared across the crate.

/// Stored in `begin_doc_batch_datetime` for every record except a batch's first.
pub const NOT_FIRST_IN_BATCH: &str = "not first doc in doc batch";
/// Stored in `end_doc_batch_datetime` for every record except a batch's last.
pub const NOT_LAST_IN_BATCH: &str = "not last doc in doc batch";

pub const LEN_IN_SENTS_KEY: &str = "len_in_sents";
pub const LEN_IN_WORDS_KEY: &str = "len_in_words";
pub const LEN_IN_CHARS_KEY: &str = "len_in_chars";
pub const BEGIN_BATCH_KEY: &str = "begin_doc_batch_datetime";
pub const END_BATCH_KEY: &str = "end_doc_batch_datetime";

/// Keys an input document may carry its identity under, in lookup order.
pub const ID_KEYS: [&str; 2] = ["document_id", "documentID"];
/// Keys an input document may carry its raw text under, in lookup order.
pub const TEXT_KEYS: [&str; 1] = ["fullText"];

pub const DEFAULT_BATCH_SIZE: usize = 8;
pub const DEFAULT_MAX_SENTENCE_CHARS: usize = 2048;
pub const DEFAULT_PREDICTED_STATISTICS_KEY: &str = "predicted_statistics";
pub const DEFAULT_TIME_BUDGET_HOURS: u64 = 24;
pub const DEFAULT_SLOWDOWN_WINDOW: usize = 5;
pub const DEFAULT_SLOWDOWN_FACTOR: f64 = 2.0;

/// Suffix appended to the output log path for its sealed snapshot.
pub const LOG_CACHE_SUFFIX: &str = "cache";
/// Suffix appended to the output log path for the single-writer lock.
pub const LOG_LOCK_SUFFIX: &str = "lock";
/// Appended to the input file stem for the parsed-input cache.
pub const INPUT_CACHE_SUFFIX: &str = "input_cache_v1.bin";

pub const LOG_SNAPSHOT_VERSION: u32 = 1;
pub const INPUT_CACHE_VERSION: u32 = 2;

/// Emit a debug line every this many records while scanning large files.
pub const SCAN_PROGRESS_EVERY: usize = 100;

/// Exit status the CLI uses to ask its supervisor for a relaunch.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Counter bumped in the completion report each time a slowdown restart is requested.
pub const RESTARTS_REPORT_KEY: &str = "processing_slowdown_restart_num_restarts";
