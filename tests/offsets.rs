//! Byte-exact truncation over randomly shaped logs.

use std::fs;

use tempfile::TempDir;

use docbatch::{
    BatchMonitor, BatchSequencer, DocumentRecord, EngineOptions, IdKey, InputDocument,
    InputSource, LengthAnnotator, MemoryInput, OutputLog, RunOutcome, SyncPolicy, run_job,
};

const WORDS: [&str; 8] = [
    "alpha", "naïve", "日本語", "emoji🙂", "quote\"d", "back\\slash", "tab\tbed", "x",
];

fn random_document(rng: &mut fastrand::Rng, i: usize) -> InputDocument {
    let sentences = (0..rng.usize(1..=4))
        .map(|_| {
            let words: Vec<&str> = (0..rng.usize(1..=8))
                .map(|_| WORDS[rng.usize(..WORDS.len())])
                .collect();
            format!("{}.", words.join(" "))
        })
        .collect();
    let id_key = if rng.bool() {
        IdKey::DocumentId
    } else {
        IdKey::DocumentIdCamel
    };
    InputDocument::try_new(format!("doc-{i}-{}", rng.u32(..)), id_key, sentences).unwrap()
}

/// Run a random corpus to completion and strip the snapshot so the log is
/// scanned on every reopen.
fn write_random_log(rng: &mut fastrand::Rng, dir: &TempDir) -> (std::path::PathBuf, String) {
    let path = dir.path().join("out.jsonl");
    let docs: Vec<InputDocument> = (0..rng.usize(20..60))
        .map(|i| random_document(rng, i))
        .collect();
    let batch_size = rng.usize(1..=5);
    let options = EngineOptions::builder()
        .batch_size(batch_size)
        .sync(SyncPolicy::Never)
        .build()
        .unwrap();
    let key = options.predicted_statistics_key.clone();

    let input = MemoryInput::new(docs);
    let log = OutputLog::open(&path, key.clone()).unwrap().with_sync_policy(options.sync);
    let monitor = BatchMonitor::new(input.totals(), &options).unwrap();
    let mut seq = BatchSequencer::new(input, log, monitor, batch_size).unwrap();
    let outcome = run_job(&mut seq, &mut LengthAnnotator, &options).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    drop(seq);

    fs::remove_file(dir.path().join("out.jsonl.cache")).unwrap();
    (path, key)
}

#[test]
fn truncating_after_any_record_keeps_exactly_the_prefix() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_0ff5);
    let dir = TempDir::new().unwrap();
    let (path, key) = write_random_log(&mut rng, &dir);

    let reference: Vec<DocumentRecord> = OutputLog::open(&path, key.clone())
        .unwrap()
        .records()
        .to_vec();
    let pristine = fs::read(&path).unwrap();
    assert_ne!(pristine.last(), Some(&b'\n'));

    for _ in 0..16 {
        fs::write(&path, &pristine).unwrap();
        let keep = rng.usize(..reference.len());

        let mut log = OutputLog::open(&path, key.clone()).unwrap();
        let offset = log.offset_after(keep).unwrap();
        log.truncate_after(Some(keep)).unwrap();
        drop(log);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, offset);
        assert_eq!(bytes.as_slice(), &pristine[..bytes.len()]);
        assert_ne!(bytes.last(), Some(&b'\n'));

        let reopened = OutputLog::open(&path, key.clone()).unwrap();
        assert_eq!(reopened.records(), &reference[..=keep]);
    }
}

#[test]
fn torn_tail_of_any_length_is_ignored_and_cut() {
    let mut rng = fastrand::Rng::with_seed(0x7041);
    let dir = TempDir::new().unwrap();
    let (path, key) = write_random_log(&mut rng, &dir);

    let reference: Vec<DocumentRecord> = OutputLog::open(&path, key.clone())
        .unwrap()
        .records()
        .to_vec();
    let pristine = fs::read(&path).unwrap();
    let tail = reference[0].to_json_line(&key).unwrap();

    for _ in 0..8 {
        // A newline plus a strict prefix of a record never parses.
        let cut = rng.usize(1..tail.len());
        let mut torn = pristine.clone();
        torn.push(b'\n');
        torn.extend_from_slice(&tail.as_bytes()[..cut]);
        fs::write(&path, &torn).unwrap();

        let mut log = OutputLog::open(&path, key.clone()).unwrap();
        assert_eq!(log.records(), reference.as_slice());
        log.truncate_after(Some(reference.len() - 1)).unwrap();
        drop(log);
        assert_eq!(fs::read(&path).unwrap(), pristine);
    }
}
