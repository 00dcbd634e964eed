//! Stress tests for concurrent access to a version set.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use lsm_manifest::{
    default_format_key, BytewiseComparator, FileMetadata, FileNum, InternalKey, KeyKind,
    ManifestOptions, VersionEdit, VersionSet,
};

fn table(num: FileNum, smallest: String, largest: String, seq: u64) -> Arc<FileMetadata> {
    let mut m = FileMetadata::new(num, 4096).with_seq_nums(seq, seq);
    m.extend_point_key_bounds(
        &BytewiseComparator::new(),
        InternalKey::new(smallest, seq, KeyKind::Set),
        InternalKey::new(largest, seq, KeyKind::Set),
    );
    m.init_physical_backing();
    Arc::new(m)
}

/// Test concurrent writers installing edits.
#[test]
fn stress_concurrent_writers() {
    let vs = Arc::new(VersionSet::new(ManifestOptions::default()).unwrap());
    let num_threads = 8;
    let files_per_thread = 50;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let vs = Arc::clone(&vs);
            thread::spawn(move || {
                for i in 0..files_per_thread {
                    let f = table(
                        vs.new_file_num(),
                        format!("t{:02}_{:04}", t, i),
                        format!("t{:02}_{:04}z", t, i),
                        1,
                    );
                    let mut ve = VersionEdit::new();
                    ve.add_file(1, f);
                    vs.log_and_apply(&mut ve).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let v = vs.current();
    assert_eq!(v.level(1).len(), num_threads * files_per_thread);
    v.check_ordering(&BytewiseComparator::new(), default_format_key)
        .unwrap();
    let nums: HashSet<FileNum> = v.level(1).slice().files().iter().map(|f| f.file_num).collect();
    assert_eq!(nums.len(), num_threads * files_per_thread);
}

/// Test readers pinning versions while flushes and compactions land.
#[test]
fn stress_concurrent_read_write() {
    let vs = Arc::new(VersionSet::new(ManifestOptions::default()).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let num_readers = 4;

    let readers: Vec<_> = (0..num_readers)
        .map(|_| {
            let vs = Arc::clone(&vs);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let cmp = BytewiseComparator::new();
                let mut pinned = Vec::new();
                let mut seen = 0usize;
                while !done.load(Ordering::Acquire) {
                    let v = vs.current();
                    v.check_ordering(&cmp, default_format_key).unwrap();
                    seen += v.level(0).len() + v.level(1).len();
                    pinned.push(v);
                    if pinned.len() > 8 {
                        pinned.clear();
                    }
                }
                seen
            })
        })
        .collect();

    let mut flushed = Vec::new();
    let mut seq = 0u64;
    for round in 0..20 {
        for i in 0..5 {
            seq += 1;
            let f = table(
                vs.new_file_num(),
                format!("a{:02}", i),
                format!("k{:02}", 10 - i),
                seq,
            );
            let mut ve = VersionEdit::new();
            ve.last_seq_num = seq;
            ve.add_file(0, f.clone());
            vs.log_and_apply(&mut ve).unwrap();
            flushed.push(f);
        }

        let mut ve = VersionEdit::new();
        for f in vs.current().level(0).slice().files() {
            ve.delete_file(0, f);
        }
        ve.add_file(
            1,
            table(
                vs.new_file_num(),
                format!("r{:03}", round),
                format!("r{:03}z", round),
                seq,
            ),
        );
        vs.log_and_apply(&mut ve).unwrap();
    }

    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(vs.versions().len(), 1);
    assert!(vs.current().level(0).empty());
    assert_eq!(vs.current().level(1).len(), 20);
    assert!(flushed.iter().all(|f| f.refs() == 0));

    let obsolete: HashSet<FileNum> = vs
        .take_obsolete_tables()
        .iter()
        .map(|b| FileNum(b.disk_file_num.0))
        .collect();
    let expected: HashSet<FileNum> = flushed.iter().map(|f| f.file_num).collect();
    assert_eq!(obsolete, expected);
    assert!(vs.zombie_tables().is_empty());
}
