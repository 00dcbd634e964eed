//! Property tests for version application and the record encoding.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use lsm_manifest::{
    default_format_key, BulkVersionEdit, BytewiseComparator, FileMetadata, FileNum, InternalKey,
    KeyKind, ManifestOptions, Version, VersionEdit,
};

/// An L1 file covering keys `[k{lo}, k{lo}a]`, numbered after its key.
fn l1_file(lo: u32, seq: u64) -> Arc<FileMetadata> {
    let mut m = FileMetadata::new(FileNum(lo as u64 + 1), 64 + lo as u64).with_seq_nums(seq, seq);
    m.extend_point_key_bounds(
        &BytewiseComparator::new(),
        InternalKey::new(format!("k{:04}", lo), seq, KeyKind::Set),
        InternalKey::new(format!("k{:04}a", lo), seq, KeyKind::Set),
    );
    m.init_physical_backing();
    Arc::new(m)
}

fn apply(curr: Option<&Version>, ve: &VersionEdit) -> Version {
    let mut bve = BulkVersionEdit::new();
    bve.accumulate(ve).unwrap();
    bve.apply(curr, &ManifestOptions::default(), None).unwrap()
}

fn level_nums(v: &Version, level: usize) -> Vec<u64> {
    v.level(level)
        .slice()
        .files()
        .iter()
        .map(|f| f.file_num.0)
        .collect()
}

fn release(v: &Version) {
    v.add_ref();
    v.release_ref();
}

proptest! {
    #[test]
    fn prop_clone_isolation(
        base in prop::collection::btree_set(0u32..400, 1..80),
        extra in prop::collection::btree_set(400u32..600, 0..40),
        delete_mask in prop::collection::vec(any::<bool>(), 80),
    ) {
        let files: Vec<Arc<FileMetadata>> = base.iter().map(|&k| l1_file(k, 1)).collect();
        let mut ve = VersionEdit::new();
        for f in &files {
            ve.add_file(1, f.clone());
        }
        let v1 = apply(None, &ve);
        let before = level_nums(&v1, 1);

        let mut ve = VersionEdit::new();
        let mut expected: BTreeSet<u64> = before.iter().copied().collect();
        for (f, &del) in files.iter().zip(&delete_mask) {
            if del {
                ve.delete_file(1, f.clone());
                expected.remove(&f.file_num.0);
            }
        }
        let added: Vec<Arc<FileMetadata>> = extra.iter().map(|&k| l1_file(k, 2)).collect();
        for f in &added {
            ve.add_file(1, f.clone());
            expected.insert(f.file_num.0);
        }
        let v2 = apply(Some(&v1), &ve);

        prop_assert_eq!(level_nums(&v1, 1), before);
        prop_assert_eq!(level_nums(&v2, 1), expected.into_iter().collect::<Vec<_>>());
        let cmp = BytewiseComparator::new();
        prop_assert!(v2.check_ordering(&cmp, default_format_key).is_ok());

        release(&v2);
        release(&v1);
    }

    #[test]
    fn prop_refs_return_to_zero(
        base in prop::collection::btree_set(0u32..300, 1..120),
        delete_mask in prop::collection::vec(any::<bool>(), 120),
    ) {
        let files: Vec<Arc<FileMetadata>> = base.iter().map(|&k| l1_file(k, 1)).collect();
        let mut ve = VersionEdit::new();
        for f in &files {
            ve.add_file(1, f.clone());
        }
        let v1 = apply(None, &ve);

        let mut ve = VersionEdit::new();
        let deleted: Vec<&Arc<FileMetadata>> = files
            .iter()
            .zip(&delete_mask)
            .filter_map(|(f, &d)| d.then_some(f))
            .collect();
        for f in &deleted {
            ve.delete_file(1, (*f).clone());
        }
        let v2 = apply(Some(&v1), &ve);

        // Every file is held by some node while either version is live.
        prop_assert!(files.iter().all(|f| f.refs() > 0));
        release(&v2);
        prop_assert!(files.iter().all(|f| f.refs() > 0));
        for f in &deleted {
            prop_assert_eq!(f.latest_refs(), 0);
        }
        release(&v1);
        prop_assert!(files.iter().all(|f| f.refs() == 0));
    }

    #[test]
    fn prop_edit_round_trip(
        keys in prop::collection::btree_set(0u32..1000, 1..30),
        levels in prop::collection::vec(0usize..7, 30),
        last_seq in 1u64..1 << 40,
        log_num in 0u64..1 << 20,
    ) {
        let mut ve = VersionEdit::new();
        ve.last_seq_num = last_seq;
        ve.min_unflushed_log_num = FileNum(log_num);
        for (&k, &level) in keys.iter().zip(&levels) {
            ve.add_file(level, l1_file(k, last_seq));
        }
        let decoded = VersionEdit::decode(&ve.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, ve);
    }
}
