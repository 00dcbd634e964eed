//! Integration tests for complete manifest workflows.

use std::sync::Arc;

use lsm_manifest::version::ZombieTables;
use lsm_manifest::{
    BulkVersionEdit, BytewiseComparator, Comparator, DiskFileNum, Error, FileBacking, FileMetadata,
    FileNum, InternalKey, KeyKind, ManifestOptions, Version, VersionEdit, VersionSet,
};

fn cmp() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator::new())
}

fn physical(num: u64, smallest: &'static str, largest: &'static str, seq: u64) -> Arc<FileMetadata> {
    let mut m = FileMetadata::new(FileNum(num), 1024).with_seq_nums(seq, seq);
    m.extend_point_key_bounds(
        cmp().as_ref(),
        InternalKey::new(smallest, seq, KeyKind::Set),
        InternalKey::new(largest, seq, KeyKind::Set),
    );
    m.init_physical_backing();
    Arc::new(m)
}

fn apply(curr: Option<&Version>, ve: &VersionEdit) -> lsm_manifest::Result<Version> {
    let mut bve = BulkVersionEdit::new();
    bve.accumulate(ve)?;
    bve.apply(curr, &ManifestOptions::default(), None)
}

fn nums(v: &Version, level: usize) -> Vec<u64> {
    v.level(level)
        .slice()
        .files()
        .iter()
        .map(|f| f.file_num.0)
        .collect()
}

/// Test finding a file and bounding a slice to it.
#[test]
fn integration_find_and_delete_in_level() {
    let f1 = physical(1, "a", "c", 1);
    let f2 = physical(2, "d", "f", 2);
    let mut ve = VersionEdit::new();
    ve.add_file(1, f1.clone());
    ve.add_file(1, f2.clone());
    let v1 = apply(None, &ve).unwrap();

    let found = v1.level(1).find(cmp().as_ref(), &f1).unwrap();
    assert!(Arc::ptr_eq(&found.file, &f1));
    let only = found.slice().files();
    assert_eq!(only.len(), 1);
    assert!(Arc::ptr_eq(&only[0], &f1));

    let mut ve = VersionEdit::new();
    ve.delete_file(1, f2.clone());
    let v2 = apply(Some(&v1), &ve).unwrap();
    assert_eq!(v2.level(1).len(), 1);
    assert!(v2.level(1).find(cmp().as_ref(), &f2).is_none());
    // The base version is untouched.
    assert_eq!(nums(&v1, 1), vec![1, 2]);
}

/// Test that replacing a file with an overlapping one is rejected.
#[test]
fn integration_overlapping_replacement() {
    let f1 = physical(1, "a", "c", 1);
    let f2 = physical(2, "d", "f", 2);
    let mut ve = VersionEdit::new();
    ve.add_file(1, f1.clone());
    ve.add_file(1, f2.clone());
    let base = apply(None, &ve).unwrap();

    let mut bad = VersionEdit::new();
    bad.delete_file(1, f1.clone());
    bad.add_file(1, physical(3, "a", "e", 3));
    let err = apply(Some(&base), &bad).unwrap_err();
    assert!(err.is_corruption());
    assert!(
        err.to_string().contains("L1 files 000002 and 000003")
            || err.to_string().contains("L1 files 000003 and 000002"),
        "{}",
        err
    );
    // A rejected edit leaves reference counts where they were.
    assert_eq!(f1.latest_refs(), 1);
    assert_eq!(nums(&base, 1), vec![1, 2]);

    let mut good = VersionEdit::new();
    good.delete_file(1, f1.clone());
    good.add_file(1, physical(4, "a", "c2", 4));
    let v = apply(Some(&base), &good).unwrap();
    assert_eq!(nums(&v, 1), vec![4, 2]);
    v.check_ordering(cmp().as_ref(), lsm_manifest::default_format_key)
        .unwrap();
}

/// Test that a virtual table's backing becomes a zombie, then obsolete.
#[test]
fn integration_virtual_backing_lifecycle() {
    let vs = VersionSet::new(ManifestOptions::default()).unwrap();
    let backing = Arc::new(FileBacking::new(DiskFileNum(50), 8192));

    let mut m = FileMetadata::new(vs.new_file_num(), 2048)
        .with_seq_nums(3, 4)
        .with_virtual();
    m.extend_point_key_bounds(
        cmp().as_ref(),
        InternalKey::new("k", 4, KeyKind::Set),
        InternalKey::new("q", 3, KeyKind::Set),
    );
    assert!(m.set_backing(backing.clone()));
    let v_file = Arc::new(m);

    let mut e1 = VersionEdit::new();
    e1.created_backing_tables.push(backing.clone());
    e1.add_file(6, v_file.clone());
    vs.log_and_apply(&mut e1).unwrap();
    assert!(e1.removed_backing_tables.is_empty());
    assert_eq!(backing.latest_refs(), 1);

    let pinned = vs.current();
    let mut e2 = VersionEdit::new();
    e2.delete_file(6, v_file.clone());
    vs.log_and_apply(&mut e2).unwrap();

    assert_eq!(e2.removed_backing_tables, vec![DiskFileNum(50)]);
    let zombies: ZombieTables = vs.zombie_tables();
    assert_eq!(zombies.get(&DiskFileNum(50)), Some(&8192));
    assert!(vs.take_obsolete_tables().is_empty());

    drop(pinned);
    let obsolete = vs.take_obsolete_tables();
    assert_eq!(obsolete.len(), 1);
    assert!(Arc::ptr_eq(&obsolete[0], &backing));
    assert!(vs.zombie_tables().is_empty());
    assert_eq!(backing.refs(), 0);

    // Replaying the two edits ends with the backing gone too.
    let recovered = VersionSet::recover(ManifestOptions::default(), vs.manifest_records()).unwrap();
    assert!(recovered.current().level(6).empty());
}

/// Test that edits round trip through the record encoding.
#[test]
fn integration_edit_round_trip() {
    let mut ve = VersionEdit::new();
    ve.comparer_name = "leveldb.BytewiseComparator".to_string();
    ve.min_unflushed_log_num = FileNum(12);
    ve.next_file_num = FileNum(40);
    ve.last_seq_num = 900;
    ve.add_file(0, physical(31, "a", "m", 800));
    ve.add_file(4, physical(32, "n", "z", 5));
    ve.delete_file(5, physical(17, "b", "c", 2));

    let mut buf = Vec::new();
    ve.encode_to(&mut buf).unwrap();
    let decoded = VersionEdit::decode_from(&mut buf.as_slice()).unwrap();
    assert_eq!(decoded, ve);
    assert_eq!(decoded.deleted_files.len(), 1);
}

/// Test recovering a version set from its own manifest.
#[test]
fn integration_recover_after_flushes_and_compaction() {
    let vs = VersionSet::new(ManifestOptions::default()).unwrap();
    let mut l0 = Vec::new();
    for (i, &(s, l)) in [("a", "h"), ("c", "k"), ("b", "e")].iter().enumerate() {
        let seq = (i as u64 + 1) * 10;
        let f = physical(vs.new_file_num().0, s, l, seq);
        let mut ve = VersionEdit::new();
        ve.last_seq_num = seq;
        ve.add_file(0, f.clone());
        vs.log_and_apply(&mut ve).unwrap();
        l0.push(f);
    }
    assert_eq!(vs.current().l0_sublevels().unwrap().num_sublevels(), 3);

    // Compact all of L0 into two L1 files.
    let mut ve = VersionEdit::new();
    for f in &l0 {
        ve.delete_file(0, f.clone());
    }
    ve.add_file(1, physical(vs.new_file_num().0, "a", "f", 30));
    ve.add_file(1, physical(vs.new_file_num().0, "g", "k", 30));
    vs.log_and_apply(&mut ve).unwrap();

    let format = lsm_manifest::default_format_key;
    let current = vs.current();
    assert!(current.level(0).empty());
    assert_eq!(current.level(1).len(), 2);
    assert!(l0.iter().all(|f| f.refs() == 0));

    let recovered = VersionSet::recover(ManifestOptions::default(), vs.manifest_records()).unwrap();
    assert_eq!(recovered.current().debug_string(format), current.debug_string(format));
    assert_eq!(recovered.last_seq_num(), 30);
    assert_eq!(recovered.next_file_num(), vs.next_file_num());
    recovered
        .current()
        .check_ordering(cmp().as_ref(), format)
        .unwrap();
}

/// Test that a truncated manifest is reported as corruption.
#[test]
fn integration_recover_truncated_record() {
    let vs = VersionSet::new(ManifestOptions::default()).unwrap();
    let mut ve = VersionEdit::new();
    ve.add_file(2, physical(vs.new_file_num().0, "a", "b", 1));
    vs.log_and_apply(&mut ve).unwrap();

    let mut records = vs.manifest_records();
    let last = records.pop().unwrap();
    records.push(last.slice(..last.len() - 1));
    let err = VersionSet::recover(ManifestOptions::default(), records).unwrap_err();
    assert!(matches!(err, Error::Corruption(_)));
}
