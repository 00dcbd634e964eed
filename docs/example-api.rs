// Example API Usage - How the engine drives the manifest
// This file shows how a storage engine uses the version set

use std::sync::Arc;

use lsm_manifest::{
    BytewiseComparator, Comparator, DiskFileNum, Error, FileBacking, FileMetadata, InternalKey,
    KeyKind, ManifestOptions, VersionEdit, VersionSet,
};

fn main() -> Result<(), Error> {
    let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator::new());

    // ===========================================
    // Fresh database
    // ===========================================

    let vs = VersionSet::new(ManifestOptions::default().flush_split_bytes(4 << 20))?;

    // ===========================================
    // Flush: one new L0 table
    // ===========================================

    let mut meta = FileMetadata::new(vs.new_file_num(), 8 << 20).with_seq_nums(1, 5000);
    meta.extend_point_key_bounds(
        cmp.as_ref(),
        InternalKey::new("apple", 4000, KeyKind::Set),
        InternalKey::new("melon", 12, KeyKind::Delete),
    );
    meta.init_physical_backing();
    let flushed = Arc::new(meta);

    let mut ve = VersionEdit::new();
    ve.last_seq_num = 5000;
    ve.add_file(0, flushed.clone());
    vs.log_and_apply(&mut ve)?;

    // ===========================================
    // Reads pin a version
    // ===========================================

    let v = vs.current();
    let l0 = v.overlaps(0, cmp.as_ref(), b"banana", b"cherry", false)?;
    assert_eq!(l0.len(), 1);
    println!("read amp: {}", v.l0_sublevels().map_or(0, |s| s.read_amplification()));

    // ===========================================
    // Ingest a virtual table over an existing object
    // ===========================================

    let backing = Arc::new(FileBacking::new(DiskFileNum(900), 64 << 20));
    let mut virt = FileMetadata::new(vs.new_file_num(), 1 << 20)
        .with_seq_nums(0, 0)
        .with_virtual();
    virt.extend_point_key_bounds(
        cmp.as_ref(),
        InternalKey::new("x", 0, KeyKind::Set),
        InternalKey::new("z", 0, KeyKind::Set),
    );
    virt.set_backing(backing.clone());

    let mut ve = VersionEdit::new();
    ve.created_backing_tables.push(backing);
    ve.add_file(6, Arc::new(virt));
    vs.log_and_apply(&mut ve)?;

    // ===========================================
    // Compaction: move the flushed table down
    // ===========================================

    let mut ve = VersionEdit::new();
    ve.delete_file(0, flushed.clone());
    ve.add_file(1, flushed);
    vs.log_and_apply(&mut ve)?;

    // The pinned version still sees the file in L0.
    assert_eq!(v.level(0).len(), 1);
    drop(v);

    // Backings no version references any more can be deleted from disk.
    for backing in vs.take_obsolete_tables() {
        println!("delete {}", backing.disk_file_num);
    }

    // ===========================================
    // Restart
    // ===========================================

    let records = vs.manifest_records();
    let recovered = VersionSet::recover(ManifestOptions::default(), records)?;
    println!("{}", recovered.current().debug_string(lsm_manifest::default_format_key));

    Ok(())
}
