//! Snapshot/batch transactions and the conflict-resolution core.
//!
//! A read-only transaction is a consistent snapshot of the engine. A
//! read-write transaction adds a mutation batch that is applied atomically
//! on commit, or earlier in chunks when it outgrows the flush threshold;
//! callers accommodate the chunking by keeping each file record
//! self-consistent.
//!
//! Reads always go to the snapshot taken at open, never to the pending
//! batch. `update_global` relies on this: while a file's device record is
//! being replaced in the batch, the size fixups still see the previous
//! record, which is exactly the state they account against.

use tracing::debug;
use verdex_error::Result;
use verdex_kv::{KvEngine, KvSnapshot, WriteBatch};
use verdex_types::wire::{
    decode_file_info, decode_file_info_truncated, decode_version_list, encode_file_info,
    encode_version_list,
};
use verdex_types::{DeviceId, FileInfo, FileVersion, Ordering, TruncatedFileInfo, VersionList};

use crate::keys::{device_key_into, global_key_into};
use crate::sizes::SizeTracker;
use crate::Index;

/// Read-write batches are flushed once they exceed this many bytes.
pub(crate) const BATCH_FLUSH_SIZE: usize = 64 << 10;

/// A read-only transaction: a database snapshot.
pub struct ReadOnlyTransaction<'a, E: KvEngine> {
    pub(crate) snap: E::Snapshot,
    pub(crate) index: &'a Index<E>,
}

impl<'a, E: KvEngine> ReadOnlyTransaction<'a, E> {
    pub fn new(index: &'a Index<E>) -> Self {
        Self {
            snap: index.engine().snapshot(),
            index,
        }
    }

    /// Fetch one device's record of one file.
    ///
    /// Panics if the stored record does not decode; that is corruption the
    /// index cannot recover from.
    pub fn get_file(
        &self,
        folder: u32,
        device: &DeviceId,
        name: &[u8],
    ) -> Result<Option<FileInfo>> {
        let mut key = Vec::new();
        device_key_into(&mut key, folder, device, name);
        Ok(self
            .snap
            .get(&key)?
            .map(|bytes| decode_file_info(&bytes).expect("corrupt file record")))
    }

    /// Like [`get_file`](Self::get_file) but without materializing blocks.
    pub fn get_file_truncated(
        &self,
        folder: u32,
        device: &DeviceId,
        name: &[u8],
    ) -> Result<Option<TruncatedFileInfo>> {
        let mut key = Vec::new();
        device_key_into(&mut key, folder, device, name);
        Ok(self
            .snap
            .get(&key)?
            .map(|bytes| decode_file_info_truncated(&bytes).expect("corrupt file record")))
    }

    /// Fetch the version list of one file.
    pub fn get_version_list(&self, folder: u32, name: &[u8]) -> Result<Option<VersionList>> {
        let mut key = Vec::new();
        global_key_into(&mut key, folder, name);
        Ok(self
            .snap
            .get(&key)?
            .map(|bytes| decode_version_list(&bytes).expect("corrupt version list")))
    }
}

/// A read-write transaction: a snapshot plus a mutation batch.
pub struct ReadWriteTransaction<'a, E: KvEngine> {
    ro: ReadOnlyTransaction<'a, E>,
    batch: WriteBatch,
    key_buf: Vec<u8>,
    val_buf: Vec<u8>,
}

impl<'a, E: KvEngine> ReadWriteTransaction<'a, E> {
    pub fn new(index: &'a Index<E>) -> Self {
        Self {
            ro: ReadOnlyTransaction::new(index),
            batch: WriteBatch::new(),
            key_buf: Vec::new(),
            val_buf: Vec::new(),
        }
    }

    pub fn reads(&self) -> &ReadOnlyTransaction<'a, E> {
        &self.ro
    }

    /// Queue a raw put in the batch.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.batch.put(key, value);
    }

    /// Queue a raw delete in the batch.
    pub fn delete(&mut self, key: &[u8]) {
        self.batch.delete(key);
    }

    /// Apply the batch atomically. Dropping without committing discards it.
    pub fn commit(mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.batch);
        self.ro.index.engine().write(batch)
    }

    /// Flush the batch early once it has outgrown the threshold. All-or-
    /// nothing semantics are traded for bounded memory.
    pub fn check_flush(&mut self) -> Result<()> {
        if self.batch.size_bytes() > BATCH_FLUSH_SIZE {
            let batch = std::mem::take(&mut self.batch);
            self.ro.index.engine().write(batch)?;
        }
        Ok(())
    }

    /// Write `file` as `device`'s record, stamping a fresh tick as its local
    /// version if it does not carry one. Returns the local version written.
    /// Touches neither the version list nor any counter.
    pub fn insert_file(&mut self, folder: u32, device: &DeviceId, file: &FileInfo) -> Result<i64> {
        debug!(folder, device = ?device, name = %file.name, "insert file");

        let local_version = if file.local_version == 0 {
            self.ro.index.clock().tick()
        } else {
            file.local_version
        };

        device_key_into(&mut self.key_buf, folder, device, file.name.as_bytes());
        if local_version == file.local_version {
            encode_file_info(file, &mut self.val_buf);
        } else {
            let mut stamped = file.clone();
            stamped.local_version = local_version;
            encode_file_info(&stamped, &mut self.val_buf);
        }
        self.batch.put(&self.key_buf, &self.val_buf);

        Ok(local_version)
    }

    /// Add `device`'s claim of `file` to the file's version list, keeping
    /// the list ordered newest first. Returns false, without touching any
    /// counter, when the list already carries exactly this version for the
    /// device.
    pub fn update_global(
        &mut self,
        folder: u32,
        device: &DeviceId,
        file: &FileInfo,
        sizes: &mut SizeTracker,
    ) -> Result<bool> {
        debug!(
            folder,
            device = ?device,
            name = %file.name,
            version = %file.version,
            "update global",
        );

        global_key_into(&mut self.key_buf, folder, file.name.as_bytes());
        let old_list = match self.ro.snap.get(&self.key_buf)? {
            Some(bytes) => decode_version_list(&bytes).expect("corrupt version list"),
            None => VersionList::default(),
        };
        let mut new_list = old_list.clone();

        // Drop the device's current entry so the new one can be placed.
        if let Some(i) = new_list.find(device) {
            if new_list.versions[i].version.equal(&file.version) {
                // The list already contains exactly the entry we were going
                // to add.
                return Ok(false);
            }
            new_list.versions.remove(i);
        }

        let nv = FileVersion {
            device: *device,
            version: file.version.clone(),
        };

        // Find the insertion point. The front of the list is the newest,
        // the global.
        let mut inserted = false;
        for i in 0..new_list.versions.len() {
            match new_list.versions[i].version.compare(&file.version) {
                Ordering::Equal | Ordering::Lesser => {
                    // The version at this point is equal to or older than
                    // ours; we go in front of it.
                    new_list.versions.insert(i, nv.clone());
                    inserted = true;
                    break;
                }
                Ordering::ConcurrentLesser | Ordering::ConcurrentGreater => {
                    // A conflict. The actual file metadata decides who wins;
                    // the comparison direction alone only reflects the
                    // device ids in the vectors.
                    let other = self
                        .ro
                        .get_file(folder, &new_list.versions[i].device, file.name.as_bytes())?
                        .unwrap_or_else(|| {
                            panic!(
                                "version list for {:?} references missing record of {:?}",
                                file.name, new_list.versions[i].device
                            )
                        });
                    if file.wins_conflict(&other) {
                        new_list.versions.insert(i, nv.clone());
                        inserted = true;
                        break;
                    }
                }
                Ordering::Greater => {}
            }
        }
        if !inserted {
            new_list.versions.push(nv);
        }

        debug!(list = %new_list, "new global after update");
        encode_version_list(&new_list, &mut self.val_buf);
        self.batch.put(&self.key_buf, &self.val_buf);

        self.update_global_size_fixup(&old_list, &new_list, folder, device, file, sizes)?;
        Ok(true)
    }

    /// Repair `global` and `insync` incrementally after `update_global`
    /// rewrote a version list.
    fn update_global_size_fixup(
        &mut self,
        old_v: &VersionList,
        new_v: &VersionList,
        folder: u32,
        device: &DeviceId,
        file: &FileInfo,
        sizes: &mut SizeTracker,
    ) -> Result<()> {
        if old_v.is_empty() {
            // A new file. It is in sync with itself by definition.
            sizes.insync_add(device, file);
            sizes.global_add(file);
            return Ok(());
        }

        let old_head = &old_v.versions[0].version;
        let new_head = &new_v.versions[0].version;

        if old_head.equal(new_head) {
            // The global version did not change; only the writer's own
            // standing may have.
            if old_head.equal(&file.version) {
                sizes.insync_add(device, file);
            }
            return Ok(());
        }

        let old_global = self
            .ro
            .get_file(folder, &old_v.versions[0].device, file.name.as_bytes())?
            .unwrap_or_else(|| {
                panic!(
                    "version list head references missing record of {:?}",
                    old_v.versions[0].device
                )
            });

        // Devices previously accounted in sync form the head cohort of the
        // old list. Deduct those, then credit the new head cohort.
        for v in &old_v.versions {
            if !v.version.equal(old_head) {
                break;
            }
            sizes.insync_remove(&v.device, &old_global);
        }
        for v in &new_v.versions {
            if !v.version.equal(new_head) {
                break;
            }
            sizes.insync_add(&v.device, file);
        }

        sizes.global_remove(&old_global);
        sizes.global_add(file);
        Ok(())
    }

    /// Remove `device`'s entry from the file's version list, deleting the
    /// list entirely when it empties. Returns silently when the list is
    /// absent: an insert of an invalid file never created it.
    pub fn remove_from_global(
        &mut self,
        folder: u32,
        device: &DeviceId,
        name: &[u8],
        sizes: &mut SizeTracker,
    ) -> Result<()> {
        debug!(
            folder,
            device = ?device,
            name = %String::from_utf8_lossy(name),
            "remove from global",
        );

        global_key_into(&mut self.key_buf, folder, name);
        let Some(bytes) = self.ro.snap.get(&self.key_buf)? else {
            return Ok(());
        };
        let old_list = decode_version_list(&bytes).expect("corrupt version list");
        let mut new_list = old_list.clone();
        if let Some(i) = new_list.find(device) {
            new_list.versions.remove(i);
        }

        if new_list.is_empty() {
            self.batch.delete(&self.key_buf);
        } else {
            debug!(list = %new_list, "new global after remove");
            encode_version_list(&new_list, &mut self.val_buf);
            self.batch.put(&self.key_buf, &self.val_buf);
        }

        self.remove_global_size_fixup(&old_list, &new_list, folder, device, name, sizes)
    }

    /// Mirror image of the update fixup.
    fn remove_global_size_fixup(
        &mut self,
        old_v: &VersionList,
        new_v: &VersionList,
        folder: u32,
        device: &DeviceId,
        name: &[u8],
        sizes: &mut SizeTracker,
    ) -> Result<()> {
        if old_v.is_empty() {
            return Ok(());
        }

        let old_global = self
            .ro
            .get_file(folder, &old_v.versions[0].device, name)?
            .unwrap_or_else(|| {
                panic!(
                    "version list head references missing record of {:?}",
                    old_v.versions[0].device
                )
            });

        if new_v.is_empty() {
            // The last version went away.
            sizes.insync_remove(device, &old_global);
            sizes.global_remove(&old_global);
            return Ok(());
        }

        let old_head = &old_v.versions[0].version;
        let new_head = &new_v.versions[0].version;
        let removed_version = old_v
            .versions
            .iter()
            .find(|v| v.device == *device)
            .map(|v| &v.version);

        if old_head.equal(new_head) {
            // The global did not change; the removed entry was in sync only
            // if it held the head version.
            if removed_version.is_some_and(|rv| rv.equal(old_head)) {
                sizes.insync_remove(device, &old_global);
            }
            return Ok(());
        }

        for v in &old_v.versions {
            if !v.version.equal(old_head) {
                break;
            }
            sizes.insync_remove(&v.device, &old_global);
        }

        let new_global = self
            .ro
            .get_file(folder, &new_v.versions[0].device, name)?
            .unwrap_or_else(|| {
                panic!(
                    "promoted version list head references missing record of {:?}",
                    new_v.versions[0].device
                )
            });
        for v in &new_v.versions {
            if !v.version.equal(new_head) {
                break;
            }
            sizes.insync_add(&v.device, &new_global);
        }

        sizes.global_remove(&old_global);
        sizes.global_add(&new_global);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdex_kv::MemoryEngine;
    use verdex_types::{Block, Counter, FileFlags, Vector};

    fn index() -> Index<MemoryEngine> {
        let counter = std::sync::atomic::AtomicI64::new(0);
        Index::with_clock(
            MemoryEngine::new(),
            crate::Clock::with_source(Box::new(move || {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
            })),
        )
        .unwrap()
    }

    fn dev(seed: u8) -> DeviceId {
        DeviceId::new([seed; 32])
    }

    fn file(name: &str, size: i32, version: &[(u64, u64)]) -> FileInfo {
        FileInfo {
            name: name.into(),
            flags: FileFlags::empty(),
            modified: 0,
            version: Vector::from_counters(
                version
                    .iter()
                    .map(|&(id, value)| Counter { id, value })
                    .collect(),
            ),
            local_version: 0,
            blocks: vec![Block {
                offset: 0,
                size,
                hash: [0xaa; 32],
            }],
        }
    }

    fn apply(index: &Index<MemoryEngine>, device: &DeviceId, f: &FileInfo, sizes: &mut SizeTracker) -> bool {
        let mut txn = ReadWriteTransaction::new(index);
        txn.insert_file(0, device, f).unwrap();
        let changed = txn.update_global(0, device, f, sizes).unwrap();
        txn.commit().unwrap();
        changed
    }

    #[test]
    fn insert_assigns_tick_when_unset() {
        let index = index();
        let mut txn = ReadWriteTransaction::new(&index);
        let lv = txn.insert_file(0, &dev(1), &file("x", 10, &[(1, 1)])).unwrap();
        assert!(lv > 0);
        txn.commit().unwrap();

        let ro = ReadOnlyTransaction::new(&index);
        let stored = ro.get_file(0, &dev(1), b"x").unwrap().unwrap();
        assert_eq!(stored.local_version, lv);
    }

    #[test]
    fn insert_keeps_existing_local_version() {
        let index = index();
        let mut txn = ReadWriteTransaction::new(&index);
        let mut f = file("x", 10, &[(1, 1)]);
        f.local_version = 77;
        assert_eq!(txn.insert_file(0, &dev(1), &f).unwrap(), 77);
    }

    #[test]
    fn fresh_insert_creates_singleton_list() {
        let index = index();
        let mut sizes = SizeTracker::new();
        assert!(apply(&index, &dev(1), &file("x", 100, &[(1, 1)]), &mut sizes));

        let ro = ReadOnlyTransaction::new(&index);
        let vl = ro.get_version_list(0, b"x").unwrap().unwrap();
        assert_eq!(vl.versions.len(), 1);
        assert_eq!(vl.versions[0].device, dev(1));
        assert_eq!(sizes.global().bytes, 100);
        assert_eq!(sizes.insync(&dev(1)).bytes, 100);
    }

    #[test]
    fn same_version_update_returns_false() {
        let index = index();
        let mut sizes = SizeTracker::new();
        let f = file("x", 100, &[(1, 1)]);
        assert!(apply(&index, &dev(1), &f, &mut sizes));
        assert!(!apply(&index, &dev(1), &f, &mut sizes));
        assert_eq!(sizes.global().bytes, 100);
        assert_eq!(sizes.insync(&dev(1)).files, 1);
    }

    #[test]
    fn newer_version_takes_the_head() {
        let index = index();
        let mut sizes = SizeTracker::new();
        apply(&index, &dev(1), &file("x", 100, &[(1, 1)]), &mut sizes);
        apply(&index, &dev(2), &file("x", 100, &[(1, 1), (2, 1)]), &mut sizes);

        let ro = ReadOnlyTransaction::new(&index);
        let vl = ro.get_version_list(0, b"x").unwrap().unwrap();
        assert_eq!(vl.versions[0].device, dev(2));
        assert_eq!(vl.versions[1].device, dev(1));

        assert_eq!(sizes.global().bytes, 100);
        assert_eq!(sizes.insync(&dev(2)).bytes, 100);
        assert_eq!(sizes.insync(&dev(1)).bytes, 0);
    }

    #[test]
    fn concurrent_delete_loses_to_modification() {
        let index = index();
        let mut sizes = SizeTracker::new();
        apply(&index, &dev(1), &file("x", 100, &[(1, 1)]), &mut sizes);

        let mut deleted = file("x", 100, &[(2, 1)]);
        deleted.flags |= FileFlags::DELETED;
        deleted.blocks.clear();
        apply(&index, &dev(2), &deleted, &mut sizes);

        let ro = ReadOnlyTransaction::new(&index);
        let vl = ro.get_version_list(0, b"x").unwrap().unwrap();
        assert_eq!(vl.versions[0].device, dev(1), "surviving copy stays global");
        assert_eq!(vl.versions[1].device, dev(2));
    }

    #[test]
    fn no_duplicate_device_entries() {
        let index = index();
        let mut sizes = SizeTracker::new();
        apply(&index, &dev(1), &file("x", 100, &[(1, 1)]), &mut sizes);
        apply(&index, &dev(1), &file("x", 100, &[(1, 2)]), &mut sizes);
        apply(&index, &dev(1), &file("x", 100, &[(1, 3)]), &mut sizes);

        let ro = ReadOnlyTransaction::new(&index);
        let vl = ro.get_version_list(0, b"x").unwrap().unwrap();
        assert_eq!(vl.versions.len(), 1);
    }

    #[test]
    fn remove_restores_previous_global() {
        let index = index();
        let mut sizes = SizeTracker::new();
        apply(&index, &dev(1), &file("x", 100, &[(1, 1)]), &mut sizes);
        apply(&index, &dev(2), &file("x", 100, &[(1, 1), (2, 1)]), &mut sizes);

        let mut txn = ReadWriteTransaction::new(&index);
        txn.remove_from_global(0, &dev(2), b"x", &mut sizes).unwrap();
        txn.commit().unwrap();

        let ro = ReadOnlyTransaction::new(&index);
        let vl = ro.get_version_list(0, b"x").unwrap().unwrap();
        assert_eq!(vl.versions.len(), 1);
        assert_eq!(vl.versions[0].device, dev(1));

        assert_eq!(sizes.global().bytes, 100);
        assert_eq!(sizes.insync(&dev(1)).bytes, 100);
        assert_eq!(sizes.insync(&dev(2)).bytes, 0);
    }

    #[test]
    fn removing_last_entry_deletes_the_list() {
        let index = index();
        let mut sizes = SizeTracker::new();
        apply(&index, &dev(1), &file("x", 100, &[(1, 1)]), &mut sizes);

        let mut txn = ReadWriteTransaction::new(&index);
        txn.remove_from_global(0, &dev(1), b"x", &mut sizes).unwrap();
        txn.commit().unwrap();

        let ro = ReadOnlyTransaction::new(&index);
        assert!(ro.get_version_list(0, b"x").unwrap().is_none());
        assert_eq!(sizes.global().bytes, 0);
        assert_eq!(sizes.insync(&dev(1)).bytes, 0);
    }

    #[test]
    fn remove_of_absent_list_is_silent() {
        let index = index();
        let mut sizes = SizeTracker::new();
        let mut txn = ReadWriteTransaction::new(&index);
        txn.remove_from_global(0, &dev(1), b"never", &mut sizes).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn uncommitted_batch_leaves_store_untouched() {
        let index = index();
        let mut sizes = SizeTracker::new();
        {
            let mut txn = ReadWriteTransaction::new(&index);
            txn.insert_file(0, &dev(1), &file("x", 10, &[(1, 1)])).unwrap();
            txn.update_global(0, &dev(1), &file("x", 10, &[(1, 1)]), &mut sizes)
                .unwrap();
            // Dropped without commit.
        }
        let ro = ReadOnlyTransaction::new(&index);
        assert!(ro.get_file(0, &dev(1), b"x").unwrap().is_none());
    }

    #[test]
    fn check_flush_writes_large_batches_early() {
        let index = index();
        let mut txn = ReadWriteTransaction::new(&index);
        let big = file("big", 1, &[(1, 1)]);
        let mut written = 0usize;
        while written < super::BATCH_FLUSH_SIZE * 2 {
            let mut f = big.clone();
            f.name = format!("big/{written}");
            written += f.name.len() + 128;
            txn.insert_file(0, &dev(1), &f).unwrap();
            txn.check_flush().unwrap();
        }
        // Some records must already be visible before commit.
        assert!(!index.engine().is_empty());
        txn.commit().unwrap();
    }
}
