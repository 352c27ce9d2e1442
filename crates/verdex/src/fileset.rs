//! The per-folder facade: batch ingest, iterators, size queries.
//!
//! A `FileSet` serializes every mutator for its folder behind one mutex;
//! different folders are independent. Readers run against engine snapshots
//! and see either the pre- or post-commit state of a batch, never a mix.
//!
//! On open the set reconciles itself with the store: version-list entries
//! whose device record went missing are dropped (the per-file version lists
//! are authoritative) and the size counters are rebuilt by a full scan.

use std::collections::HashMap;
use std::iter::Peekable;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use verdex_error::Result;
use verdex_kv::{KvEngine, KvSnapshot};
use verdex_types::wire::{
    decode_file_info, decode_file_info_truncated, decode_version_list, encode_version_list,
};
use verdex_types::{
    Counters, DeviceId, FileFlags, FileInfo, FileLike, TruncatedFileInfo, VersionList,
};

use crate::blockmap::BlockMap;
use crate::keys::{
    device_key_device, device_key_into, device_key_name, global_key_into, global_key_name,
    KEY_TYPE_DEVICE,
};
use crate::sizes::SizeTracker;
use crate::transaction::{ReadOnlyTransaction, ReadWriteTransaction};
use crate::Index;

#[derive(Debug, Default)]
struct Inner {
    sizes: SizeTracker,
    local_version: HashMap<DeviceId, i64>,
}

/// The version index of one folder.
pub struct FileSet<E: KvEngine> {
    folder: String,
    folder_idx: u32,
    local_device: DeviceId,
    index: Arc<Index<E>>,
    inner: Mutex<Inner>,
}

impl<E: KvEngine> FileSet<E> {
    /// Open the file set for `folder`, reconciling version lists and
    /// rebuilding size counters from the store.
    pub fn new(index: Arc<Index<E>>, folder: &str, local_device: DeviceId) -> Result<Self> {
        let folder_idx = index.folder_index(folder)?;
        let set = Self {
            folder: folder.to_owned(),
            folder_idx,
            local_device,
            index,
            inner: Mutex::new(Inner::default()),
        };
        set.startup_scan()?;
        Ok(set)
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Drop dangling version-list entries, rebuild `global`/`insync`
    /// counters, and seed the per-device local version high-water marks.
    fn startup_scan(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.sizes.clear();
        inner.local_version.clear();

        let mut txn = ReadWriteTransaction::new(&self.index);
        let mut global_prefix = Vec::new();
        global_key_into(&mut global_prefix, self.folder_idx, b"");

        let entries: Vec<(Vec<u8>, Vec<u8>)> = txn
            .reads()
            .snap
            .iter_prefix(&global_prefix)
            .collect();
        for (key, value) in entries {
            let list = decode_version_list(&value).expect("corrupt version list");
            let name = global_key_name(&key).to_vec();

            let mut kept = VersionList::default();
            for v in &list.versions {
                if txn.reads().get_file_truncated(self.folder_idx, &v.device, &name)?.is_some() {
                    kept.versions.push(v.clone());
                }
            }

            if kept.versions.len() != list.versions.len() {
                debug!(
                    folder = %self.folder,
                    name = %String::from_utf8_lossy(&name),
                    dropped = list.versions.len() - kept.versions.len(),
                    "dropped dangling version list entries",
                );
                if kept.is_empty() {
                    txn.delete(&key);
                } else {
                    let mut buf = Vec::new();
                    encode_version_list(&kept, &mut buf);
                    txn.put(&key, &buf);
                }
                txn.check_flush()?;
            }

            if let Some(head) = kept.head() {
                let head_file = txn
                    .reads()
                    .get_file_truncated(self.folder_idx, &head.device, &name)?
                    .expect("version list head references missing file record");
                inner.sizes.global_add(&head_file);
                for v in &kept.versions {
                    if !v.version.equal(&head.version) {
                        break;
                    }
                    inner.sizes.insync_add(&v.device, &head_file);
                }
            }
        }
        txn.commit()?;

        let ro = ReadOnlyTransaction::new(&self.index);
        let mut device_prefix = vec![KEY_TYPE_DEVICE];
        device_prefix.extend_from_slice(&self.folder_idx.to_be_bytes());
        for (key, value) in ro.snap.iter_prefix(&device_prefix) {
            let device = device_key_device(&key);
            let f = decode_file_info_truncated(&value).expect("corrupt file record");
            let lv = inner.local_version.entry(device).or_insert(0);
            if f.local_version > *lv {
                *lv = f.local_version;
            }
        }

        Ok(())
    }

    /// Ingest a batch of records for `device`. Unchanged records (same
    /// version, same flags) are skipped; invalid records are inserted but
    /// withdrawn from the global list.
    pub fn update(&self, device: &DeviceId, files: &[FileInfo]) -> Result<()> {
        debug!(folder = %self.folder, device = ?device, files = files.len(), "update");
        let mut inner = self.inner.lock();

        if *device == self.local_device {
            self.update_local_blocks(files)?;
        }

        let mut txn = ReadWriteTransaction::new(&self.index);
        let mut max_local = 0i64;
        for f in files {
            if let Some(existing) =
                txn.reads()
                    .get_file_truncated(self.folder_idx, device, f.name.as_bytes())?
            {
                if existing.version.equal(&f.version) && existing.flags == f.flags {
                    continue;
                }
            }
            let lv = txn.insert_file(self.folder_idx, device, f)?;
            max_local = max_local.max(lv);
            if f.is_invalid() {
                txn.remove_from_global(self.folder_idx, device, f.name.as_bytes(), &mut inner.sizes)?;
            } else {
                txn.update_global(self.folder_idx, device, f, &mut inner.sizes)?;
            }
            txn.check_flush()?;
        }
        txn.commit()?;

        self.finish_mutation(&mut inner, device, max_local);
        Ok(())
    }

    /// Replace `device`'s entire set with `files`: records absent from the
    /// slice are removed, from the device index and from the global lists.
    pub fn replace(&self, device: &DeviceId, files: &[FileInfo]) -> Result<()> {
        debug!(folder = %self.folder, device = ?device, files = files.len(), "replace");
        let mut inner = self.inner.lock();

        if *device == self.local_device {
            BlockMap::new(&self.index, self.folder_idx).drop_all()?;
            BlockMap::new(&self.index, self.folder_idx).add(files)?;
        }

        let folder_idx = self.folder_idx;
        let max_local = self.generic_replace(
            &mut inner.sizes,
            device,
            files,
            |txn, device, name, _value, sizes| {
                txn.remove_from_global(folder_idx, device, name, sizes)?;
                let mut key = Vec::new();
                device_key_into(&mut key, folder_idx, device, name);
                txn.delete(&key);
                Ok(0)
            },
        )?;

        self.finish_mutation(&mut inner, device, max_local);
        Ok(())
    }

    /// Like [`replace`](Self::replace), but records absent from the slice
    /// are re-inserted as deleted, with the version vector bumped for
    /// `short_id` and a fresh local version, so the deletion propagates.
    pub fn replace_with_delete(
        &self,
        device: &DeviceId,
        files: &[FileInfo],
        short_id: u64,
    ) -> Result<()> {
        debug!(folder = %self.folder, device = ?device, files = files.len(), "replace with delete");
        let mut inner = self.inner.lock();

        if *device == self.local_device {
            BlockMap::new(&self.index, self.folder_idx).drop_all()?;
            BlockMap::new(&self.index, self.folder_idx).add(files)?;
        }

        let folder_idx = self.folder_idx;
        let max_local = self.generic_replace(
            &mut inner.sizes,
            device,
            files,
            |txn, device, name, value, sizes| {
                let old = decode_file_info(value).expect("corrupt file record");
                if old.is_deleted() {
                    return Ok(0);
                }
                let mut tombstone = old;
                tombstone.flags |= FileFlags::DELETED;
                tombstone.blocks.clear();
                tombstone.version.update(short_id);
                tombstone.local_version = 0;
                let lv = txn.insert_file(folder_idx, device, &tombstone)?;
                txn.update_global(folder_idx, device, &tombstone, sizes)?;
                Ok(lv)
            },
        )?;

        self.finish_mutation(&mut inner, device, max_local);
        Ok(())
    }

    /// Scan-then-diff: walk the device's stored records and the sorted
    /// input in name order together, inserting added or changed files and
    /// applying `on_removed` to stored records absent from the input.
    fn generic_replace(
        &self,
        sizes: &mut SizeTracker,
        device: &DeviceId,
        files: &[FileInfo],
        mut on_removed: impl FnMut(
            &mut ReadWriteTransaction<'_, E>,
            &DeviceId,
            &[u8],
            &[u8],
            &mut SizeTracker,
        ) -> Result<i64>,
    ) -> Result<i64> {
        let mut sorted: Vec<&FileInfo> = files.iter().collect();
        sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        let ro = ReadOnlyTransaction::new(&self.index);
        let mut txn = ReadWriteTransaction::new(&self.index);

        let mut prefix = Vec::new();
        device_key_into(&mut prefix, self.folder_idx, device, b"");
        let mut stored = ro.snap.iter_prefix(&prefix).peekable();

        let mut max_local = 0i64;

        for f in sorted {
            // Stored names before the next input name were removed.
            max_local = max_local.max(self.drain_removed_until(
                &mut stored,
                Some(f.name.as_bytes()),
                &mut txn,
                device,
                sizes,
                &mut on_removed,
            )?);

            let existing = match stored.peek() {
                Some((key, value)) if device_key_name(key) == f.name.as_bytes() => {
                    let e = decode_file_info_truncated(value).expect("corrupt file record");
                    stored.next();
                    Some(e)
                }
                _ => None,
            };

            if let Some(e) = existing {
                if e.version.equal(&f.version) && e.flags == f.flags {
                    continue;
                }
            }

            let lv = txn.insert_file(self.folder_idx, device, f)?;
            max_local = max_local.max(lv);
            if f.is_invalid() {
                txn.remove_from_global(self.folder_idx, device, f.name.as_bytes(), sizes)?;
            } else {
                txn.update_global(self.folder_idx, device, f, sizes)?;
            }
            txn.check_flush()?;
        }

        // Everything left in the store was removed.
        max_local = max_local.max(self.drain_removed_until(
            &mut stored,
            None,
            &mut txn,
            device,
            sizes,
            &mut on_removed,
        )?);

        txn.commit()?;
        Ok(max_local)
    }

    fn drain_removed_until(
        &self,
        stored: &mut Peekable<verdex_kv::KvIter<'_>>,
        until: Option<&[u8]>,
        txn: &mut ReadWriteTransaction<'_, E>,
        device: &DeviceId,
        sizes: &mut SizeTracker,
        on_removed: &mut impl FnMut(
            &mut ReadWriteTransaction<'_, E>,
            &DeviceId,
            &[u8],
            &[u8],
            &mut SizeTracker,
        ) -> Result<i64>,
    ) -> Result<i64> {
        let mut max_local = 0i64;
        while let Some((key, _)) = stored.peek() {
            let name = device_key_name(key);
            if until.is_some_and(|limit| name >= limit) {
                break;
            }
            let (key, value) = stored.next().unwrap();
            let name = device_key_name(&key).to_vec();
            let lv = on_removed(txn, device, &name, &value, sizes)?;
            max_local = max_local.max(lv);
            txn.check_flush()?;
        }
        Ok(max_local)
    }

    /// Maintain the local block map for an incremental update: discard the
    /// entries of records about to change, then insert the new entries.
    fn update_local_blocks(&self, files: &[FileInfo]) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut discards = Vec::new();
        let mut updates = Vec::new();
        for f in files {
            match ro.get_file(self.folder_idx, &self.local_device, f.name.as_bytes())? {
                Some(existing) if existing.version.equal(&f.version) => continue,
                Some(existing) => {
                    discards.push(existing);
                    updates.push(f.clone());
                }
                None => updates.push(f.clone()),
            }
        }
        BlockMap::new(&self.index, self.folder_idx).update(&discards, &updates)
    }

    fn finish_mutation(&self, inner: &mut Inner, device: &DeviceId, max_local: i64) {
        let lv = inner.local_version.entry(*device).or_insert(0);
        if max_local > *lv {
            *lv = max_local;
        }
        inner.sizes.invalidate_need();
    }

    // --- Lookups ---

    /// One device's record of one file.
    pub fn get(&self, device: &DeviceId, name: &str) -> Result<Option<FileInfo>> {
        let ro = ReadOnlyTransaction::new(&self.index);
        ro.get_file(self.folder_idx, device, name.as_bytes())
    }

    /// The globally authoritative record of one file.
    pub fn get_global(&self, name: &str) -> Result<Option<FileInfo>> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let Some(vl) = ro.get_version_list(self.folder_idx, name.as_bytes())? else {
            return Ok(None);
        };
        let head = vl.head().expect("empty version list was persisted");
        let f = ro
            .get_file(self.folder_idx, &head.device, name.as_bytes())?
            .expect("version list head references missing file record");
        Ok(Some(f))
    }

    /// The devices holding the global version of `name`: the head cohort of
    /// its version list.
    pub fn availability(&self, name: &str) -> Result<Vec<DeviceId>> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let Some(vl) = ro.get_version_list(self.folder_idx, name.as_bytes())? else {
            return Ok(Vec::new());
        };
        let mut devices = Vec::new();
        if let Some(head) = vl.head() {
            for v in &vl.versions {
                if !v.version.equal(&head.version) {
                    break;
                }
                devices.push(v.device);
            }
        }
        Ok(devices)
    }

    /// The highest local version observed for `device` in this folder.
    pub fn local_version(&self, device: &DeviceId) -> i64 {
        self.inner
            .lock()
            .local_version
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    // --- Iterators ---
    //
    // Callbacks return true to continue, false to stop early. Iteration
    // runs against one snapshot.

    /// Every record `device` holds.
    pub fn with_have(
        &self,
        device: &DeviceId,
        mut f: impl FnMut(&FileInfo) -> bool,
    ) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut prefix = Vec::new();
        device_key_into(&mut prefix, self.folder_idx, device, b"");
        for (_, value) in ro.snap.iter_prefix(&prefix) {
            let fi = decode_file_info(&value).expect("corrupt file record");
            if !f(&fi) {
                break;
            }
        }
        Ok(())
    }

    /// Every record `device` holds, without blocks.
    pub fn with_have_truncated(
        &self,
        device: &DeviceId,
        f: impl FnMut(&TruncatedFileInfo) -> bool,
    ) -> Result<()> {
        self.with_prefixed_have_truncated(device, "", f)
    }

    /// `device`'s records under a name prefix, without blocks.
    pub fn with_prefixed_have_truncated(
        &self,
        device: &DeviceId,
        prefix: &str,
        mut f: impl FnMut(&TruncatedFileInfo) -> bool,
    ) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut key_prefix = Vec::new();
        device_key_into(&mut key_prefix, self.folder_idx, device, prefix.as_bytes());
        for (_, value) in ro.snap.iter_prefix(&key_prefix) {
            let fi = decode_file_info_truncated(&value).expect("corrupt file record");
            if !f(&fi) {
                break;
            }
        }
        Ok(())
    }

    /// The globally authoritative record of every file.
    pub fn with_global(&self, mut f: impl FnMut(&FileInfo) -> bool) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut prefix = Vec::new();
        global_key_into(&mut prefix, self.folder_idx, b"");
        for (key, value) in ro.snap.iter_prefix(&prefix) {
            let vl = decode_version_list(&value).expect("corrupt version list");
            let head = vl.head().expect("empty version list was persisted");
            let name = global_key_name(&key);
            let fi = ro
                .get_file(self.folder_idx, &head.device, name)?
                .expect("version list head references missing file record");
            if !f(&fi) {
                break;
            }
        }
        Ok(())
    }

    /// Like [`with_global`](Self::with_global) without blocks.
    pub fn with_global_truncated(
        &self,
        mut f: impl FnMut(&TruncatedFileInfo) -> bool,
    ) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut prefix = Vec::new();
        global_key_into(&mut prefix, self.folder_idx, b"");
        for (key, value) in ro.snap.iter_prefix(&prefix) {
            let vl = decode_version_list(&value).expect("corrupt version list");
            let head = vl.head().expect("empty version list was persisted");
            let name = global_key_name(&key);
            let fi = ro
                .get_file_truncated(self.folder_idx, &head.device, name)?
                .expect("version list head references missing file record");
            if !f(&fi) {
                break;
            }
        }
        Ok(())
    }

    /// The global records `device` still needs: non-invalid globals the
    /// device does not hold at head version, skipping deletes of files it
    /// never had.
    pub fn with_need(
        &self,
        device: &DeviceId,
        mut f: impl FnMut(&FileInfo) -> bool,
    ) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut prefix = Vec::new();
        global_key_into(&mut prefix, self.folder_idx, b"");

        for (key, value) in ro.snap.iter_prefix(&prefix) {
            let vl = decode_version_list(&value).expect("corrupt version list");
            let head = vl.head().expect("empty version list was persisted");
            let Some((have, true)) = need_status(&vl, device) else {
                continue;
            };

            let name = global_key_name(&key);
            let gf = ro
                .get_file(self.folder_idx, &head.device, name)?
                .expect("version list head references missing file record");
            if gf.is_invalid() {
                // Marked unusable for whatever reason.
                continue;
            }
            if gf.is_deleted() && !have {
                // No point fetching a delete of a file we never had.
                continue;
            }
            if !f(&gf) {
                break;
            }
        }
        Ok(())
    }

    /// Like [`with_need`](Self::with_need) without blocks.
    pub fn with_need_truncated(
        &self,
        device: &DeviceId,
        mut f: impl FnMut(&TruncatedFileInfo) -> bool,
    ) -> Result<()> {
        let ro = ReadOnlyTransaction::new(&self.index);
        let mut prefix = Vec::new();
        global_key_into(&mut prefix, self.folder_idx, b"");

        for (key, value) in ro.snap.iter_prefix(&prefix) {
            let vl = decode_version_list(&value).expect("corrupt version list");
            let head = vl.head().expect("empty version list was persisted");
            let Some((have, true)) = need_status(&vl, device) else {
                continue;
            };

            let name = global_key_name(&key);
            let gf = ro
                .get_file_truncated(self.folder_idx, &head.device, name)?
                .expect("version list head references missing file record");
            if gf.is_invalid() {
                continue;
            }
            if gf.is_deleted() && !have {
                continue;
            }
            if !f(&gf) {
                break;
            }
        }
        Ok(())
    }

    // --- Sizes ---

    /// Totals over the global set.
    pub fn global_size(&self) -> Counters {
        self.inner.lock().sizes.global()
    }

    /// Totals over the files `device` holds at head version.
    pub fn insync_size(&self, device: &DeviceId) -> Counters {
        self.inner.lock().sizes.insync(device)
    }

    /// Totals over the globals `device` still needs. Computed from the
    /// version lists and cached until the next mutation.
    pub fn need_size(&self, device: &DeviceId) -> Result<Counters> {
        if let Some(cached) = self.inner.lock().sizes.need_cached(device) {
            return Ok(cached);
        }
        let mut counters = Counters::default();
        self.with_need_truncated(device, |f| {
            counters.add_file(f);
            true
        })?;
        self.inner.lock().sizes.cache_need(*device, counters);
        Ok(counters)
    }
}

/// Whether `device` must fetch this file: returns `(has an entry, must
/// fetch)`. A device must fetch when it is missing from the list entirely or
/// holds something other than the head version.
fn need_status(vl: &VersionList, device: &DeviceId) -> Option<(bool, bool)> {
    let head = vl.head()?;
    let mut have = false;
    let mut need = false;
    for v in &vl.versions {
        if v.device == *device {
            have = true;
            need = !v.version.equal(&head.version);
            break;
        }
    }
    Some((have, need || !have))
}
