//! The inverted block map: content hash to the files holding that block.
//!
//! Keys are `(KEY_TYPE_BLOCK, folder, hash, name)` with the 4-byte
//! big-endian block index as the value, so one prefix scan answers "which
//! files in this folder hold a block with this hash". The map only tracks
//! the local device's blocks; it exists to locate reusable data during
//! pulls.

use tracing::debug;
use verdex_error::Result;
use verdex_kv::{KvEngine, WriteBatch};
use verdex_types::{FileInfo, FileLike};

use crate::keys::{block_key_into, block_key_name, KEY_FOLDER_LEN, KEY_PREFIX_LEN, KEY_TYPE_BLOCK};
use crate::Index;

/// Batches larger than this are written out before the operation finishes.
const MAX_BATCH_SIZE: usize = 256 << 10;

/// The block map of one folder.
#[derive(Debug)]
pub struct BlockMap<'a, E: KvEngine> {
    index: &'a Index<E>,
    folder: u32,
}

impl<'a, E: KvEngine> BlockMap<'a, E> {
    pub fn new(index: &'a Index<E>, folder: u32) -> Self {
        Self { index, folder }
    }

    /// Insert block entries for `files`, skipping directories and deleted
    /// or invalid files, which carry no usable blocks.
    pub fn add(&self, files: &[FileInfo]) -> Result<()> {
        let mut batch = WriteBatch::new();
        let mut key = Vec::new();

        for file in files {
            if batch.size_bytes() > MAX_BATCH_SIZE {
                self.index.engine().write(std::mem::take(&mut batch))?;
            }

            if file.is_directory() || file.is_deleted() || file.is_invalid() {
                continue;
            }

            for (i, block) in file.blocks.iter().enumerate() {
                block_key_into(&mut key, self.folder, &block.hash, file.name.as_bytes());
                batch.put(&key, &(i as u32).to_be_bytes());
            }
        }
        self.index.engine().write(batch)
    }

    /// Replace the per-file block state: first discard every entry the old
    /// records held, then insert the entries of the new records. Deleted or
    /// invalid new records end up with no entries at all.
    pub fn update(&self, old_files: &[FileInfo], new_files: &[FileInfo]) -> Result<()> {
        let mut batch = WriteBatch::new();
        let mut key = Vec::new();

        for file in old_files {
            if batch.size_bytes() > MAX_BATCH_SIZE {
                self.index.engine().write(std::mem::take(&mut batch))?;
            }
            if file.is_directory() {
                continue;
            }
            for block in &file.blocks {
                block_key_into(&mut key, self.folder, &block.hash, file.name.as_bytes());
                batch.delete(&key);
            }
        }

        for file in new_files {
            if batch.size_bytes() > MAX_BATCH_SIZE {
                self.index.engine().write(std::mem::take(&mut batch))?;
            }
            if file.is_directory() || file.is_deleted() || file.is_invalid() {
                continue;
            }
            for (i, block) in file.blocks.iter().enumerate() {
                block_key_into(&mut key, self.folder, &block.hash, file.name.as_bytes());
                batch.put(&key, &(i as u32).to_be_bytes());
            }
        }
        self.index.engine().write(batch)
    }

    /// Remove every entry belonging to `files`.
    pub fn discard(&self, files: &[FileInfo]) -> Result<()> {
        let mut batch = WriteBatch::new();
        let mut key = Vec::new();
        for file in files {
            if batch.size_bytes() > MAX_BATCH_SIZE {
                self.index.engine().write(std::mem::take(&mut batch))?;
            }
            for block in &file.blocks {
                block_key_into(&mut key, self.folder, &block.hash, file.name.as_bytes());
                batch.delete(&key);
            }
        }
        self.index.engine().write(batch)
    }

    /// Remove every block entry of this folder.
    pub fn drop_all(&self) -> Result<()> {
        debug!(folder = self.folder, "drop block map");
        let mut prefix = Vec::with_capacity(KEY_PREFIX_LEN + KEY_FOLDER_LEN);
        prefix.push(KEY_TYPE_BLOCK);
        prefix.extend_from_slice(&self.folder.to_be_bytes());

        let mut batch = WriteBatch::new();
        for (key, _) in self.index.engine().iter_prefix(&prefix) {
            if batch.size_bytes() > MAX_BATCH_SIZE {
                self.index.engine().write(std::mem::take(&mut batch))?;
            }
            batch.delete(&key);
        }
        self.index.engine().write(batch)
    }
}

/// Locates blocks by content hash across folders.
#[derive(Debug)]
pub struct BlockFinder<'a, E: KvEngine> {
    index: &'a Index<E>,
}

impl<'a, E: KvEngine> BlockFinder<'a, E> {
    pub fn new(index: &'a Index<E>) -> Self {
        Self { index }
    }

    /// Call `found` for every `(folder, name, block index)` holding a block
    /// with `hash`, in the given folder order. Stops and returns true as
    /// soon as `found` returns true; false when every candidate was
    /// declined or none existed.
    pub fn iterate(
        &self,
        folders: &[&str],
        hash: &[u8; 32],
        mut found: impl FnMut(&str, &str, u32) -> bool,
    ) -> bool {
        let mut prefix = Vec::new();
        for folder in folders {
            let Some(folder_id) = self.index.folder_idx().lookup(folder.as_bytes()) else {
                continue;
            };
            block_key_into(&mut prefix, folder_id, hash, b"");
            for (key, value) in self.index.engine().iter_prefix(&prefix) {
                let name = block_key_name(&key);
                let name = std::str::from_utf8(name).expect("block key name is not utf-8");
                assert!(value.len() == 4, "malformed block index value");
                let index = u32::from_be_bytes(value.try_into().unwrap());
                if found(folder, name, index) {
                    return true;
                }
            }
        }
        false
    }

    /// Repair one block entry discovered to be wrong during verification:
    /// drop the entry under `old_hash` and write one under `new_hash`,
    /// atomically.
    pub fn fix(
        &self,
        folder: &str,
        name: &str,
        index: u32,
        old_hash: &[u8; 32],
        new_hash: &[u8; 32],
    ) -> Result<()> {
        let folder_id = self.index.folder_idx().id(self.index.engine(), folder.as_bytes())?;
        let mut batch = WriteBatch::new();
        let mut key = Vec::new();
        block_key_into(&mut key, folder_id, old_hash, name.as_bytes());
        batch.delete(&key);
        block_key_into(&mut key, folder_id, new_hash, name.as_bytes());
        batch.put(&key, &index.to_be_bytes());
        self.index.engine().write(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use verdex_kv::MemoryEngine;
    use verdex_types::{Block, FileFlags, Vector};

    fn hash(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn file(name: &str, payloads: &[&[u8]]) -> FileInfo {
        FileInfo {
            name: name.into(),
            flags: FileFlags::empty(),
            modified: 0,
            version: Vector::new(),
            local_version: 1,
            blocks: payloads
                .iter()
                .enumerate()
                .map(|(i, p)| Block {
                    offset: (i as i64) * 128 * 1024,
                    size: p.len() as i32,
                    hash: hash(p),
                })
                .collect(),
        }
    }

    fn setup() -> (Index<MemoryEngine>, u32) {
        let index = Index::open(MemoryEngine::new()).unwrap();
        let folder = index.folder_index("default").unwrap();
        (index, folder)
    }

    fn collect_hits(index: &Index<MemoryEngine>, hash: &[u8; 32]) -> Vec<(String, u32)> {
        let mut hits = Vec::new();
        BlockFinder::new(index).iterate(&["default"], hash, |_, name, idx| {
            hits.push((name.to_owned(), idx));
            false
        });
        hits
    }

    #[test]
    fn add_then_iterate_roundtrip() {
        let (index, folder) = setup();
        let f = file("x", &[b"one", b"two"]);
        BlockMap::new(&index, folder).add(std::slice::from_ref(&f)).unwrap();

        assert_eq!(collect_hits(&index, &hash(b"one")), vec![("x".to_owned(), 0)]);
        assert_eq!(collect_hits(&index, &hash(b"two")), vec![("x".to_owned(), 1)]);
        assert!(collect_hits(&index, &hash(b"three")).is_empty());
    }

    #[test]
    fn iterate_stops_on_first_accepted() {
        let (index, folder) = setup();
        let bm = BlockMap::new(&index, folder);
        bm.add(&[file("a", &[b"shared"]), file("b", &[b"shared"])]).unwrap();

        let mut calls = 0;
        let found = BlockFinder::new(&index).iterate(&["default"], &hash(b"shared"), |_, _, _| {
            calls += 1;
            true
        });
        assert!(found);
        assert_eq!(calls, 1);
    }

    #[test]
    fn deleted_and_invalid_files_are_skipped() {
        let (index, folder) = setup();
        let mut deleted = file("gone", &[b"data"]);
        deleted.flags |= FileFlags::DELETED;
        let mut invalid = file("bad", &[b"data"]);
        invalid.flags |= FileFlags::INVALID;
        let mut dir = file("dir", &[b"data"]);
        dir.flags |= FileFlags::DIRECTORY;

        BlockMap::new(&index, folder).add(&[deleted, invalid, dir]).unwrap();
        assert!(collect_hits(&index, &hash(b"data")).is_empty());
    }

    #[test]
    fn update_discards_stale_hashes() {
        let (index, folder) = setup();
        let bm = BlockMap::new(&index, folder);
        let old = file("x", &[b"old-content"]);
        bm.add(std::slice::from_ref(&old)).unwrap();

        let new = file("x", &[b"new-content"]);
        bm.update(std::slice::from_ref(&old), std::slice::from_ref(&new)).unwrap();

        assert!(collect_hits(&index, &hash(b"old-content")).is_empty());
        assert_eq!(
            collect_hits(&index, &hash(b"new-content")),
            vec![("x".to_owned(), 0)]
        );
    }

    #[test]
    fn update_to_deleted_leaves_no_entries() {
        let (index, folder) = setup();
        let bm = BlockMap::new(&index, folder);
        let old = file("x", &[b"content"]);
        bm.add(std::slice::from_ref(&old)).unwrap();

        let mut gone = old.clone();
        gone.flags |= FileFlags::DELETED;
        bm.update(std::slice::from_ref(&old), std::slice::from_ref(&gone)).unwrap();

        assert!(collect_hits(&index, &hash(b"content")).is_empty());
    }

    #[test]
    fn discard_removes_file_entries() {
        let (index, folder) = setup();
        let bm = BlockMap::new(&index, folder);
        let keep = file("keep", &[b"kept"]);
        let gone = file("gone", &[b"dropped"]);
        bm.add(&[keep, gone.clone()]).unwrap();

        bm.discard(std::slice::from_ref(&gone)).unwrap();
        assert!(collect_hits(&index, &hash(b"dropped")).is_empty());
        assert_eq!(collect_hits(&index, &hash(b"kept")).len(), 1);
    }

    #[test]
    fn drop_all_clears_only_this_folder() {
        let index = Index::open(MemoryEngine::new()).unwrap();
        let folder_a = index.folder_index("a").unwrap();
        let folder_b = index.folder_index("b").unwrap();
        let f = file("x", &[b"data"]);

        BlockMap::new(&index, folder_a).add(std::slice::from_ref(&f)).unwrap();
        BlockMap::new(&index, folder_b).add(std::slice::from_ref(&f)).unwrap();
        BlockMap::new(&index, folder_a).drop_all().unwrap();

        let finder = BlockFinder::new(&index);
        assert!(!finder.iterate(&["a"], &hash(b"data"), |_, _, _| true));
        assert!(finder.iterate(&["b"], &hash(b"data"), |_, _, _| true));
    }

    #[test]
    fn unknown_folder_is_skipped() {
        let (index, _) = setup();
        assert!(!BlockFinder::new(&index).iterate(&["missing"], &hash(b"x"), |_, _, _| true));
    }

    #[test]
    fn fix_moves_one_entry() {
        let (index, folder) = setup();
        let f = file("x", &[b"good", b"corrupt"]);
        BlockMap::new(&index, folder).add(std::slice::from_ref(&f)).unwrap();

        let actual = hash(b"actual-disk-content");
        BlockFinder::new(&index)
            .fix("default", "x", 1, &hash(b"corrupt"), &actual)
            .unwrap();

        assert!(collect_hits(&index, &hash(b"corrupt")).is_empty());
        assert_eq!(collect_hits(&index, &actual), vec![("x".to_owned(), 1)]);
        assert_eq!(collect_hits(&index, &hash(b"good")), vec![("x".to_owned(), 0)]);
    }
}
