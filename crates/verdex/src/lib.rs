//! Verdex: the file-version index behind a peer-to-peer folder
//! synchronization system.
//!
//! For every managed folder the index answers three questions that stay
//! mutually consistent: which version of each file every known device
//! claims to hold, which version is globally authoritative, and how many
//! bytes each device has in sync, still needs, or holds in total. It is
//! layered on an ordered byte-keyed key-value engine (see `verdex-kv`) and
//! additionally maintains an inverted block map from content hashes to the
//! files that hold them.

pub mod blockmap;
pub mod clock;
pub mod fileset;
pub mod index_ids;
pub mod keys;
pub mod marker;
pub mod mtime;
pub mod sizes;
pub mod stats;
pub mod transaction;

pub use blockmap::{BlockFinder, BlockMap};
pub use clock::Clock;
pub use fileset::FileSet;
pub use marker::{Folder, MARKER_NAME};
pub use mtime::MtimeRepo;
pub use sizes::SizeTracker;
pub use stats::{DeviceStatisticsReference, FolderStatisticsReference};

use tracing::debug;
use verdex_error::Result;
use verdex_kv::{KvEngine, WriteBatch};

use crate::index_ids::IndexIds;
use crate::keys::{
    folder_statistic_key, KEY_FOLDER_LEN, KEY_PREFIX_LEN, KEY_TYPE_BLOCK, KEY_TYPE_DEVICE,
    KEY_TYPE_FOLDER_IDX, KEY_TYPE_GLOBAL, KEY_TYPE_NAME_IDX, KEY_TYPE_VIRTUAL_MTIME,
};

/// Batches larger than this are flushed to the engine before the logical
/// operation completes, bounding memory during large scans.
pub(crate) const DROP_FLUSH_SIZE: usize = 256 << 10;

/// The index instance: an engine handle plus the persistent id dictionaries
/// and the tick clock shared by every folder.
#[derive(Debug)]
pub struct Index<E: KvEngine> {
    engine: E,
    clock: Clock,
    folder_idx: IndexIds,
    name_idx: IndexIds,
}

impl<E: KvEngine> Index<E> {
    /// Open an index over `engine` with a wall-clock tick source.
    pub fn open(engine: E) -> Result<Self> {
        Self::with_clock(engine, Clock::new())
    }

    /// Open an index with an injected clock, for deterministic tests.
    pub fn with_clock(engine: E, clock: Clock) -> Result<Self> {
        let folder_idx = IndexIds::load(&engine, KEY_TYPE_FOLDER_IDX, "folder")?;
        let name_idx = IndexIds::load(&engine, KEY_TYPE_NAME_IDX, "name")?;
        Ok(Self {
            engine,
            clock,
            folder_idx,
            name_idx,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn folder_idx(&self) -> &IndexIds {
        &self.folder_idx
    }

    /// The compact index for `folder`, assigning one if absent.
    pub fn folder_index(&self, folder: &str) -> Result<u32> {
        self.folder_idx.id(&self.engine, folder.as_bytes())
    }

    /// The compact index for a file name, assigning one if absent.
    ///
    /// File names travel verbatim inside block and record keys; the name
    /// dictionary exists for callers that keep compact per-name state
    /// beside the index. Assignments persist like folder indexes do.
    pub fn name_index(&self, name: &str) -> Result<u32> {
        self.name_idx.id(&self.engine, name.as_bytes())
    }

    /// Folders that still have records in the store.
    pub fn list_folders(&self) -> Result<Vec<String>> {
        let mut folders = Vec::new();
        for name in self.folder_idx.names() {
            let Some(idx) = self.folder_idx.lookup(&name) else {
                continue;
            };
            let Ok(name) = String::from_utf8(name) else {
                continue;
            };
            if self.folder_has_records(idx) {
                folders.push(name);
            }
        }
        folders.sort();
        Ok(folders)
    }

    fn folder_has_records(&self, folder: u32) -> bool {
        for key_type in [KEY_TYPE_DEVICE, KEY_TYPE_GLOBAL] {
            let mut prefix = Vec::with_capacity(KEY_PREFIX_LEN + KEY_FOLDER_LEN);
            prefix.push(key_type);
            prefix.extend_from_slice(&folder.to_be_bytes());
            if self.engine.iter_prefix(&prefix).next().is_some() {
                return true;
            }
        }
        false
    }

    /// Destroy every record of `folder`: device records, version lists,
    /// block entries, virtual mtimes and folder statistics. The folder's
    /// compact index stays assigned; ids are never reused.
    pub fn drop_folder(&self, folder: &str) -> Result<()> {
        let Some(idx) = self.folder_idx.lookup(folder.as_bytes()) else {
            return Ok(());
        };
        debug!(folder, "drop folder");

        let mut batch = WriteBatch::new();
        for key_type in [
            KEY_TYPE_DEVICE,
            KEY_TYPE_GLOBAL,
            KEY_TYPE_BLOCK,
            KEY_TYPE_VIRTUAL_MTIME,
        ] {
            let mut prefix = Vec::with_capacity(KEY_PREFIX_LEN + KEY_FOLDER_LEN);
            prefix.push(key_type);
            prefix.extend_from_slice(&idx.to_be_bytes());
            for (key, _) in self.engine.iter_prefix(&prefix) {
                if batch.size_bytes() > DROP_FLUSH_SIZE {
                    self.engine.write(std::mem::take(&mut batch))?;
                }
                batch.delete(&key);
            }
        }
        batch.delete(&folder_statistic_key(idx));
        self.engine.write(batch)
    }
}
