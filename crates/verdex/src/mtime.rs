//! Virtual mtime repository.
//!
//! Some filesystems cannot store the modification time a file record
//! advertises (FAT's two-second granularity, for one). For those files the
//! index keeps a `(disk mtime, actual mtime)` pair: as long as the mtime on
//! disk still matches the stored disk mtime, the stored actual mtime is the
//! authoritative one.

use tracing::trace;
use verdex_error::Result;
use verdex_kv::KvEngine;
use verdex_types::wire::{decode_mtime_pair, encode_mtime_pair};

use crate::keys::mtime_key_into;
use crate::Index;

/// Virtual mtimes of one folder.
#[derive(Debug)]
pub struct MtimeRepo<'a, E: KvEngine> {
    index: &'a Index<E>,
    folder: u32,
}

impl<'a, E: KvEngine> MtimeRepo<'a, E> {
    pub fn new(index: &'a Index<E>, folder: u32) -> Self {
        Self { index, folder }
    }

    /// Record that `name` advertises `actual` while the disk shows `disk`.
    /// Equal times need no adjustment and clear any stored pair instead.
    pub fn update_mtime(&self, name: &[u8], disk: i64, actual: i64) -> Result<()> {
        let mut key = Vec::new();
        mtime_key_into(&mut key, self.folder, name);
        if disk == actual {
            return self.index.engine().delete(&key);
        }
        trace!(folder = self.folder, name = %String::from_utf8_lossy(name), disk, actual, "store virtual mtime");
        let mut value = Vec::new();
        encode_mtime_pair(disk, actual, &mut value);
        self.index.engine().put(&key, &value)
    }

    /// The mtime to advertise for `name` given what the disk shows now.
    /// Returns the stored actual mtime while the disk mtime still matches,
    /// otherwise `disk` itself (the file changed since the pair was stored).
    pub fn get_mtime(&self, name: &[u8], disk: i64) -> Result<i64> {
        let mut key = Vec::new();
        mtime_key_into(&mut key, self.folder, name);
        match self.index.engine().get(&key)? {
            Some(bytes) => {
                let (stored_disk, actual) =
                    decode_mtime_pair(&bytes).expect("corrupt virtual mtime record");
                Ok(if stored_disk == disk { actual } else { disk })
            }
            None => Ok(disk),
        }
    }

    /// Drop the stored pair for `name`, if any.
    pub fn delete_mtime(&self, name: &[u8]) -> Result<()> {
        let mut key = Vec::new();
        mtime_key_into(&mut key, self.folder, name);
        self.index.engine().delete(&key)
    }
}
