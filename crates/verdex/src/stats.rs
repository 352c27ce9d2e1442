//! Per-device and per-folder statistics blobs.
//!
//! Small read-modify-write facades over the engine; nothing here takes part
//! in the transactional index. Timestamps are explicit arguments so callers
//! (and tests) control the clock.

use verdex_error::Result;
use verdex_kv::KvEngine;
use verdex_types::wire::{put_bytes, put_i64, Reader};
use verdex_types::DeviceId;

use crate::keys::{device_statistic_key, folder_statistic_key};
use crate::Index;

/// What the index remembers about a device across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatistics {
    /// Unix nanoseconds of the last completed exchange with the device.
    pub last_seen: i64,
}

/// What the index remembers about a folder across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderStatistics {
    /// Name of the last file fully received into the folder.
    pub last_file_name: String,
    /// Unix nanoseconds at which it was received.
    pub last_file_at: i64,
}

/// Statistics handle for one device.
#[derive(Debug)]
pub struct DeviceStatisticsReference<'a, E: KvEngine> {
    index: &'a Index<E>,
    device: DeviceId,
}

impl<'a, E: KvEngine> DeviceStatisticsReference<'a, E> {
    pub fn new(index: &'a Index<E>, device: DeviceId) -> Self {
        Self { index, device }
    }

    /// Stored statistics; defaults for a device never seen.
    pub fn get(&self) -> Result<DeviceStatistics> {
        let key = device_statistic_key(&self.device);
        match self.index.engine().get(&key)? {
            Some(bytes) => {
                let mut r = Reader::new(&bytes);
                let last_seen = r
                    .i64()
                    .filter(|_| r.done())
                    .expect("corrupt device statistics record");
                Ok(DeviceStatistics { last_seen })
            }
            None => Ok(DeviceStatistics::default()),
        }
    }

    /// Record an exchange with the device at `now` (unix nanoseconds).
    pub fn was_seen(&self, now: i64) -> Result<()> {
        let mut value = Vec::new();
        put_i64(&mut value, now);
        self.index
            .engine()
            .put(&device_statistic_key(&self.device), &value)
    }
}

/// Statistics handle for one folder.
#[derive(Debug)]
pub struct FolderStatisticsReference<'a, E: KvEngine> {
    index: &'a Index<E>,
    folder: u32,
}

impl<'a, E: KvEngine> FolderStatisticsReference<'a, E> {
    pub fn new(index: &'a Index<E>, folder: u32) -> Self {
        Self { index, folder }
    }

    /// Stored statistics; defaults for a folder with no completed files.
    pub fn get(&self) -> Result<FolderStatistics> {
        let key = folder_statistic_key(self.folder);
        match self.index.engine().get(&key)? {
            Some(bytes) => {
                let mut r = Reader::new(&bytes);
                let name = r.bytes().expect("corrupt folder statistics record");
                let name = std::str::from_utf8(name)
                    .expect("corrupt folder statistics record")
                    .to_owned();
                let at = r
                    .i64()
                    .filter(|_| r.done())
                    .expect("corrupt folder statistics record");
                Ok(FolderStatistics {
                    last_file_name: name,
                    last_file_at: at,
                })
            }
            None => Ok(FolderStatistics::default()),
        }
    }

    /// Record that `name` finished syncing at `now` (unix nanoseconds).
    pub fn received_file(&self, name: &str, now: i64) -> Result<()> {
        let mut value = Vec::new();
        put_bytes(&mut value, name.as_bytes());
        put_i64(&mut value, now);
        self.index
            .engine()
            .put(&folder_statistic_key(self.folder), &value)
    }
}
