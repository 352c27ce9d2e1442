//! In-memory size accumulators for one folder.

use std::collections::HashMap;

use verdex_types::{Counters, DeviceId, FileLike};

/// Running totals for a folder: the global set, and per-device in-sync and
/// need counters.
///
/// `global` and `insync` are repaired incrementally by the transaction
/// layer's fixups. `need` is defined by the version lists (a device needs
/// every non-deleted, non-invalid global it does not hold at head version)
/// and this struct only caches the computed values; any mutation of the
/// folder invalidates the cache.
///
/// No internal locking: the tracker is owned by its `FileSet`, whose mutex
/// already serializes every mutator.
#[derive(Debug, Default)]
pub struct SizeTracker {
    global: Counters,
    insync: HashMap<DeviceId, Counters>,
    need: HashMap<DeviceId, Counters>,
}

impl SizeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&self) -> Counters {
        self.global
    }

    pub fn insync(&self, device: &DeviceId) -> Counters {
        self.insync.get(device).copied().unwrap_or_default()
    }

    pub(crate) fn global_add<F: FileLike>(&mut self, f: &F) {
        self.global.add_file(f);
    }

    pub(crate) fn global_remove<F: FileLike>(&mut self, f: &F) {
        self.global.remove_file(f);
    }

    pub(crate) fn insync_add<F: FileLike>(&mut self, device: &DeviceId, f: &F) {
        self.insync.entry(*device).or_default().add_file(f);
    }

    pub(crate) fn insync_remove<F: FileLike>(&mut self, device: &DeviceId, f: &F) {
        self.insync.entry(*device).or_default().remove_file(f);
    }

    pub(crate) fn need_cached(&self, device: &DeviceId) -> Option<Counters> {
        self.need.get(device).copied()
    }

    pub(crate) fn cache_need(&mut self, device: DeviceId, counters: Counters) {
        self.need.insert(device, counters);
    }

    pub(crate) fn invalidate_need(&mut self) {
        self.need.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.global = Counters::default();
        self.insync.clear();
        self.need.clear();
    }
}
