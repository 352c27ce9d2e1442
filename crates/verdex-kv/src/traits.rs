//! The key-value engine contract the index is layered on.
//!
//! The index consumes an ordered, byte-keyed store through this small
//! surface: point reads and writes, atomically applied batches, snapshots
//! with a consistent view, and prefix iteration. Any LSM-style engine can
//! implement it; [`MemoryEngine`](crate::MemoryEngine) is the in-tree
//! implementation used for tests and embedding.

use verdex_error::Result;

/// A boxed prefix iterator over `(key, value)` pairs in ascending key order.
pub type KvIter<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// An ordered byte-keyed storage engine.
pub trait KvEngine: Send + Sync {
    /// The snapshot type produced by this engine.
    type Snapshot: KvSnapshot;

    /// Point read from the current state.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a single entry.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a single entry. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply a batch atomically: either every operation becomes visible or
    /// none does.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Take a consistent snapshot of the current state. Later writes are
    /// not visible through it.
    fn snapshot(&self) -> Self::Snapshot;

    /// Iterate the current state over all keys starting with `prefix`.
    fn iter_prefix(&self, prefix: &[u8]) -> KvIter<'_>;
}

/// A consistent point-in-time view of an engine.
pub trait KvSnapshot: Send {
    /// Point read from the snapshot.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Iterate the snapshot over all keys starting with `prefix`.
    fn iter_prefix(&self, prefix: &[u8]) -> KvIter<'_>;
}

/// One operation within a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered set of mutations applied atomically by [`KvEngine::write`].
///
/// Tracks its approximate encoded size so callers can bound memory by
/// flushing when a batch grows past a threshold.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.size += key.len() + value.len();
        self.ops.push(BatchOp::Put(key.to_vec(), value.to_vec()));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.size += key.len();
        self.ops.push(BatchOp::Delete(key.to_vec()));
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Approximate byte size of the batched keys and values.
    pub fn size_bytes(&self) -> usize {
        self.size
    }

    /// Take the operations, leaving the batch empty but with its capacity.
    pub fn take_ops(&mut self) -> Vec<BatchOp> {
        self.size = 0;
        std::mem::take(&mut self.ops)
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// The smallest byte string strictly greater than every key with `prefix`,
/// or `None` when the prefix is all `0xff` and no such bound exists.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(bound);
        }
        bound.pop();
    }
    None
}
