//! An ordered in-memory engine for tests and embedding.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use verdex_error::Result;

use crate::traits::{prefix_upper_bound, BatchOp, KvEngine, KvIter, KvSnapshot, WriteBatch};

type Tree = BTreeMap<Vec<u8>, Arc<[u8]>>;

/// An in-memory ordered engine.
///
/// Values are reference-counted, so a snapshot is a cheap clone of the key
/// tree sharing the value storage. Clones of the engine share state, the way
/// multiple handles onto one database file would.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<RwLock<Tree>>,
}

impl MemoryEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, for tests.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

fn range_iter(tree: &Tree, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let upper = prefix_upper_bound(prefix);
    let range = match &upper {
        Some(end) => tree.range::<[u8], _>((Bound::Included(prefix), Bound::Excluded(end.as_slice()))),
        None => tree.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded)),
    };
    range.map(|(k, v)| (k.clone(), v.to_vec())).collect()
}

impl KvEngine for MemoryEngine {
    type Snapshot = MemorySnapshot;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write().insert(key.to_vec(), Arc::from(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn write(&self, mut batch: WriteBatch) -> Result<()> {
        let mut tree = self.inner.write();
        for op in batch.take_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    tree.insert(key, Arc::from(value.as_slice()));
                }
                BatchOp::Delete(key) => {
                    tree.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            tree: self.inner.read().clone(),
        }
    }

    fn iter_prefix(&self, prefix: &[u8]) -> KvIter<'_> {
        Box::new(range_iter(&self.inner.read(), prefix).into_iter())
    }
}

/// A frozen view of a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemorySnapshot {
    tree: Tree,
}

impl KvSnapshot for MemorySnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key).map(|v| v.to_vec()))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> KvIter<'_> {
        Box::new(range_iter(&self.tree, prefix).into_iter())
    }
}
