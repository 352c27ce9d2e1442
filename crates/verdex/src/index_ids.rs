//! Persistent dictionaries assigning compact 32-bit ids to names.
//!
//! Two instances exist per index: one for folder names (used in every
//! folder-scoped key) and one for file names (used inside block-map
//! bookkeeping). Assignments are persisted so ids survive restart, and ids
//! are never reused.

use std::collections::HashMap;

use parking_lot::RwLock;
use verdex_error::{Result, VerdexError};
use verdex_kv::KvEngine;

use crate::keys::idx_key;

#[derive(Debug, Default)]
struct Inner {
    by_name: HashMap<Vec<u8>, u32>,
    by_id: HashMap<u32, Vec<u8>>,
    next: u32,
}

/// One string-to-id dictionary.
///
/// Reads of already-assigned ids take the read lock only; assignment of a
/// new id takes the write lock and persists the entry before publishing it.
#[derive(Debug)]
pub struct IndexIds {
    key_type: u8,
    kind: &'static str,
    inner: RwLock<Inner>,
}

impl IndexIds {
    /// Load every persisted assignment of `key_type` from the engine.
    pub fn load<E: KvEngine>(engine: &E, key_type: u8, kind: &'static str) -> Result<Self> {
        let mut inner = Inner::default();
        for (key, name) in engine.iter_prefix(&[key_type]) {
            assert!(key.len() == 5 && key[0] == key_type, "malformed {kind} idx key");
            let id = u32::from_be_bytes(key[1..5].try_into().unwrap());
            inner.by_name.insert(name.clone(), id);
            inner.by_id.insert(id, name);
            inner.next = inner.next.max(id + 1);
        }
        Ok(Self {
            key_type,
            kind,
            inner: RwLock::new(inner),
        })
    }

    /// The id for `name`, assigning and persisting a fresh one if absent.
    pub fn id<E: KvEngine>(&self, engine: &E, name: &[u8]) -> Result<u32> {
        if let Some(&id) = self.inner.read().by_name.get(name) {
            return Ok(id);
        }

        let mut inner = self.inner.write();
        // Someone may have assigned it between the locks.
        if let Some(&id) = inner.by_name.get(name) {
            return Ok(id);
        }

        let id = inner.next;
        engine.put(&idx_key(self.key_type, id), name)?;
        inner.next += 1;
        inner.by_name.insert(name.to_vec(), id);
        inner.by_id.insert(id, name.to_vec());
        Ok(id)
    }

    /// The id for `name` if one has been assigned.
    pub fn lookup(&self, name: &[u8]) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    /// The name for `id`, or an error for an id that was never assigned.
    pub fn name(&self, id: u32) -> Result<Vec<u8>> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(VerdexError::UnknownId {
                kind: self.kind,
                id,
            })
    }

    /// Every assigned name, in no particular order.
    pub fn names(&self) -> Vec<Vec<u8>> {
        self.inner.read().by_name.keys().cloned().collect()
    }
}
