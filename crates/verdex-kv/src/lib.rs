//! Key-value engine abstraction for the Verdex index.
//!
//! The index never talks to a storage engine directly; it goes through the
//! [`KvEngine`] trait defined here. The trait captures exactly what the
//! index needs from an ordered, byte-keyed store: point reads and writes,
//! atomic batches, consistent snapshots, and prefix iteration.

pub mod memory;
pub mod traits;

pub use memory::{MemoryEngine, MemorySnapshot};
pub use traits::{prefix_upper_bound, BatchOp, KvEngine, KvIter, KvSnapshot, WriteBatch};
