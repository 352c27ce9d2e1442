//! File metadata records and the conflict-resolution total order.

use bitflags::bitflags;

use crate::vector::{Ordering, Vector};

/// Accounting size for entries that carry no data blocks (deleted files and
/// directories). Matches the on-disk record overhead those entries occupy.
pub const EMPTY_FILE_SIZE: i64 = 128;

/// Longest permitted file name in bytes.
pub const MAX_NAME_LEN: usize = 8192;

bitflags! {
    /// File record flags. The low twelve bits carry the unix permission
    /// bits; the named flags live above them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        const DELETED        = 1 << 12;
        const INVALID        = 1 << 13;
        const DIRECTORY      = 1 << 14;
        const NO_PERMISSIONS = 1 << 15;
        const SYMLINK        = 1 << 16;

        // Retain permission bits round-tripped through the wire format.
        const _ = 0xfff;
    }
}

/// One content block of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: i64,
    pub size: i32,
    pub hash: [u8; 32],
}

/// Common surface shared by full and truncated file records, so size
/// accounting and iteration work on either.
pub trait FileLike {
    fn name(&self) -> &str;
    fn size(&self) -> i64;
    fn is_deleted(&self) -> bool;
    fn is_invalid(&self) -> bool;
    fn is_directory(&self) -> bool;
    fn is_symlink(&self) -> bool;
}

/// A file metadata record as one device advertises it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub flags: FileFlags,
    pub modified: i64,
    pub version: Vector,
    pub local_version: i64,
    pub blocks: Vec<Block>,
}

impl FileInfo {
    /// Decide a concurrent-version conflict between this file and `other`.
    ///
    /// Total, antisymmetric and deterministic: a surviving modification
    /// beats a delete, then the newer modification time wins, then the
    /// comparison direction of the version vectors settles the remainder.
    pub fn wins_conflict(&self, other: &FileInfo) -> bool {
        if !self.is_deleted() && other.is_deleted() {
            return true;
        }
        if self.is_deleted() && !other.is_deleted() {
            return false;
        }
        if self.modified > other.modified {
            return true;
        }
        if self.modified < other.modified {
            return false;
        }
        self.version.compare(&other.version) == Ordering::ConcurrentGreater
    }
}

impl FileLike for FileInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> i64 {
        if self.is_deleted() || self.is_directory() {
            return EMPTY_FILE_SIZE;
        }
        self.blocks.iter().map(|b| i64::from(b.size)).sum()
    }

    fn is_deleted(&self) -> bool {
        self.flags.contains(FileFlags::DELETED)
    }

    fn is_invalid(&self) -> bool {
        self.flags.contains(FileFlags::INVALID)
    }

    fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    fn is_symlink(&self) -> bool {
        self.flags.contains(FileFlags::SYMLINK)
    }
}

/// A file record without its block list.
///
/// Decoded from the same bytes as [`FileInfo`] but skips materializing the
/// blocks, which is what every counting and listing path wants. The encoded
/// size travels in the record so it survives truncation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncatedFileInfo {
    pub name: String,
    pub flags: FileFlags,
    pub modified: i64,
    pub version: Vector,
    pub local_version: i64,
    pub size: i64,
    pub block_count: u32,
}

impl FileLike for TruncatedFileInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> i64 {
        if self.is_deleted() || self.is_directory() {
            return EMPTY_FILE_SIZE;
        }
        self.size
    }

    fn is_deleted(&self) -> bool {
        self.flags.contains(FileFlags::DELETED)
    }

    fn is_invalid(&self) -> bool {
        self.flags.contains(FileFlags::INVALID)
    }

    fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    fn is_symlink(&self) -> bool {
        self.flags.contains(FileFlags::SYMLINK)
    }
}
