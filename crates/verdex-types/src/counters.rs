//! Size accounting triplets.

use crate::fileinfo::FileLike;

/// Running totals over a set of file records.
///
/// Deleted entries count under `deletes` and leave `bytes` untouched;
/// everything else counts under `files` and contributes its size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub files: u64,
    pub deletes: u64,
    pub bytes: u64,
}

impl Counters {
    /// Account for `f` being added to the tracked set.
    pub fn add_file<F: FileLike>(&mut self, f: &F) {
        if f.is_deleted() {
            self.deletes += 1;
        } else {
            self.files += 1;
            self.bytes += f.size().max(0) as u64;
        }
    }

    /// Account for `f` leaving the tracked set. Exact inverse of
    /// [`add_file`](Self::add_file); saturates rather than underflows if the
    /// counters were rebuilt from a partial state.
    pub fn remove_file<F: FileLike>(&mut self, f: &F) {
        if f.is_deleted() {
            self.deletes = self.deletes.saturating_sub(1);
        } else {
            self.files = self.files.saturating_sub(1);
            self.bytes = self.bytes.saturating_sub(f.size().max(0) as u64);
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileinfo::{Block, FileFlags, FileInfo};

    fn sized(name: &str, size: i32, flags: FileFlags) -> FileInfo {
        FileInfo {
            name: name.into(),
            flags,
            blocks: vec![Block {
                offset: 0,
                size,
                hash: [0; 32],
            }],
            ..FileInfo::default()
        }
    }

    #[test]
    fn add_then_remove_is_identity() {
        let f = sized("x", 100, FileFlags::empty());
        let mut c = Counters::default();
        c.add_file(&f);
        assert_eq!(
            c,
            Counters {
                files: 1,
                deletes: 0,
                bytes: 100
            }
        );
        c.remove_file(&f);
        assert!(c.is_zero());
    }

    #[test]
    fn deleted_files_count_as_deletes() {
        let f = sized("x", 100, FileFlags::DELETED);
        let mut c = Counters::default();
        c.add_file(&f);
        assert_eq!(
            c,
            Counters {
                files: 0,
                deletes: 1,
                bytes: 0
            }
        );
    }

    #[test]
    fn remove_saturates() {
        let f = sized("x", 100, FileFlags::empty());
        let mut c = Counters::default();
        c.remove_file(&f);
        assert!(c.is_zero());
    }
}
