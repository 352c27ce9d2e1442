//! Domain types for the Verdex file-version index.
//!
//! Everything that crosses the persistence boundary lives here: device
//! identities, version vectors, file metadata, version lists, size counters,
//! and the stable wire encoding that serializes them.

pub mod counters;
pub mod fileinfo;
pub mod vector;
pub mod version_list;
pub mod wire;

pub use counters::Counters;
pub use fileinfo::{Block, FileFlags, FileInfo, FileLike, TruncatedFileInfo};
pub use vector::{Counter, Ordering, Vector};
pub use version_list::{FileVersion, VersionList};

use std::fmt;

/// A device identity: 32 opaque bytes.
///
/// The byte ordering is what keeps a device's records contiguous under
/// prefix scans, so the derived `Ord` is plain byte order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId([u8; 32]);

impl DeviceId {
    /// The local device. Remote devices can never collide with it because
    /// real identities are hashes of public keys.
    pub const LOCAL: Self = Self([0xff; 32]);

    /// Create a device id from raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a device id from a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// The raw bytes of this device id.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceId {
    // Shortened hex form so log lines stay readable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceId({:02x}{:02x}{:02x}{:02x})",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_roundtrip() {
        let id = DeviceId::new([7u8; 32]);
        let restored = DeviceId::from_slice(id.as_bytes()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn device_id_from_wrong_length_fails() {
        assert!(DeviceId::from_slice(&[0u8; 16]).is_none());
        assert!(DeviceId::from_slice(&[0u8; 64]).is_none());
    }

    #[test]
    fn device_id_display_is_hex() {
        let id = DeviceId::new([0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
    }

    #[test]
    fn local_device_is_all_ones() {
        assert!(DeviceId::LOCAL.as_bytes().iter().all(|&b| b == 0xff));
    }
}
