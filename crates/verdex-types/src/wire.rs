//! Stable binary encoding for persisted values.
//!
//! Every value the index writes to the key-value store goes through this
//! module: file records, version lists, and the small auxiliary blobs. The
//! format is XDR-flavored: fixed-width big-endian integers, and variable
//! byte fields as a 4-byte length followed by the data padded with zeros to
//! a 4-byte boundary. Canonical values round-trip bytewise.
//!
//! Encoders append into a caller-supplied `Vec<u8>` after clearing it, so a
//! reused buffer only ever grows when its capacity is insufficient. Decoders
//! return `None` on any malformed input; the callers that own persisted data
//! treat that as unrecoverable corruption.

use crate::fileinfo::{Block, FileFlags, FileInfo, TruncatedFileInfo, MAX_NAME_LEN};
use crate::vector::{Counter, Vector};
use crate::version_list::{FileVersion, VersionList};
use crate::DeviceId;

/// Append a big-endian u32.
pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian u64.
pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian i32.
pub fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Append a big-endian i64.
pub fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Append a length-prefixed byte field, zero-padded to a 4-byte boundary.
pub fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    put_u32(buf, b.len() as u32);
    buf.extend_from_slice(b);
    let pad = (4 - b.len() % 4) % 4;
    buf.extend_from_slice(&[0u8; 3][..pad]);
}

/// Sequential reader over an encoded value.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn done(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.data.len() < n {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Option<i64> {
        self.take(8).map(|b| i64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Read a length-prefixed byte field, consuming its padding.
    pub fn bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.u32()? as usize;
        let padded = len.checked_add((4 - len % 4) % 4)?;
        let field = self.take(padded)?;
        Some(&field[..len])
    }

    /// Read a fixed-width opaque field.
    pub fn opaque(&mut self, n: usize) -> Option<&'a [u8]> {
        self.take(n)
    }
}

const COUNTER_WIRE_LEN: usize = 16;
const BLOCK_WIRE_LEN: usize = 8 + 4 + 32;
const FILE_VERSION_MIN_LEN: usize = 32 + 4;

fn put_vector(buf: &mut Vec<u8>, v: &Vector) {
    put_u32(buf, v.counters().len() as u32);
    for c in v.counters() {
        put_u64(buf, c.id);
        put_u64(buf, c.value);
    }
}

fn read_vector(r: &mut Reader<'_>) -> Option<Vector> {
    let n = r.u32()? as usize;
    if n * COUNTER_WIRE_LEN > r.remaining() {
        return None;
    }
    let mut counters = Vec::with_capacity(n);
    for _ in 0..n {
        counters.push(Counter {
            id: r.u64()?,
            value: r.u64()?,
        });
    }
    Some(Vector::from_counters(counters))
}

/// Encode a file record into `buf` (cleared first).
pub fn encode_file_info(f: &FileInfo, buf: &mut Vec<u8>) {
    buf.clear();
    put_bytes(buf, f.name.as_bytes());
    put_u32(buf, f.flags.bits());
    put_i64(buf, f.modified);
    put_vector(buf, &f.version);
    put_i64(buf, f.local_version);
    put_i64(buf, f.blocks.iter().map(|b| i64::from(b.size)).sum());
    put_u32(buf, f.blocks.len() as u32);
    for b in &f.blocks {
        put_i64(buf, b.offset);
        put_i32(buf, b.size);
        buf.extend_from_slice(&b.hash);
    }
}

fn read_file_info_head(
    r: &mut Reader<'_>,
) -> Option<(String, FileFlags, i64, Vector, i64, i64, u32)> {
    let name = r.bytes()?;
    if name.len() > MAX_NAME_LEN {
        return None;
    }
    let name = std::str::from_utf8(name).ok()?.to_owned();
    let flags = FileFlags::from_bits_retain(r.u32()?);
    let modified = r.i64()?;
    let version = read_vector(r)?;
    let local_version = r.i64()?;
    let size = r.i64()?;
    let block_count = r.u32()?;
    Some((name, flags, modified, version, local_version, size, block_count))
}

/// Decode a complete file record.
pub fn decode_file_info(data: &[u8]) -> Option<FileInfo> {
    let mut r = Reader::new(data);
    let (name, flags, modified, version, local_version, _size, block_count) =
        read_file_info_head(&mut r)?;

    let n = block_count as usize;
    if n * BLOCK_WIRE_LEN > r.remaining() {
        return None;
    }
    let mut blocks = Vec::with_capacity(n);
    for _ in 0..n {
        let offset = r.i64()?;
        let size = r.i32()?;
        let hash: [u8; 32] = r.opaque(32)?.try_into().unwrap();
        blocks.push(Block { offset, size, hash });
    }
    if !r.done() {
        return None;
    }

    Some(FileInfo {
        name,
        flags,
        modified,
        version,
        local_version,
        blocks,
    })
}

/// Decode a file record without materializing its blocks.
pub fn decode_file_info_truncated(data: &[u8]) -> Option<TruncatedFileInfo> {
    let mut r = Reader::new(data);
    let (name, flags, modified, version, local_version, size, block_count) =
        read_file_info_head(&mut r)?;
    if block_count as usize * BLOCK_WIRE_LEN != r.remaining() {
        return None;
    }
    Some(TruncatedFileInfo {
        name,
        flags,
        modified,
        version,
        local_version,
        size,
        block_count,
    })
}

/// Encode a version list into `buf` (cleared first).
pub fn encode_version_list(vl: &VersionList, buf: &mut Vec<u8>) {
    buf.clear();
    put_u32(buf, vl.versions.len() as u32);
    for v in &vl.versions {
        buf.extend_from_slice(v.device.as_bytes());
        put_vector(buf, &v.version);
    }
}

/// Decode a version list.
pub fn decode_version_list(data: &[u8]) -> Option<VersionList> {
    let mut r = Reader::new(data);
    let n = r.u32()? as usize;
    if n * FILE_VERSION_MIN_LEN > r.remaining() {
        return None;
    }
    let mut versions = Vec::with_capacity(n);
    for _ in 0..n {
        let device = DeviceId::from_slice(r.opaque(32)?)?;
        let version = read_vector(&mut r)?;
        versions.push(FileVersion { device, version });
    }
    if !r.done() {
        return None;
    }
    Some(VersionList { versions })
}

/// Encode a virtual mtime pair into `buf` (cleared first).
pub fn encode_mtime_pair(disk: i64, actual: i64, buf: &mut Vec<u8>) {
    buf.clear();
    put_i64(buf, disk);
    put_i64(buf, actual);
}

/// Decode a virtual mtime pair.
pub fn decode_mtime_pair(data: &[u8]) -> Option<(i64, i64)> {
    let mut r = Reader::new(data);
    let disk = r.i64()?;
    let actual = r.i64()?;
    if !r.done() {
        return None;
    }
    Some((disk, actual))
}
