//! Deterministic byte-level encoding of every typed key.
//!
//! The first key byte is the type; folder indexes are 4-byte big-endian so
//! the ordered store keeps a folder's records contiguous and prefix scans
//! can address "all records for this folder" or "all block entries for this
//! (folder, hash)". Key-type constants are monotonic and never reused.
//!
//! Encoders append into a caller-supplied buffer after clearing it, so hot
//! paths reuse one allocation across hundreds of thousands of keys. Parsers
//! that meet the wrong type byte or a short key panic: those keys can only
//! come from a bug or store corruption.

use verdex_types::DeviceId;

pub const KEY_TYPE_DEVICE: u8 = 0;
pub const KEY_TYPE_GLOBAL: u8 = 1;
pub const KEY_TYPE_BLOCK: u8 = 2;
pub const KEY_TYPE_DEVICE_STATISTIC: u8 = 3;
pub const KEY_TYPE_FOLDER_STATISTIC: u8 = 4;
pub const KEY_TYPE_VIRTUAL_MTIME: u8 = 5;
pub const KEY_TYPE_FOLDER_IDX: u8 = 6;
pub const KEY_TYPE_NAME_IDX: u8 = 7;

pub const KEY_PREFIX_LEN: usize = 1;
pub const KEY_FOLDER_LEN: usize = 4;
pub const KEY_DEVICE_LEN: usize = 32;
pub const KEY_HASH_LEN: usize = 32;

fn put_header(buf: &mut Vec<u8>, key_type: u8, folder: u32) {
    buf.clear();
    buf.push(key_type);
    buf.extend_from_slice(&folder.to_be_bytes());
}

/// `KEY_TYPE_DEVICE + folder + device + name`: one device's record of one
/// file.
pub fn device_key_into(buf: &mut Vec<u8>, folder: u32, device: &DeviceId, name: &[u8]) {
    put_header(buf, KEY_TYPE_DEVICE, folder);
    buf.extend_from_slice(device.as_bytes());
    buf.extend_from_slice(name);
}

/// `KEY_TYPE_GLOBAL + folder + name`: the version list of one file.
pub fn global_key_into(buf: &mut Vec<u8>, folder: u32, name: &[u8]) {
    put_header(buf, KEY_TYPE_GLOBAL, folder);
    buf.extend_from_slice(name);
}

/// `KEY_TYPE_BLOCK + folder + hash + name`: one block occurrence; the value
/// is the 4-byte big-endian block index within the file.
pub fn block_key_into(buf: &mut Vec<u8>, folder: u32, hash: &[u8; 32], name: &[u8]) {
    put_header(buf, KEY_TYPE_BLOCK, folder);
    buf.extend_from_slice(hash);
    buf.extend_from_slice(name);
}

/// `KEY_TYPE_VIRTUAL_MTIME + folder + name`: stored mtime pair.
pub fn mtime_key_into(buf: &mut Vec<u8>, folder: u32, name: &[u8]) {
    put_header(buf, KEY_TYPE_VIRTUAL_MTIME, folder);
    buf.extend_from_slice(name);
}

/// `KEY_TYPE_DEVICE_STATISTIC + device`.
pub fn device_statistic_key(device: &DeviceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_PREFIX_LEN + KEY_DEVICE_LEN);
    key.push(KEY_TYPE_DEVICE_STATISTIC);
    key.extend_from_slice(device.as_bytes());
    key
}

/// `KEY_TYPE_FOLDER_STATISTIC + folder`.
pub fn folder_statistic_key(folder: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_PREFIX_LEN + KEY_FOLDER_LEN);
    key.push(KEY_TYPE_FOLDER_STATISTIC);
    key.extend_from_slice(&folder.to_be_bytes());
    key
}

/// `key_type + id`: one entry of an index-id dictionary.
pub fn idx_key(key_type: u8, id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_PREFIX_LEN + 4);
    key.push(key_type);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn check_key(key: &[u8], key_type: u8, min_len: usize) {
    assert!(
        key.len() >= min_len,
        "key too short: {} bytes, need {min_len}",
        key.len()
    );
    assert!(
        key[0] == key_type,
        "wrong key type: {} instead of {key_type}",
        key[0]
    );
}

/// The folder index of any folder-scoped key.
pub fn key_folder(key: &[u8]) -> u32 {
    assert!(key.len() >= KEY_PREFIX_LEN + KEY_FOLDER_LEN, "key too short");
    u32::from_be_bytes(key[KEY_PREFIX_LEN..KEY_PREFIX_LEN + KEY_FOLDER_LEN].try_into().unwrap())
}

/// The device of a device key.
pub fn device_key_device(key: &[u8]) -> DeviceId {
    const NAME_START: usize = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN;
    check_key(key, KEY_TYPE_DEVICE, NAME_START);
    DeviceId::from_slice(&key[KEY_PREFIX_LEN + KEY_FOLDER_LEN..NAME_START]).unwrap()
}

/// The trailing name of a device key.
pub fn device_key_name(key: &[u8]) -> &[u8] {
    const NAME_START: usize = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_DEVICE_LEN;
    check_key(key, KEY_TYPE_DEVICE, NAME_START);
    &key[NAME_START..]
}

/// The trailing name of a global key.
pub fn global_key_name(key: &[u8]) -> &[u8] {
    const NAME_START: usize = KEY_PREFIX_LEN + KEY_FOLDER_LEN;
    check_key(key, KEY_TYPE_GLOBAL, NAME_START);
    &key[NAME_START..]
}

/// The trailing name of a block key.
pub fn block_key_name(key: &[u8]) -> &[u8] {
    const NAME_START: usize = KEY_PREFIX_LEN + KEY_FOLDER_LEN + KEY_HASH_LEN;
    check_key(key, KEY_TYPE_BLOCK, NAME_START + 1);
    &key[NAME_START..]
}

/// The trailing name of a virtual mtime key.
pub fn mtime_key_name(key: &[u8]) -> &[u8] {
    const NAME_START: usize = KEY_PREFIX_LEN + KEY_FOLDER_LEN;
    check_key(key, KEY_TYPE_VIRTUAL_MTIME, NAME_START);
    &key[NAME_START..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(seed: u8) -> DeviceId {
        DeviceId::new([seed; 32])
    }

    #[test]
    fn device_key_layout() {
        let mut key = Vec::new();
        device_key_into(&mut key, 0x01020304, &dev(9), b"some/file");
        assert_eq!(key[0], KEY_TYPE_DEVICE);
        assert_eq!(&key[1..5], &[1, 2, 3, 4]);
        assert_eq!(&key[5..37], &[9; 32]);
        assert_eq!(&key[37..], b"some/file");

        assert_eq!(key_folder(&key), 0x01020304);
        assert_eq!(device_key_device(&key), dev(9));
        assert_eq!(device_key_name(&key), b"some/file");
    }

    #[test]
    fn global_key_layout() {
        let mut key = Vec::new();
        global_key_into(&mut key, 7, b"dir/file");
        assert_eq!(key[0], KEY_TYPE_GLOBAL);
        assert_eq!(key_folder(&key), 7);
        assert_eq!(global_key_name(&key), b"dir/file");
    }

    #[test]
    fn block_key_layout() {
        let hash = [0x5a; 32];
        let mut key = Vec::new();
        block_key_into(&mut key, 3, &hash, b"f");
        assert_eq!(key[0], KEY_TYPE_BLOCK);
        assert_eq!(key_folder(&key), 3);
        assert_eq!(&key[5..37], &hash);
        assert_eq!(block_key_name(&key), b"f");
    }

    #[test]
    fn keys_nest_under_their_prefixes() {
        let mut full = Vec::new();
        let mut prefix = Vec::new();

        device_key_into(&mut full, 1, &dev(2), b"name");
        device_key_into(&mut prefix, 1, &dev(2), b"");
        assert!(full.starts_with(&prefix));

        block_key_into(&mut full, 1, &[0xaa; 32], b"name");
        block_key_into(&mut prefix, 1, &[0xaa; 32], b"");
        assert!(full.starts_with(&prefix));

        global_key_into(&mut full, 1, b"name");
        global_key_into(&mut prefix, 1, b"");
        assert!(full.starts_with(&prefix));
    }

    #[test]
    fn folder_orders_before_name() {
        // The 4-byte big-endian folder index keeps folders contiguous.
        let mut a = Vec::new();
        let mut b = Vec::new();
        global_key_into(&mut a, 1, b"zzz");
        global_key_into(&mut b, 2, b"aaa");
        assert!(a < b);
    }

    #[test]
    fn encoding_reuses_buffer() {
        let mut key = Vec::new();
        device_key_into(&mut key, 1, &dev(2), b"a-rather-long-file-name");
        let cap = key.capacity();
        device_key_into(&mut key, 1, &dev(2), b"short");
        assert_eq!(key.capacity(), cap);
    }

    #[test]
    fn idx_key_layout() {
        let key = idx_key(KEY_TYPE_FOLDER_IDX, 0x0a0b0c0d);
        assert_eq!(key, vec![KEY_TYPE_FOLDER_IDX, 0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    #[should_panic(expected = "wrong key type")]
    fn wrong_type_byte_panics() {
        let mut key = Vec::new();
        global_key_into(&mut key, 1, &[b'n'; 40]);
        device_key_name(&key);
    }

    #[test]
    #[should_panic(expected = "key too short")]
    fn short_key_panics() {
        block_key_name(&[KEY_TYPE_BLOCK, 0, 0]);
    }
}
