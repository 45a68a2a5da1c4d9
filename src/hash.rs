//! Default key hash.

/// Signature of a table hash function. The slice length is the table's key
/// size.
pub type HashFn = fn(&[u8]) -> u32;

/// XOR-folds the key as native-endian 4-byte words into an all-ones seed.
/// A trailing partial word is zero-padded.
pub fn xor_fold(key: &[u8]) -> u32 {
    let mut words = key.chunks_exact(4);
    let mut hash = !0u32;
    for word in &mut words {
        hash ^= u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
    }
    let tail = words.remainder();
    if !tail.is_empty() {
        let mut padded = [0u8; 4];
        padded[..tail.len()].copy_from_slice(tail);
        hash ^= u32::from_ne_bytes(padded);
    }
    hash
}
