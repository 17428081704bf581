use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Name of the hash we use for envelopes, signatures and the ledger.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// Length of a reduced key hash.
pub const KEY_HASH_LEN: usize = 16;

/// SHA-256 of some data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 over several slices, as if they were concatenated.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// The "key hash": SHA-256 folded in half with XOR. Stored next to wrapped
/// secrets so we can tell whether we were handed the right unwrapping key
/// without decrypting anything.
pub fn key_hash(key: &[u8]) -> [u8; KEY_HASH_LEN] {
    let full = sha256(key);
    let mut reduced = [0u8; KEY_HASH_LEN];
    for (i, out) in reduced.iter_mut().enumerate() {
        *out = full[i] ^ full[i + KEY_HASH_LEN];
    }
    reduced
}

/// CRC-32C (Castagnoli) of some bytes. Used as a short key identifier.
pub fn crc32c(data: &[u8]) -> u32 {
    ::crc32c::crc32c(data)
}

/// Constant time comparison of two byte slices.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).unwrap_u8() == 1
}
