//! A buffer for sensitive bytes (private keys, wrapping secrets, half keys).
//!
//! The buffer is wiped when dropped and cannot be cloned or copied: if you
//! need the bytes somewhere else you have to ask for them explicitly with
//! [`SecureBuffer::expose_secret`].

use rand::{CryptoRng, RngCore};
use subtle::{Choice, ConstantTimeEq};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Holds sensitive bytes and zeroes them on drop.
pub struct SecureBuffer(Vec<u8>);

impl SecureBuffer {
    /// Take ownership of some bytes. The passed vector is moved, not copied.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy a slice into a new buffer. The caller is responsible for wiping
    /// the source.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// A buffer of `len` zero bytes, meant to be filled in place.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0u8; len])
    }

    /// A buffer of `len` random bytes.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R, len: usize) -> Self {
        let mut buf = Self::zeroed(len);
        rng.fill_bytes(&mut buf.0);
        buf
    }

    /// Grab the raw bytes.
    pub fn expose_secret(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub(crate) fn expose_secret_mut(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero and empty the buffer now instead of waiting for drop.
    pub fn wipe(&mut self) {
        self.0.zeroize();
        self.0.clear();
    }

    /// XOR two equal-length buffers into a new one.
    pub(crate) fn xor(&self, other: &[u8]) -> Option<SecureBuffer> {
        if self.len() != other.len() {
            return None;
        }
        Some(Self(self.0.iter().zip(other.iter()).map(|(a, b)| a ^ b).collect()))
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl ZeroizeOnDrop for SecureBuffer {}

impl From<&[u8]> for SecureBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl<const N: usize> From<&[u8; N]> for SecureBuffer {
    fn from(bytes: &[u8; N]) -> Self {
        Self::from_slice(bytes.as_slice())
    }
}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBuffer(<{} bytes>)", self.0.len())
    }
}

impl ConstantTimeEq for SecureBuffer {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.as_slice().ct_eq(other.0.as_slice())
    }
}

impl PartialEq for SecureBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).unwrap_u8() == 1
    }
}

impl Eq for SecureBuffer {}
