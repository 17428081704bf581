//! The crypto base wraps the primitives the rest of the crate is built on:
//! secure buffers for sensitive bytes, hashing, the two key wrapping schemes
//! and the P-384 key pair.
//!
//! The idea here is that specific algorithms are wrapped in descriptive
//! interfaces so the envelope, attestation and ledger code never has to know
//! which AES mode or which curve encoding sits underneath.

use crate::error::{Error, Result};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore, SeedableRng};
use sha2::Sha256;

mod hash;
mod key_pair;
mod key_wrap;
mod public_key;
mod secure;

pub use hash::*;
pub use key_pair::*;
pub use key_wrap::*;
pub use public_key::*;
pub use secure::*;

/// Smallest salt we accept for ECDH key stretching.
pub const MIN_SALT_LEN: usize = 16;

/// A convenience function that returns a ChaCha20 CSRNG seeded with OS random bytes. Use this if
/// you want a nice, strong random number generator, you don't want to wire one up yourself, and
/// your platform provides good entropy.
///
/// This can be used as an input to any function here that accepts `&mut rng`. Otherwise, you can
/// bring your own RNG that implements [`RngCore`] + [`rand::CryptoRng`].
pub fn rng_chacha20() -> rand_chacha::ChaCha20Rng {
    let mut seed_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut seed_bytes);
    rand_chacha::ChaCha20Rng::from_seed(seed_bytes)
}

/// Given some input key material, derive a key of `len` bytes with HKDF-SHA256.
///
/// The salt is required and must be at least [`MIN_SALT_LEN`] bytes. Info is
/// left empty.
pub fn stretch_key(input: &[u8], salt: &[u8], len: usize) -> Result<SecureBuffer> {
    if salt.len() < MIN_SALT_LEN {
        Err(Error::CryptoBadSalt(MIN_SALT_LEN))?;
    }
    let hkdf = Hkdf::<Sha256>::new(Some(salt), input);
    let mut output = SecureBuffer::zeroed(len);
    hkdf.expand(&[], output.expose_secret_mut())
        .map_err(|_| Error::CryptoKdfFailed)?;
    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn key_stretcher() {
        let secret1 = [182u8, 32, 38, 195, 3, 106, 177, 19, 174, 37, 56, 19, 163, 193, 155, 49];
        let salt1 = [7u8; 16];
        let salt2 = [8u8; 16];

        let out1 = stretch_key(&secret1, &salt1, 16).unwrap();
        let out1_again = stretch_key(&secret1, &salt1, 16).unwrap();
        let out2 = stretch_key(&secret1, &salt2, 16).unwrap();
        assert_eq!(out1.len(), 16);
        assert_eq!(out1, out1_again);
        assert!(out1 != out2);

        // longer outputs share a prefix with shorter ones (same prk, same info)
        let out3 = stretch_key(&secret1, &salt1, 42).unwrap();
        assert_eq!(&out3.expose_secret()[0..16], out1.expose_secret());
    }

    #[test]
    fn key_stretcher_rejects_short_salt() {
        let res = stretch_key(b"hi im jerry", b"too short", 16);
        assert_eq!(res.err(), Some(Error::CryptoBadSalt(16)));
        let res = stretch_key(b"hi im jerry", b"", 16);
        assert!(res.is_err());
    }
}
