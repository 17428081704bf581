//! Two ways of protecting a symmetric secret at rest.
//!
//! - [`XorWrapped`] splits a secret into two halves. One half is handed out,
//!   the other (XOR'd with the secret) is stored. You need both to get the
//!   secret back. This is our two-party escrow.
//! - [`AesWrapped`] encrypts a secret under a single wrapping key with
//!   AES-CBC. This is our single-party escrow.
//!
//! Both store a reduced hash of the unwrapping key so a wrong key is caught
//! before any decryption happens, and both are immutable values: the only way
//! to get one is to wrap something, so there is no way to wrap twice into the
//! same value and silently swap out the secret it protects.

use crate::{
    crypto::base::{ct_eq, key_hash, SecureBuffer},
    error::{Error, Result},
};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};
use tracing::warn;

/// Length of the AES-CBC initialization vector.
pub const AES_IV_LEN: usize = 16;

fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| Error::CryptoBadKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| Error::CryptoBadKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| Error::CryptoBadKey)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => Err(Error::BadLength)?,
    };
    Ok(ciphertext)
}

fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<SecureBuffer> {
    let plaintext = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| Error::CryptoBadKey)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| Error::CryptoBadKey)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| Error::CryptoBadKey)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => Err(Error::BadLength)?,
    };
    plaintext.map(SecureBuffer::new).map_err(|_| Error::CryptoOpenFailed)
}

/// A secret split in two with XOR.
///
/// Holds `secret XOR half` along with the key hash of `half`. Whoever holds
/// `half` can [reconstruct](XorWrapped::reconstruct) the secret; whoever holds
/// this value alone learns nothing about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
#[serde(rename_all = "camelCase")]
pub struct XorWrapped {
    /// `secret XOR half`
    #[serde(with = "crate::util::ser::human_bytes")]
    ciphertext: Vec<u8>,
    /// Key hash of the half needed to reconstruct.
    #[serde(with = "crate::util::ser::human_bytes")]
    key_hash: Vec<u8>,
}

impl XorWrapped {
    /// Split a secret. Returns the stored side and a fresh random half the
    /// same length as the secret. Hand the half to the other party.
    pub fn split<R: RngCore + CryptoRng>(rng: &mut R, secret: &SecureBuffer) -> Result<(Self, SecureBuffer)> {
        let half = SecureBuffer::random(rng, secret.len());
        let wrapped = Self::wrap(secret, &half)?;
        Ok((wrapped, half))
    }

    /// Wrap a secret under a half key the caller already has.
    pub fn wrap(secret: &SecureBuffer, half: &SecureBuffer) -> Result<Self> {
        if secret.is_empty() {
            Err(Error::BadLength)?;
        }
        let ciphertext = secret.xor(half.expose_secret()).ok_or(Error::BadLength)?;
        Ok(Self {
            ciphertext: ciphertext.expose_secret().to_vec(),
            key_hash: key_hash(half.expose_secret()).to_vec(),
        })
    }

    /// Given two halves that XOR to a secret, rebuild the secret and wrap it
    /// under the remote half, so the remote party alone can unwrap it later.
    pub fn combine(local_half: &SecureBuffer, remote_half: &SecureBuffer) -> Result<Self> {
        let secret = local_half.xor(remote_half.expose_secret()).ok_or(Error::BadLength)?;
        Self::wrap(&secret, remote_half)
    }

    /// Does this half hash to the one we stored?
    pub fn matches_key(&self, half: &SecureBuffer) -> bool {
        ct_eq(&key_hash(half.expose_secret()), &self.key_hash)
    }

    /// Get the secret back using the other half.
    pub fn reconstruct(&self, half: &SecureBuffer) -> Result<SecureBuffer> {
        if !self.matches_key(half) {
            warn!("xor unwrap attempted with the wrong half key");
            Err(Error::CryptoWrongKey)?;
        }
        half.xor(&self.ciphertext).ok_or(Error::CryptoWrongKey)
    }
}

/// A secret encrypted with AES-CBC under a caller-supplied wrapping key.
///
/// Stores the ciphertext, the IV, and `keyhash(wrapping_key) XOR iv` as a tag
/// we check before decrypting.
///
/// A wrapped value can't be wrapped again. Wrapping only exists as a
/// constructor:
///
/// ```compile_fail
/// use trust_core::crypto::base::{rng_chacha20, AesWrapped, SecureBuffer};
/// let mut rng = rng_chacha20();
/// let key = SecureBuffer::from(&[1u8; 16]);
/// let wrapped = AesWrapped::wrap(&mut rng, &SecureBuffer::from(b"secret"), &key).unwrap();
/// wrapped.wrap(&mut rng, &SecureBuffer::from(b"another secret"), &key);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
#[serde(rename_all = "camelCase")]
pub struct AesWrapped {
    #[serde(with = "crate::util::ser::human_bytes")]
    ciphertext: Vec<u8>,
    #[serde(with = "crate::util::ser::human_bytes")]
    iv: Vec<u8>,
    /// `keyhash(wrapping_key) XOR iv`
    #[serde(with = "crate::util::ser::human_bytes")]
    key_tag: Vec<u8>,
}

impl AesWrapped {
    fn tag(wrapping_key: &[u8], iv: &[u8]) -> Vec<u8> {
        key_hash(wrapping_key)
            .iter()
            .zip(iv.iter())
            .map(|(a, b)| a ^ b)
            .collect()
    }

    /// Encrypt a secret under a wrapping key (16, 24 or 32 bytes).
    pub fn wrap<R: RngCore + CryptoRng>(rng: &mut R, secret: &SecureBuffer, wrapping_key: &SecureBuffer) -> Result<Self> {
        let mut iv = [0u8; AES_IV_LEN];
        rng.fill_bytes(&mut iv);
        let ciphertext = aes_cbc_encrypt(wrapping_key.expose_secret(), &iv, secret.expose_secret())?;
        Ok(Self {
            ciphertext,
            key_tag: Self::tag(wrapping_key.expose_secret(), &iv),
            iv: iv.to_vec(),
        })
    }

    /// Whether the given wrapping key is the one this value was wrapped with.
    pub fn matches_key(&self, wrapping_key: &SecureBuffer) -> bool {
        self.iv.len() == AES_IV_LEN && ct_eq(&Self::tag(wrapping_key.expose_secret(), &self.iv), &self.key_tag)
    }

    /// Decrypt the secret. Fails with [`Error::CryptoWrongKey`] if the key's
    /// hash doesn't match, before trying to decrypt.
    pub fn unwrap(&self, wrapping_key: &SecureBuffer) -> Result<SecureBuffer> {
        if !self.matches_key(wrapping_key) {
            warn!("aes unwrap attempted with the wrong wrapping key");
            Err(Error::CryptoWrongKey)?;
        }
        aes_cbc_decrypt(wrapping_key.expose_secret(), &self.iv, &self.ciphertext)
    }

    /// Unwrap with one key and wrap again under another.
    pub fn rewrap<R: RngCore + CryptoRng>(&self, rng: &mut R, old_key: &SecureBuffer, new_key: &SecureBuffer) -> Result<Self> {
        let secret = self.unwrap(old_key)?;
        Self::wrap(rng, &secret, new_key)
    }

    #[cfg(test)]
    pub(crate) fn iv_mut(&mut self) -> &mut Vec<u8> {
        &mut self.iv
    }
}
