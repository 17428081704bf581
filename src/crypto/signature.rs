//! Signatures that carry everything needed to check them.
//!
//! A [`Signature`] binds a hash of some data to an identity, the public key
//! that identity signed with, and a time. The public key travels inside the
//! signature, so verifying never needs a key lookup. Whether that key really
//! belongs to the named identity is a separate question, answered by the key
//! chain ledger.

use crate::{
    crypto::base::{sha256, EccKeyPair, EccPublicKey, SecureBuffer, HASH_ALGORITHM, SIGNATURE_ALGORITHM},
    error::Result,
    util::{ser, Timestamp},
};
use serde_derive::{Deserialize, Serialize};

/// A self-describing signature over some data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Hash of the data that was signed
    #[serde(with = "ser::human_bytes")]
    data_hash: Vec<u8>,
    /// Name of the hash behind `data_hash`
    hash_algorithm: String,
    /// Who claims to have signed
    identity: String,
    /// The signer's public key (DER)
    #[serde(with = "ser::human_bytes")]
    public_key_der: Vec<u8>,
    /// When the signature was made
    timestamp: Timestamp,
    /// Name of the signature scheme
    signature_algorithm: String,
    /// The signature itself (DER ECDSA)
    #[serde(with = "ser::human_bytes")]
    signature: Vec<u8>,
}

impl Signature {
    /// Sign some data as `identity` with the given key pair.
    pub fn create(data: &[u8], identity: &str, secret: &SecureBuffer, keypair: &EccKeyPair) -> Result<Self> {
        Self::create_at(data, identity, secret, keypair, Timestamp::now())
    }

    /// Sign with a given timestamp recorded in the signature. Whether the
    /// key is alive is still decided by the real clock.
    pub(crate) fn create_at(data: &[u8], identity: &str, secret: &SecureBuffer, keypair: &EccKeyPair, timestamp: Timestamp) -> Result<Self> {
        let mut sig = Self {
            data_hash: sha256(data).to_vec(),
            hash_algorithm: HASH_ALGORITHM.into(),
            identity: identity.into(),
            public_key_der: keypair.public().der().clone(),
            timestamp,
            signature_algorithm: SIGNATURE_ALGORITHM.into(),
            signature: Vec::new(),
        };
        sig.signature = keypair.sign(secret, &sig.signed_bytes())?;
        Ok(sig)
    }

    /// The exact bytes the signature covers:
    ///
    /// `data_hash || hash_algorithm || identity || public_key_der || timestamp (u64 BE millis) || signature_algorithm`
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            self.data_hash.len()
                + self.hash_algorithm.len()
                + self.identity.len()
                + self.public_key_der.len()
                + 8
                + self.signature_algorithm.len(),
        );
        bytes.extend_from_slice(&self.data_hash);
        bytes.extend_from_slice(self.hash_algorithm.as_bytes());
        bytes.extend_from_slice(self.identity.as_bytes());
        bytes.extend_from_slice(&self.public_key_der);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(self.signature_algorithm.as_bytes());
        bytes
    }

    /// Load the embedded public key.
    pub fn public_key(&self) -> Result<EccPublicKey> {
        EccPublicKey::from_der(&self.public_key_der)
    }

    /// Check the signature against its embedded public key. This does not
    /// look at any data, only at the fields of the signature itself.
    pub fn verify(&self) -> bool {
        match self.public_key() {
            Ok(key) => key.verify_signature(&self.signed_bytes(), &self.signature),
            Err(_) => false,
        }
    }

    /// Check the signature, and that it was made over `data`.
    pub fn verify_data(&self, data: &[u8]) -> bool {
        self.hash_algorithm == HASH_ALGORITHM && sha256(data).as_slice() == self.data_hash.as_slice() && self.verify()
    }
}
