//! A single row of the key chain.

use crate::{
    chain::ChainRecord,
    crypto::base::{sha256_concat, EccKeyPair, EccPublicKey, SecureBuffer},
    error::{Error, Result},
    util::{ser, Timestamp},
};
use serde_derive::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Prefixed to the previous hash before a registrant signs it.
pub const SIGNING_PREFIX: &[u8] = b"PublicKeyChain-";

const HASH_LEN: RangeInclusive<usize> = 16..=64;
const IDENTITY_LEN: RangeInclusive<usize> = 3..=256;
const SIGNED_HASH_LEN: RangeInclusive<usize> = 16..=200;
const ALGORITHM_LEN: RangeInclusive<usize> = 1..=40;
const PUBLIC_KEY_LEN: RangeInclusive<usize> = 16..=500;

/// The bytes a registrant signs: `"PublicKeyChain-" || previous_hash`.
pub fn signing_payload(previous_hash: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(SIGNING_PREFIX.len() + previous_hash.len());
    payload.extend_from_slice(SIGNING_PREFIX);
    payload.extend_from_slice(previous_hash);
    payload
}

/// Sign the ledger's current previous hash, as a registrant does before
/// publishing a key.
pub fn sign_previous_hash(keypair: &EccKeyPair, secret: &SecureBuffer, previous_hash: &[u8]) -> Result<Vec<u8>> {
    keypair.sign(secret, &signing_payload(previous_hash))
}

/// One published public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
#[serde(rename_all = "camelCase")]
pub struct KeyChainRecord {
    /// Assigned by storage, increases with every append.
    row_id: u64,
    /// The record hash of the row before this one (any identity), or the
    /// genesis hash.
    #[serde(with = "ser::human_bytes")]
    previous_hash: Vec<u8>,
    /// Who published the key
    identity: String,
    timestamp: Timestamp,
    /// The registrant's signature over `"PublicKeyChain-" || previous_hash`
    #[serde(with = "ser::human_bytes")]
    signed_previous_hash: Vec<u8>,
    /// Signature algorithm name
    algorithm: String,
    /// The published key, as base64url JWK
    public_key_jwk_base64url: String,
    /// Hash over every other field except `row_id`
    #[serde(with = "ser::human_bytes")]
    record_hash: Vec<u8>,
}

impl KeyChainRecord {
    /// Build a record, computing its hash. The row id is left at zero for the
    /// store to fill in.
    pub(crate) fn new(
        previous_hash: Vec<u8>,
        identity: String,
        timestamp: Timestamp,
        signed_previous_hash: Vec<u8>,
        algorithm: String,
        public_key_jwk_base64url: String,
    ) -> Self {
        let mut record = Self {
            row_id: 0,
            previous_hash,
            identity,
            timestamp,
            signed_previous_hash,
            algorithm,
            public_key_jwk_base64url,
            record_hash: Vec::new(),
        };
        record.record_hash = record.compute_hash().to_vec();
        record
    }

    /// Load the published key.
    pub fn public_key(&self) -> Result<EccPublicKey> {
        EccPublicKey::from_jwk_base64url(&self.public_key_jwk_base64url)
    }
}

impl ChainRecord for KeyChainRecord {
    fn row_id(&self) -> u64 {
        self.row_id
    }

    fn set_row_id(&mut self, row_id: u64) {
        self.row_id = row_id;
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn previous_hash(&self) -> &[u8] {
        &self.previous_hash
    }

    fn record_hash(&self) -> &[u8] {
        &self.record_hash
    }

    /// `SHA-256(previous_hash || identity || timestamp (BE millis) || signed_previous_hash || algorithm || public_key)`
    fn compute_hash(&self) -> [u8; 32] {
        sha256_concat(&[
            self.previous_hash.as_slice(),
            self.identity.as_bytes(),
            &self.timestamp.to_be_bytes()[..],
            self.signed_previous_hash.as_slice(),
            self.algorithm.as_bytes(),
            self.public_key_jwk_base64url.as_bytes(),
        ])
    }

    fn validate(&self) -> Result<()> {
        let check = |name: &str, len: usize, range: RangeInclusive<usize>| -> Result<()> {
            if range.contains(&len) {
                Ok(())
            } else {
                Err(Error::LedgerRecordInvalid(format!("{} has bad length {}", name, len)))
            }
        };
        check("previousHash", self.previous_hash.len(), HASH_LEN)?;
        check("identity", self.identity.len(), IDENTITY_LEN)?;
        check("signedPreviousHash", self.signed_previous_hash.len(), SIGNED_HASH_LEN)?;
        check("algorithm", self.algorithm.len(), ALGORITHM_LEN)?;
        check("publicKeyJwkBase64url", self.public_key_jwk_base64url.len(), PUBLIC_KEY_LEN)?;
        check("recordHash", self.record_hash.len(), HASH_LEN)?;
        Ok(())
    }

    /// Checks the registrant's signature over `"PublicKeyChain-" || previous_hash`.
    fn verify_signature(&self) -> bool {
        match self.public_key() {
            Ok(key) => key.verify_signature(&signing_payload(&self.previous_hash), &self.signed_previous_hash),
            Err(_) => false,
        }
    }
}
