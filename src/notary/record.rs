//! A single row of the notary chain.

use crate::{
    chain::ChainRecord,
    crypto::base::{sha256_concat, EccKeyPair, EccPublicKey, SecureBuffer},
    error::{Error, Result},
    util::{ser, Timestamp},
};
use serde_derive::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Prefixed to the previous hash before a requestor signs it.
pub const NOTARIZE_PREFIX: &[u8] = b"Notarize-";

const HASH_LEN: RangeInclusive<usize> = 16..=64;
const IDENTITY_LEN: RangeInclusive<usize> = 3..=256;
const SIGNED_HASH_LEN: RangeInclusive<usize> = 16..=200;
const ALGORITHM_LEN: RangeInclusive<usize> = 1..=40;
const PUBLIC_KEY_LEN: RangeInclusive<usize> = 16..=600;
const NOTARY_SIGNATURE_LEN: RangeInclusive<usize> = 16..=200;

/// The bytes a requestor signs: `"Notarize-" || previous_hash`.
pub fn notarize_payload(previous_hash: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(NOTARIZE_PREFIX.len() + previous_hash.len());
    payload.extend_from_slice(NOTARIZE_PREFIX);
    payload.extend_from_slice(previous_hash);
    payload
}

/// Sign the notary chain's current previous hash, as a requestor does
/// before asking for a notarization.
pub fn sign_notarize_request(keypair: &EccKeyPair, secret: &SecureBuffer, previous_hash: &[u8]) -> Result<Vec<u8>> {
    keypair.sign(secret, &notarize_payload(previous_hash))
}

/// One notarized envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
#[serde(rename_all = "camelCase")]
pub struct NotaryChainRecord {
    row_id: u64,
    #[serde(with = "ser::human_bytes")]
    previous_hash: Vec<u8>,
    /// Who asked for the notarization
    identity: String,
    timestamp: Timestamp,
    /// The requestor's signature over `"Notarize-" || previous_hash`
    #[serde(with = "ser::human_bytes")]
    signed_previous_hash: Vec<u8>,
    algorithm: String,
    /// The requestor's key, as base64url JWK
    public_key_jwk_base64url: String,
    /// The raw signature bytes of the notary signature on the envelope
    #[serde(with = "ser::human_bytes")]
    notary_signature: Vec<u8>,
    #[serde(with = "ser::human_bytes")]
    record_hash: Vec<u8>,
}

impl NotaryChainRecord {
    /// Build a record, computing its hash. The row id is left at zero for the
    /// store to fill in.
    pub(crate) fn new(
        previous_hash: Vec<u8>,
        identity: String,
        timestamp: Timestamp,
        signed_previous_hash: Vec<u8>,
        algorithm: String,
        public_key_jwk_base64url: String,
        notary_signature: Vec<u8>,
    ) -> Self {
        let mut record = Self {
            row_id: 0,
            previous_hash,
            identity,
            timestamp,
            signed_previous_hash,
            algorithm,
            public_key_jwk_base64url,
            notary_signature,
            record_hash: Vec::new(),
        };
        record.record_hash = record.compute_hash().to_vec();
        record
    }

    /// Load the requestor's key.
    pub fn public_key(&self) -> Result<EccPublicKey> {
        EccPublicKey::from_jwk_base64url(&self.public_key_jwk_base64url)
    }
}

impl ChainRecord for NotaryChainRecord {
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

    /// `SHA-256(previous_hash || identity || timestamp (BE millis) || signed_previous_hash || algorithm || public_key || notary_signature)`
    fn compute_hash(&self) -> [u8; 32] {
        sha256_concat(&[
            self.previous_hash.as_slice(),
            self.identity.as_bytes(),
            &self.timestamp.to_be_bytes()[..],
            self.signed_previous_hash.as_slice(),
            self.algorithm.as_bytes(),
            self.public_key_jwk_base64url.as_bytes(),
            self.notary_signature.as_slice(),
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
        check("notarySignature", self.notary_signature.len(), NOTARY_SIGNATURE_LEN)?;
        check("recordHash", self.record_hash.len(), HASH_LEN)?;
        Ok(())
    }

    fn verify_signature(&self) -> bool {
        match self.public_key() {
            Ok(key) => key.verify_signature(&notarize_payload(&self.previous_hash), &self.signed_previous_hash),
            Err(_) => false,
        }
    }
}
