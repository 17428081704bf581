//! An envelope with any number of signatures on it, and maybe a notary.
//!
//! Signers each sign the envelope's canonical json. A notary signs something
//! bigger: the envelope *and* the signatures present at the time, after
//! checking every one of them. Once notarized, the envelope is closed. No
//! more signatures and no second notary.
//!
//! ```text
//! unsigned --add_signature--> signed(n) --notarize--> notarized
//! ```

use crate::{
    crypto::{
        base::{EccKeyPair, SecureBuffer},
        envelope::Envelope,
        signature::Signature,
    },
    error::{Error, Result},
    util::ser,
};
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

/// The signed envelope format version we produce.
pub const SIGNED_ENVELOPE_VERSION: u16 = 1;

/// What the notary signs. Built from borrowed parts so the notary signature
/// can never end up covering itself.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotaryPayload<'a> {
    envelope: &'a Envelope,
    signatures: &'a Vec<Signature>,
}

/// An envelope plus signatures, kept in timestamp order, and an optional
/// notary signature.
///
/// This type is not internally synchronized. Wrap it in a lock if more than
/// one caller mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    version: u16,
    envelope: Envelope,
    /// Sorted by timestamp, oldest first.
    signatures: Vec<Signature>,
    notary: Option<Signature>,
}

impl SignedEnvelope {
    /// Start with an envelope and no signatures.
    pub fn new(envelope: Envelope) -> Self {
        Self {
            version: SIGNED_ENVELOPE_VERSION,
            envelope,
            signatures: Vec::new(),
            notary: None,
        }
    }

    pub fn is_notarized(&self) -> bool {
        self.notary.is_some()
    }

    /// Sign the envelope as `identity` and add the signature to the list.
    pub fn add_signature(&mut self, identity: &str, secret: &SecureBuffer, keypair: &EccKeyPair) -> Result<&Signature> {
        if self.is_notarized() {
            Err(Error::EnvelopeNotarized)?;
        }
        let data = self.envelope.canonical_json()?;
        let signature = Signature::create(&data, identity, secret, keypair)?;
        self.insert_signature(signature)
    }

    /// Add an already-made signature, keeping the list in order.
    pub(crate) fn insert_signature(&mut self, signature: Signature) -> Result<&Signature> {
        if self.is_notarized() {
            Err(Error::EnvelopeNotarized)?;
        }
        let pos = self.signatures.partition_point(|s| s.timestamp() <= signature.timestamp());
        self.signatures.insert(pos, signature);
        Ok(&self.signatures[pos])
    }

    /// The bytes a notary signs.
    pub fn notary_payload(&self) -> Result<Vec<u8>> {
        ser::to_json_vec(&NotaryPayload {
            envelope: &self.envelope,
            signatures: &self.signatures,
        })
    }

    fn verify_signatures(&self) -> Result<()> {
        if self.signatures.is_empty() {
            Err(Error::EnvelopeUnsigned)?;
        }
        // deserialized envelopes didn't go through insert_signature
        if !self.signatures.windows(2).all(|pair| pair[0].timestamp() <= pair[1].timestamp()) {
            Err(Error::EnvelopeUnordered)?;
        }
        let data = self.envelope.canonical_json()?;
        for sig in &self.signatures {
            if !sig.verify_data(&data) {
                Err(Error::SignatureInvalid {
                    identity: sig.identity().clone(),
                })?;
            }
        }
        Ok(())
    }

    /// Verify every signature and the notary (if any), stopping at the first
    /// failure and naming whose signature failed.
    pub fn verify_all_detailed(&self) -> Result<()> {
        self.verify_signatures()?;
        if let Some(notary) = self.notary.as_ref() {
            if !notary.verify_data(&self.notary_payload()?) {
                Err(Error::SignatureInvalid {
                    identity: notary.identity().clone(),
                })?;
            }
        }
        Ok(())
    }

    /// Does everything on this envelope check out? An envelope with no
    /// signatures does not.
    pub fn verify_all(&self) -> bool {
        self.verify_all_detailed().is_ok()
    }

    /// Check every signature, then sign the envelope along with its
    /// signatures as the notary. Only ever once.
    pub fn notarize(&mut self, identity: &str, secret: &SecureBuffer, keypair: &EccKeyPair) -> Result<&Signature> {
        if self.is_notarized() {
            warn!(notary = identity, "attempt to notarize an envelope twice");
            Err(Error::EnvelopeAlreadyNotarized)?;
        }
        if let Err(err) = self.verify_signatures() {
            warn!(notary = identity, error = %err, "refusing to notarize an envelope that doesn't verify");
            Err(err)?;
        }
        let notary = Signature::create(&self.notary_payload()?, identity, secret, keypair)?;
        info!(notary = identity, signatures = self.signatures.len(), nonce = %self.envelope.content_nonce_base64(), "notarized envelope");
        Ok(&*self.notary.insert(notary))
    }
}
