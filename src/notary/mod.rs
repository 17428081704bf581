//! The notary chain: a public, append-only log of every envelope the notary
//! has sealed. It is built exactly like the [key chain](crate::keychain),
//! one hash chain shared by every identity, but each row records a
//! notarization instead of a published key.
//!
//! Getting an envelope notarized goes like this:
//!
//! 1. the requestor collects signatures on a [`SignedEnvelope`]
//! 2. asks for [`NotaryLedger::previous_hash_to_sign`] and signs
//!    `"Notarize-" || previous_hash` (see [`sign_notarize_request`])
//! 3. calls [`NotaryLedger::notarize`] with the envelope, its key and that
//!    signature
//!
//! The ledger checks the envelope's signatures, seals it with the notary's
//! key, and records the notary signature in a new row. The envelope is only
//! changed if the row was written.

mod record;

pub use record::*;

use crate::{
    chain::{self, genesis_hash, verify_chain, ChainRecord, ChainStore, MemoryChainStore},
    config::NotaryConfig,
    crypto::{
        base::{ct_eq, EccKeyPair, EccPublicKey, SecureBuffer, SIGNATURE_ALGORITHM},
        signed::SignedEnvelope,
    },
    error::{Error, Result},
    identity::DomainName,
    util::Timestamp,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Notary chain rows, in memory.
pub type MemoryNotaryChainStore = MemoryChainStore<NotaryChainRecord>;

/// The notary and its chain, on top of some [`ChainStore`].
pub struct NotaryLedger<S: ChainStore<NotaryChainRecord>> {
    store: S,
    config: NotaryConfig,
    genesis: Vec<u8>,
    key: EccKeyPair,
    secret: SecureBuffer,
    /// Notarizations are read-the-tip-then-write, so only one runs at a time.
    writer: Mutex<()>,
}

impl<S: ChainStore<NotaryChainRecord>> NotaryLedger<S> {
    /// Create a ledger that notarizes with `key`, unwrapped by `secret`.
    pub fn new(store: S, config: NotaryConfig, key: EccKeyPair, secret: SecureBuffer) -> Self {
        let genesis = genesis_hash(&config.genesis_seed);
        Self {
            store,
            config,
            genesis,
            key,
            secret,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &NotaryConfig {
        &self.config
    }

    /// The notary's key pair. Its public half checks notary signatures.
    pub fn key(&self) -> &EccKeyPair {
        &self.key
    }

    /// The previous hash of the first record.
    pub fn genesis_hash(&self) -> &[u8] {
        &self.genesis
    }

    /// The hash a new record will link to. Requestors sign this.
    pub async fn previous_hash_to_sign(&self) -> Result<Vec<u8>> {
        Ok(match self.store.last().await? {
            Some(last) => last.record_hash().clone(),
            None => self.genesis.clone(),
        })
    }

    /// Notarize `envelope` on behalf of `requestor`.
    ///
    /// The envelope needs at least one signature, no notary yet, and every
    /// signature must verify. The requestor's signature must cover
    /// `"Notarize-" || previous_hash` for the current tip, and the requestor
    /// gets at most `max_notarizations` rows per window. On success the
    /// envelope comes back sealed and the new row is returned.
    pub async fn notarize(
        &self,
        envelope: &mut SignedEnvelope,
        requestor: &str,
        public_key_jwk_base64url: &str,
        signed_previous_hash: &[u8],
        algorithm: &str,
    ) -> Result<NotaryChainRecord> {
        self.notarize_at(envelope, requestor, public_key_jwk_base64url, signed_previous_hash, algorithm, Timestamp::now())
            .await
    }

    /// [`notarize`](Self::notarize) as of `now`, for the throttle. Row
    /// timestamps still never run behind the chain tip.
    pub(crate) async fn notarize_at(
        &self,
        envelope: &mut SignedEnvelope,
        requestor: &str,
        public_key_jwk_base64url: &str,
        signed_previous_hash: &[u8],
        algorithm: &str,
        now: Timestamp,
    ) -> Result<NotaryChainRecord> {
        let requestor = DomainName::new(requestor)?;
        if algorithm != SIGNATURE_ALGORITHM {
            Err(Error::LedgerRecordInvalid(format!("unsupported algorithm {}", algorithm)))?;
        }
        let public_key = EccPublicKey::from_jwk_base64url(public_key_jwk_base64url)?;
        if envelope.is_notarized() {
            Err(Error::EnvelopeAlreadyNotarized)?;
        }
        if self.config.max_notarizations == 0 {
            Err(Error::ConfigInvalid("maxNotarizations must be at least 1".into()))?;
        }
        let window = chain::interval("windowSecs", self.config.window_secs)?;

        let _guard = self.writer.lock().await;

        let earlier = self.store.all_for(requestor.as_str()).await?;
        let mut recent = Vec::new();
        for record in &earlier {
            let ages_out = chain::after("windowSecs", *record.timestamp(), window)?;
            if ages_out > now {
                recent.push(ages_out);
            }
        }
        let max = self.config.max_notarizations as usize;
        if recent.len() >= max {
            // the next slot opens when enough of the recent rows age out
            let opens = recent[recent.len() - max];
            let retry_after_secs = std::cmp::max(opens.signed_duration_since(*now).num_seconds(), 1);
            debug!(identity = %requestor, retry_after_secs, "notarization throttled");
            Err(Error::LedgerThrottled { retry_after_secs })?;
        }

        let tip = self.store.last().await?;
        let previous_hash = tip
            .as_ref()
            .map(|t| t.record_hash().clone())
            .unwrap_or_else(|| self.genesis.clone());
        if !public_key.verify_signature(&notarize_payload(&previous_hash), signed_previous_hash) {
            warn!(identity = %requestor, crc32c = public_key.crc32c(), "notarize request signature does not cover the ledger tip");
            Err(Error::CryptoSignatureVerificationFailed)?;
        }
        let timestamp = chain::next_timestamp(tip.as_ref(), now)?;

        let mut sealed = envelope.clone();
        let notary_signature = sealed
            .notarize(&self.config.identity, &self.secret, &self.key)?
            .signature()
            .clone();
        let record = NotaryChainRecord::new(
            previous_hash,
            requestor.to_string(),
            timestamp,
            signed_previous_hash.to_vec(),
            algorithm.into(),
            public_key_jwk_base64url.into(),
            notary_signature,
        );
        record.validate()?;

        let expected_tip = tip.as_ref().map(|t| t.record_hash().as_slice());
        let record = match self.store.append(record, expected_tip).await {
            Ok(record) => record,
            Err(err @ Error::LedgerForked { .. }) => {
                warn!(identity = %requestor, "ledger tip moved during notarization");
                Err(err)?
            }
            Err(err) => Err(err)?,
        };
        *envelope = sealed;
        info!(identity = %requestor, row_id = record.row_id(), nonce = %envelope.envelope().content_nonce_base64(), "notarized envelope into ledger");
        Ok(record)
    }

    /// The newest record in the ledger.
    pub async fn get_last(&self) -> Result<Option<NotaryChainRecord>> {
        self.store.last().await
    }

    /// Every notarization `identity` requested, oldest first.
    pub async fn get_all(&self, identity: &str) -> Result<Vec<NotaryChainRecord>> {
        let identity = DomainName::new(identity)?;
        self.store.all_for(identity.as_str()).await
    }

    /// The row recording this envelope's notarization, if the envelope checks
    /// out, was sealed by our notary, and made it into the ledger.
    pub async fn find(&self, envelope: &SignedEnvelope) -> Result<Option<NotaryChainRecord>> {
        let notary = match envelope.notary() {
            Some(notary) => notary,
            None => return Ok(None),
        };
        envelope.verify_all_detailed()?;
        if notary.identity() != &self.config.identity || !ct_eq(notary.public_key_der(), self.key.public().der()) {
            debug!(notary = %notary.identity(), "envelope was sealed by some other notary");
            return Ok(None);
        }
        let records = self.store.all().await?;
        Ok(records.into_iter().find(|r| ct_eq(r.notary_signature(), notary.signature())))
    }

    /// Walk the whole ledger from genesis to tip.
    pub async fn verify(&self) -> Result<()> {
        let records = self.store.all().await?;
        if let Err(err) = verify_chain(&records, &self.genesis) {
            warn!(error = %err, "notary chain does not verify");
            Err(err)?;
        }
        Ok(())
    }
}
