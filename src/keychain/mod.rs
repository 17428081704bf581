//! The key chain is a public, append-only log of the keys identities have
//! published. Each row carries the hash of the row before it, so rewriting
//! history anywhere breaks every link after that point, much like a
//! certificate transparency log.
//!
//! There is one chain shared by every identity: a new row always links to
//! the newest row in the whole ledger, whoever wrote it. Per-identity views
//! ([`KeyChainLedger::get_oldest`], [`KeyChainLedger::get_all`]) are just
//! filters over that one chain.
//!
//! Registering a key goes like this:
//!
//! 1. the registrant asks for [`KeyChainLedger::previous_hash_to_sign`]
//! 2. signs `"PublicKeyChain-" || previous_hash` with the key being published
//!    (see [`sign_previous_hash`])
//! 3. calls [`KeyChainLedger::append`] with the key and that signature
//!
//! If someone else appended in between, the signature no longer covers the
//! tip and the registrant has to start over.

mod record;

pub use record::*;

use crate::{
    chain::{self, genesis_hash, verify_chain, ChainRecord, ChainStore, MemoryChainStore},
    config::LedgerConfig,
    crypto::base::{ct_eq, EccPublicKey, SIGNATURE_ALGORITHM},
    error::{Error, Result},
    identity::DomainName,
    util::Timestamp,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// When a key was registered, and when (if ever) the identity registered
/// the key that replaced it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRegistration {
    pub created: Timestamp,
    pub successor_created: Option<Timestamp>,
}

/// Key chain rows, in memory.
pub type MemoryKeyChainStore = MemoryChainStore<KeyChainRecord>;

/// The key chain ledger, on top of some [`ChainStore`].
pub struct KeyChainLedger<S: ChainStore<KeyChainRecord>> {
    store: S,
    config: LedgerConfig,
    genesis: Vec<u8>,
    /// Appends are read-the-tip-then-write, so only one runs at a time.
    writer: Mutex<()>,
}

impl<S: ChainStore<KeyChainRecord>> KeyChainLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        let genesis = genesis_hash(&config.genesis_seed);
        Self {
            store,
            config,
            genesis,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The previous hash of the first record.
    pub fn genesis_hash(&self) -> &[u8] {
        &self.genesis
    }

    /// The hash a new record will link to: the tip's record hash, or the
    /// genesis hash for an empty ledger. Registrants sign this.
    pub async fn previous_hash_to_sign(&self) -> Result<Vec<u8>> {
        Ok(match self.store.last().await? {
            Some(last) => last.record_hash().clone(),
            None => self.genesis.clone(),
        })
    }

    /// Publish a key for `identity`. See [`append_at`](Self::append_at).
    pub async fn append(&self, identity: &str, public_key_jwk_base64url: &str, signed_previous_hash: &[u8], algorithm: &str) -> Result<KeyChainRecord> {
        self.append_at(identity, public_key_jwk_base64url, signed_previous_hash, algorithm, Timestamp::now())
            .await
    }

    /// Publish a key for `identity` as of `now`.
    ///
    /// The signature must be the published key's signature over
    /// `"PublicKeyChain-" || previous_hash` for the current tip, and the
    /// identity must not have registered a key within the configured
    /// interval. The record's timestamp comes from [`chain::next_timestamp`].
    pub(crate) async fn append_at(
        &self,
        identity: &str,
        public_key_jwk_base64url: &str,
        signed_previous_hash: &[u8],
        algorithm: &str,
        now: Timestamp,
    ) -> Result<KeyChainRecord> {
        let identity = DomainName::new(identity)?;
        if algorithm != SIGNATURE_ALGORITHM {
            Err(Error::LedgerRecordInvalid(format!("unsupported algorithm {}", algorithm)))?;
        }
        let public_key = EccPublicKey::from_jwk_base64url(public_key_jwk_base64url)?;

        let min_interval = chain::interval("minRegistrationIntervalSecs", self.config.min_registration_interval_secs)?;

        let _guard = self.writer.lock().await;

        if let Some(latest) = self.store.all_for(identity.as_str()).await?.last() {
            let allowed = chain::after("minRegistrationIntervalSecs", *latest.timestamp(), min_interval)?;
            if now < allowed {
                let retry_after_secs = std::cmp::max(allowed.signed_duration_since(*now).num_seconds(), 1);
                debug!(identity = %identity, retry_after_secs, "key registration throttled");
                Err(Error::LedgerThrottled { retry_after_secs })?;
            }
        }

        let tip = self.store.last().await?;
        let previous_hash = tip
            .as_ref()
            .map(|t| t.record_hash().clone())
            .unwrap_or_else(|| self.genesis.clone());
        if !public_key.verify_signature(&signing_payload(&previous_hash), signed_previous_hash) {
            warn!(identity = %identity, crc32c = public_key.crc32c(), "key registration signature does not cover the ledger tip");
            Err(Error::CryptoSignatureVerificationFailed)?;
        }
        let timestamp = chain::next_timestamp(tip.as_ref(), now)?;
        let record = KeyChainRecord::new(
            previous_hash,
            identity.to_string(),
            timestamp,
            signed_previous_hash.to_vec(),
            algorithm.into(),
            public_key_jwk_base64url.into(),
        );
        record.validate()?;

        let expected_tip = tip.as_ref().map(|t| t.record_hash().as_slice());
        let record = match self.store.append(record, expected_tip).await {
            Ok(record) => record,
            Err(err @ Error::LedgerForked { .. }) => {
                warn!(identity = %identity, "ledger tip moved during append");
                Err(err)?
            }
            Err(err) => Err(err)?,
        };
        info!(identity = %identity, row_id = record.row_id(), crc32c = public_key.crc32c(), "appended key to ledger");
        Ok(record)
    }

    /// The newest record in the ledger.
    pub async fn get_last(&self) -> Result<Option<KeyChainRecord>> {
        self.store.last().await
    }

    /// The first record `identity` ever published.
    pub async fn get_oldest(&self, identity: &str) -> Result<Option<KeyChainRecord>> {
        let identity = DomainName::new(identity)?;
        self.store.oldest_for(identity.as_str()).await
    }

    /// Every record for `identity`, oldest first.
    pub async fn get_all(&self, identity: &str) -> Result<Vec<KeyChainRecord>> {
        let identity = DomainName::new(identity)?;
        self.store.all_for(identity.as_str()).await
    }

    /// When `identity` first showed up in the ledger.
    pub async fn identity_age(&self, identity: &str) -> Result<Option<Timestamp>> {
        Ok(self.get_oldest(identity).await?.map(|r| *r.timestamp()))
    }

    /// Was this key published by `identity`? If so, when, and when was it
    /// superseded by the identity's next key?
    pub async fn verify_key(&self, identity: &str, public_key_jwk_base64url: &str) -> Result<Option<KeyRegistration>> {
        let wanted = EccPublicKey::from_jwk_base64url(public_key_jwk_base64url)?;
        let records = self.get_all(identity).await?;
        for (i, record) in records.iter().enumerate() {
            let published = match record.public_key() {
                Ok(key) => key,
                Err(_) => continue,
            };
            if ct_eq(published.der(), wanted.der()) {
                debug!(identity, row_id = record.row_id(), "found key in ledger");
                return Ok(Some(KeyRegistration {
                    created: *record.timestamp(),
                    successor_created: records.get(i + 1).map(|r| *r.timestamp()),
                }));
            }
        }
        Ok(None)
    }

    /// Walk the whole ledger from genesis to tip.
    pub async fn verify(&self) -> Result<()> {
        let records = self.store.all().await?;
        if let Err(err) = verify_chain(&records, &self.genesis) {
            warn!(error = %err, "key chain does not verify");
            Err(err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::base::{EccKeyPair, Lifetime, SecureBuffer};
    use chrono::Duration;
    use std::sync::Arc;

    struct Registrant {
        key: EccKeyPair,
        secret: SecureBuffer,
    }

    impl Registrant {
        fn new() -> Self {
            let mut rng = crate::util::test::rng();
            let secret = SecureBuffer::random(&mut rng, 16);
            let key = EccKeyPair::generate(&mut rng, &secret, Lifetime::hours(1), &()).unwrap();
            Self { key, secret }
        }

        fn jwk(&self) -> String {
            self.key.public().to_jwk_base64url().unwrap()
        }

        async fn register<S: ChainStore<KeyChainRecord>>(&self, ledger: &KeyChainLedger<S>, identity: &str) -> Result<KeyChainRecord> {
            let previous = ledger.previous_hash_to_sign().await?;
            let signed = sign_previous_hash(&self.key, &self.secret, &previous)?;
            ledger.append(identity, &self.jwk(), &signed, SIGNATURE_ALGORITHM).await
        }
    }

    fn unthrottled() -> LedgerConfig {
        LedgerConfig {
            min_registration_interval_secs: 0,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn chain_links_from_genesis_to_tip() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        assert_eq!(ledger.get_last().await.unwrap(), None);
        assert_eq!(ledger.previous_hash_to_sign().await.unwrap(), ledger.genesis_hash().to_vec());

        let identities = ["frank.example", "alice.example", "frank.example", "bob.example", "alice.example"];
        for identity in identities.iter() {
            Registrant::new().register(&ledger, identity).await.unwrap();
        }

        let records = ledger.store().all().await.unwrap();
        assert_eq!(records.len(), identities.len());
        assert_eq!(records[0].previous_hash().as_slice(), ledger.genesis_hash());
        for pair in records.windows(2) {
            assert_eq!(pair[0].compute_hash().to_vec(), pair[1].previous_hash().clone());
            assert!(pair[1].timestamp() > pair[0].timestamp());
            assert!(pair[1].row_id() > pair[0].row_id());
        }
        ledger.verify().await.unwrap();
        assert_eq!(ledger.get_last().await.unwrap().as_ref(), records.last());
    }

    #[tokio::test]
    async fn per_identity_reads() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        let frank1 = Registrant::new();
        let frank2 = Registrant::new();
        let alice = Registrant::new();
        let r1 = frank1.register(&ledger, "frank.example").await.unwrap();
        alice.register(&ledger, "alice.example").await.unwrap();
        let r3 = frank2.register(&ledger, "Frank.Example").await.unwrap();
        assert_eq!(r3.identity(), "frank.example");

        assert_eq!(ledger.get_oldest("frank.example").await.unwrap(), Some(r1.clone()));
        assert_eq!(ledger.get_all("frank.example").await.unwrap(), vec![r1.clone(), r3.clone()]);
        assert_eq!(ledger.identity_age("frank.example").await.unwrap(), Some(*r1.timestamp()));
        assert_eq!(ledger.identity_age("nobody.example").await.unwrap(), None);

        let first = ledger.verify_key("frank.example", &frank1.jwk()).await.unwrap().unwrap();
        assert_eq!(first.created, *r1.timestamp());
        assert_eq!(first.successor_created, Some(*r3.timestamp()));
        let second = ledger.verify_key("frank.example", &frank2.jwk()).await.unwrap().unwrap();
        assert_eq!(second.successor_created, None);
        assert_eq!(ledger.verify_key("frank.example", &alice.jwk()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_ignore_identity_case() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        let frank = Registrant::new();
        let record = frank.register(&ledger, "Frank.Example").await.unwrap();
        assert_eq!(record.identity(), "frank.example");

        for spelling in ["frank.example", "Frank.Example", "FRANK.EXAMPLE"] {
            assert_eq!(ledger.get_oldest(spelling).await.unwrap(), Some(record.clone()));
            assert_eq!(ledger.get_all(spelling).await.unwrap(), vec![record.clone()]);
            assert_eq!(ledger.identity_age(spelling).await.unwrap(), Some(*record.timestamp()));
            let found = ledger.verify_key(spelling, &frank.jwk()).await.unwrap();
            assert_eq!(found.map(|r| r.created), Some(*record.timestamp()));
        }
        let res = ledger.get_all("not a domain").await;
        assert!(matches!(res, Err(Error::IdentityInvalid(_))));
    }

    #[tokio::test]
    async fn signature_must_cover_the_tip() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        let frank = Registrant::new();
        let alice = Registrant::new();

        // frank signs the tip, alice gets in first, frank's signature is stale
        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&frank.key, &frank.secret, &previous).unwrap();
        alice.register(&ledger, "alice.example").await.unwrap();
        let res = ledger.append("frank.example", &frank.jwk(), &signed, SIGNATURE_ALGORITHM).await;
        assert_eq!(res.as_ref().err(), Some(&Error::CryptoSignatureVerificationFailed));
        assert!(res.unwrap_err().is_security());

        // signed by a key other than the one being published
        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&alice.key, &alice.secret, &previous).unwrap();
        let res = ledger.append("frank.example", &frank.jwk(), &signed, SIGNATURE_ALGORITHM).await;
        assert_eq!(res.err(), Some(Error::CryptoSignatureVerificationFailed));

        assert_eq!(ledger.store().all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_input_is_rejected_before_anything_else() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        let frank = Registrant::new();
        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&frank.key, &frank.secret, &previous).unwrap();

        let res = ledger.append("frank", &frank.jwk(), &signed, SIGNATURE_ALGORITHM).await;
        assert!(matches!(res, Err(Error::IdentityInvalid(_))));
        let res = ledger.append("frank.example", &frank.jwk(), &signed, "SHA-256withRSA").await;
        assert!(matches!(res, Err(Error::LedgerRecordInvalid(_))));
        let res = ledger.append("frank.example", "bm90IGEga2V5", &signed, SIGNATURE_ALGORITHM).await;
        assert!(matches!(res, Err(Error::JwkInvalid(_))));
        assert!(ledger.get_last().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn registrations_are_throttled() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), LedgerConfig::default());
        let frank1 = Registrant::new();
        let frank2 = Registrant::new();
        let now = Timestamp::now();

        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&frank1.key, &frank1.secret, &previous).unwrap();
        ledger
            .append_at("frank.example", &frank1.jwk(), &signed, SIGNATURE_ALGORITHM, now)
            .await
            .unwrap();

        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&frank2.key, &frank2.secret, &previous).unwrap();
        let res = ledger
            .append_at("frank.example", &frank2.jwk(), &signed, SIGNATURE_ALGORITHM, now.add(Duration::days(29)))
            .await;
        match res {
            Err(Error::LedgerThrottled { retry_after_secs }) => assert_eq!(retry_after_secs, 24 * 60 * 60),
            _ => panic!("expected throttle, got {:?}", res),
        }
        // other identities aren't affected
        Registrant::new().register(&ledger, "alice.example").await.unwrap();

        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&frank2.key, &frank2.secret, &previous).unwrap();
        ledger
            .append_at("frank.example", &frank2.jwk(), &signed, SIGNATURE_ALGORITHM, now.add(Duration::days(30)))
            .await
            .unwrap();
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn interval_out_of_range_is_a_config_error() {
        let config = LedgerConfig {
            min_registration_interval_secs: i64::MAX,
            ..LedgerConfig::default()
        };
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), config);
        let res = Registrant::new().register(&ledger, "frank.example").await;
        assert!(matches!(res, Err(Error::ConfigInvalid(_))));

        // fits in a Duration, but not once added to a timestamp
        let config = LedgerConfig {
            min_registration_interval_secs: Duration::MAX.num_seconds(),
            ..LedgerConfig::default()
        };
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), config);
        Registrant::new().register(&ledger, "frank.example").await.unwrap();
        let res = Registrant::new().register(&ledger, "frank.example").await;
        assert!(matches!(res, Err(Error::ConfigInvalid(_))));
        assert_eq!(ledger.store().all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_tip_from_the_future_stops_appends() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        let frank = Registrant::new();
        let previous = ledger.previous_hash_to_sign().await.unwrap();
        let signed = sign_previous_hash(&frank.key, &frank.secret, &previous).unwrap();
        let future = Timestamp::now().add(Duration::hours(1));
        ledger
            .append_at("frank.example", &frank.jwk(), &signed, SIGNATURE_ALGORITHM, future)
            .await
            .unwrap();

        // the next writer is not stamped an hour ahead, it is refused
        let res = Registrant::new().register(&ledger, "alice.example").await;
        match res {
            Err(Error::LedgerClockSkew { ahead_ms }) => assert!(ahead_ms > 59 * 60 * 1000),
            _ => panic!("expected clock skew, got {:?}", res),
        }
        assert_eq!(ledger.store().all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timestamps_always_increase() {
        let ledger = KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled());
        let now = Timestamp::now();
        let mut last = None;
        for identity in ["a.example", "b.example", "c.example"] {
            let registrant = Registrant::new();
            let previous = ledger.previous_hash_to_sign().await.unwrap();
            let signed = sign_previous_hash(&registrant.key, &registrant.secret, &previous).unwrap();
            // same clock reading every time
            let record = ledger
                .append_at(identity, &registrant.jwk(), &signed, SIGNATURE_ALGORITHM, now)
                .await
                .unwrap();
            if let Some(prev) = last {
                assert_eq!(*record.timestamp(), Timestamp::add(&prev, Duration::milliseconds(1)));
            }
            last = Some(*record.timestamp());
        }
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_appends_never_fork() {
        let ledger = Arc::new(KeyChainLedger::new(MemoryKeyChainStore::new(), unthrottled()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let registrant = Registrant::new();
                let identity = format!("user{}.example", i);
                // retry until our signature covers the tip we land on
                loop {
                    match registrant.register(&ledger, &identity).await {
                        Ok(record) => return record,
                        Err(Error::CryptoSignatureVerificationFailed) => continue,
                        Err(e) => panic!("unexpected error: {:?}", e),
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let records = ledger.store().all().await.unwrap();
        assert_eq!(records.len(), 8);
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn tampered_store_fails_verification() {
        let store = MemoryKeyChainStore::new();
        let ledger = KeyChainLedger::new(store.clone(), unthrottled());
        for identity in ["a.example", "b.example", "c.example"] {
            Registrant::new().register(&ledger, identity).await.unwrap();
        }
        ledger.verify().await.unwrap();
        {
            let mut rows = store.rows_for_test();
            *rows[1].identity_mut() = "mallory.example".into();
        }
        assert_eq!(ledger.verify().await, Err(Error::LedgerChainBroken(2)));
    }
}
