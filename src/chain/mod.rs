//! The machinery shared by our append-only ledgers.
//!
//! A ledger is one hash chain: every row carries the record hash of the row
//! before it (whoever wrote it), and the first row links to a genesis hash
//! derived from a configured seed. Each ledger defines its own row type by
//! implementing [`ChainRecord`]. Storage, chain verification and the ledger
//! clock live here.

mod store;

pub use store::*;

use crate::{
    crypto::base::{ct_eq, sha256},
    error::{Error, Result},
    util::Timestamp,
};
use chrono::Duration;
use tracing::warn;

/// How far the chain tip may sit ahead of our clock before we stop
/// appending. Small steps forward are normal (see [`next_timestamp`]), a big
/// one means a clock went wrong somewhere.
pub const MAX_CLOCK_SKEW_MS: i64 = 5_000;

/// One row of a hash-chained ledger.
pub trait ChainRecord: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Assigned by storage, increases with every append.
    fn row_id(&self) -> u64;

    fn set_row_id(&mut self, row_id: u64);

    /// Who wrote the row.
    fn identity(&self) -> &str;

    fn timestamp(&self) -> Timestamp;

    /// The record hash of the row before this one, or the genesis hash.
    fn previous_hash(&self) -> &[u8];

    /// The stored hash of this row.
    fn record_hash(&self) -> &[u8];

    /// Hash this row's fields (everything but the row id and record hash).
    fn compute_hash(&self) -> [u8; 32];

    /// Check field lengths.
    fn validate(&self) -> Result<()>;

    /// Does the writer's signature over the previous hash check out?
    fn verify_signature(&self) -> bool;
}

/// The previous hash of the first record in a chain.
pub fn genesis_hash(seed: &[u8]) -> Vec<u8> {
    sha256(seed).to_vec()
}

/// Check one record against the record before it (`None` for the first
/// record, which must link to `genesis`).
pub fn verify_record<R: ChainRecord>(record: &R, previous: Option<&R>, genesis: &[u8]) -> Result<()> {
    let broken = || Error::LedgerChainBroken(record.row_id());
    if record.validate().is_err() {
        Err(broken())?;
    }
    if !ct_eq(&record.compute_hash(), record.record_hash()) {
        Err(broken())?;
    }
    let expected_previous = previous.map(|p| p.record_hash()).unwrap_or(genesis);
    if !ct_eq(expected_previous, record.previous_hash()) {
        Err(broken())?;
    }
    if let Some(prev) = previous {
        if record.row_id() <= prev.row_id() || record.timestamp() <= prev.timestamp() {
            Err(broken())?;
        }
    }
    if !record.verify_signature() {
        Err(broken())?;
    }
    Ok(())
}

/// Walk a whole chain, in row order, from genesis to tip. Everything from
/// the first bad record on is untrustworthy, so we report that record.
pub fn verify_chain<R: ChainRecord>(records: &[R], genesis: &[u8]) -> Result<()> {
    let mut previous = None;
    for record in records {
        verify_record(record, previous, genesis)?;
        previous = Some(record);
    }
    Ok(())
}

/// The timestamp for a row appended after `tip` at clock reading `now`.
///
/// Timestamps strictly increase along the chain, so if the clock hasn't
/// moved past the tip the new row gets the tip's timestamp plus a
/// millisecond. A tip more than [`MAX_CLOCK_SKEW_MS`] ahead of the clock is
/// refused instead of followed.
pub(crate) fn next_timestamp<R: ChainRecord>(tip: Option<&R>, now: Timestamp) -> Result<Timestamp> {
    let tip_timestamp = match tip {
        Some(tip) => tip.timestamp(),
        None => return Ok(now),
    };
    let ahead_ms = tip_timestamp.millis().saturating_sub(now.millis());
    if ahead_ms > MAX_CLOCK_SKEW_MS {
        warn!(ahead_ms, row_id = tip.map(|t| t.row_id()), "ledger tip is ahead of the clock");
        Err(Error::LedgerClockSkew { ahead_ms })?;
    }
    if now <= tip_timestamp {
        Ok(tip_timestamp.add(Duration::milliseconds(1)))
    } else {
        Ok(now)
    }
}

/// A configured interval in seconds, as a [`Duration`].
pub(crate) fn interval(name: &str, secs: i64) -> Result<Duration> {
    if secs < 0 {
        Err(Error::ConfigInvalid(format!("{} must not be negative", name)))?;
    }
    Duration::try_seconds(secs).ok_or_else(|| Error::ConfigInvalid(format!("{} is out of range", name)))
}

/// `timestamp + interval`, where not fitting means the interval was
/// configured too long.
pub(crate) fn after(name: &str, timestamp: Timestamp, interval: Duration) -> Result<Timestamp> {
    timestamp
        .checked_add(interval)
        .ok_or_else(|| Error::ConfigInvalid(format!("{} is out of range", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::base::{EccKeyPair, Lifetime, SecureBuffer, SIGNATURE_ALGORITHM},
        keychain::{sign_previous_hash, KeyChainRecord},
        util::ser,
    };

    fn record_after(previous: Option<&KeyChainRecord>, identity: &str) -> KeyChainRecord {
        let mut rng = crate::util::test::rng();
        let secret = SecureBuffer::random(&mut rng, 16);
        let key = EccKeyPair::generate(&mut rng, &secret, Lifetime::hours(1), &()).unwrap();
        let previous_hash = previous.map(|p| p.record_hash().clone()).unwrap_or_else(|| genesis_hash(&[0u8; 16]));
        let timestamp = previous
            .map(|p| p.timestamp().add(Duration::seconds(1)))
            .unwrap_or_else(Timestamp::now);
        let signed = sign_previous_hash(&key, &secret, &previous_hash).unwrap();
        let mut record = KeyChainRecord::new(
            previous_hash,
            identity.into(),
            timestamp,
            signed,
            SIGNATURE_ALGORITHM.into(),
            key.public().to_jwk_base64url().unwrap(),
        );
        record.set_row_id(previous.map(|p| p.row_id() + 1).unwrap_or(1));
        record
    }

    fn chain() -> Vec<KeyChainRecord> {
        let r1 = record_after(None, "frank.example");
        let r2 = record_after(Some(&r1), "alice.example");
        let r3 = record_after(Some(&r2), "frank.example");
        vec![r1, r2, r3]
    }

    #[test]
    fn genesis_is_hash_of_seed() {
        let genesis = genesis_hash(&[0u8; 16]);
        assert_eq!(ser::base64_encode(&genesis), "N0cI//dxndWXnsh11WzSKG9tPPfsMXo7JWMqqyjsN7s=");
    }

    #[test]
    fn valid_chain() {
        let records = chain();
        verify_chain(&records, &genesis_hash(&[0u8; 16])).unwrap();
        for pair in records.windows(2) {
            assert_eq!(pair[0].compute_hash().to_vec(), pair[1].previous_hash().clone());
        }
        verify_chain::<KeyChainRecord>(&[], &genesis_hash(&[0u8; 16])).unwrap();
        // wrong genesis
        assert_eq!(verify_chain(&records, &genesis_hash(&[1u8; 16])), Err(Error::LedgerChainBroken(1)));
    }

    #[test]
    fn tampering_breaks_chain_at_the_record() {
        let genesis = genesis_hash(&[0u8; 16]);

        let mut records = chain();
        *records[1].identity_mut() = "mallory.example".into();
        assert_eq!(verify_chain(&records, &genesis), Err(Error::LedgerChainBroken(2)));

        // recompute the hash to hide the change, and the next link breaks
        let mut records = chain();
        *records[1].identity_mut() = "mallory.example".into();
        let rehashed = records[1].compute_hash().to_vec();
        *records[1].record_hash_mut() = rehashed;
        assert_eq!(verify_chain(&records, &genesis), Err(Error::LedgerChainBroken(3)));

        let mut records = chain();
        records.remove(1);
        assert_eq!(verify_chain(&records, &genesis), Err(Error::LedgerChainBroken(3)));

        let mut records = chain();
        records.swap(1, 2);
        assert!(verify_chain(&records, &genesis).is_err());
    }

    #[test]
    fn signature_must_cover_previous_hash() {
        let genesis = genesis_hash(&[0u8; 16]);
        let mut records = chain();
        // a signature from record 1 replayed onto record 2
        let replayed = records[0].signed_previous_hash().clone();
        *records[1].signed_previous_hash_mut() = replayed;
        let rehashed = records[1].compute_hash().to_vec();
        *records[1].record_hash_mut() = rehashed;
        let res = verify_record(&records[1], Some(&records[0]), &genesis);
        assert_eq!(res, Err(Error::LedgerChainBroken(2)));
        assert!(!records[1].verify_signature());
    }

    #[test]
    fn clock_follows_the_tip() {
        let tip = record_after(None, "frank.example");
        let tip_ts = *tip.timestamp();
        assert_eq!(next_timestamp::<KeyChainRecord>(None, tip_ts), Ok(tip_ts));
        // later clock wins, same or slightly earlier clock bumps past the tip
        let later = tip_ts.add(Duration::seconds(1));
        assert_eq!(next_timestamp(Some(&tip), later), Ok(later));
        let bumped = tip_ts.add(Duration::milliseconds(1));
        assert_eq!(next_timestamp(Some(&tip), tip_ts), Ok(bumped));
        assert_eq!(next_timestamp(Some(&tip), tip_ts.add(Duration::milliseconds(-MAX_CLOCK_SKEW_MS))), Ok(bumped));

        // far behind the tip: refuse rather than stamp rows in the future
        let res = next_timestamp(Some(&tip), tip_ts.add(Duration::milliseconds(-MAX_CLOCK_SKEW_MS - 1)));
        assert_eq!(res.as_ref().err(), Some(&Error::LedgerClockSkew { ahead_ms: MAX_CLOCK_SKEW_MS + 1 }));
        assert!(res.unwrap_err().is_security());
    }

    #[test]
    fn intervals_must_fit() {
        assert_eq!(interval("x", 60), Ok(Duration::seconds(60)));
        assert!(matches!(interval("x", -1), Err(Error::ConfigInvalid(_))));
        assert!(matches!(interval("x", i64::MAX), Err(Error::ConfigInvalid(_))));
        let longest = interval("x", Duration::MAX.num_seconds()).unwrap();
        assert!(matches!(after("x", Timestamp::now(), longest), Err(Error::ConfigInvalid(_))));
        let epoch = Timestamp::from_millis(0).unwrap();
        assert_eq!(after("x", epoch, Duration::seconds(1)).unwrap().millis(), 1000);
    }
}
