//! Where ledger rows live. A ledger only needs an append-only table it can
//! read from the tip, by identity, or in full, plus an append that refuses
//! to link to anything but the current tip.

use crate::{
    chain::ChainRecord,
    crypto::base::ct_eq,
    error::{Error, Result},
    util::ser,
};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Append-only storage for ledger records.
///
/// Implementations never update or delete rows. `identity` arguments are
/// compared exactly, so callers hand in the lowercased form.
#[async_trait]
pub trait ChainStore<R: ChainRecord>: Send + Sync {
    /// The most recently appended record, across all identities.
    async fn last(&self) -> Result<Option<R>>;

    /// The first record ever appended for `identity`.
    async fn oldest_for(&self, identity: &str) -> Result<Option<R>>;

    /// Every record for `identity`, in insertion order.
    async fn all_for(&self, identity: &str) -> Result<Vec<R>>;

    /// Every record, in insertion order.
    async fn all(&self) -> Result<Vec<R>>;

    /// Append a record and return it with its row id filled in.
    ///
    /// `expected_tip` is the record hash of the row the caller linked to
    /// (`None` if the caller saw an empty table). If the tip has moved since,
    /// this must fail with [`Error::LedgerForked`] and write nothing.
    async fn append(&self, record: R, expected_tip: Option<&[u8]>) -> Result<R>;
}

/// A [`ChainStore`] in memory. Clones share the same rows.
#[derive(Debug, Clone)]
pub struct MemoryChainStore<R> {
    rows: Arc<RwLock<Vec<R>>>,
}

impl<R> Default for MemoryChainStore<R> {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<R: ChainRecord> MemoryChainStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<R>>> {
        self.rows
            .read()
            .map_err(|e| Error::LedgerStorage(format!("failed to acquire read lock: {}", e)))
    }

    /// Direct write access, for tampering with rows in tests.
    #[cfg(test)]
    pub(crate) fn rows_for_test(&self) -> std::sync::RwLockWriteGuard<'_, Vec<R>> {
        self.rows.write().unwrap()
    }
}

#[async_trait]
impl<R: ChainRecord> ChainStore<R> for MemoryChainStore<R> {
    async fn last(&self) -> Result<Option<R>> {
        Ok(self.read()?.last().cloned())
    }

    async fn oldest_for(&self, identity: &str) -> Result<Option<R>> {
        Ok(self.read()?.iter().find(|r| r.identity() == identity).cloned())
    }

    async fn all_for(&self, identity: &str) -> Result<Vec<R>> {
        Ok(self.read()?.iter().filter(|r| r.identity() == identity).cloned().collect())
    }

    async fn all(&self) -> Result<Vec<R>> {
        Ok(self.read()?.clone())
    }

    async fn append(&self, mut record: R, expected_tip: Option<&[u8]>) -> Result<R> {
        let mut rows = self
            .rows
            .write()
            .map_err(|e| Error::LedgerStorage(format!("failed to acquire write lock: {}", e)))?;
        let tip = rows.last().map(|r| r.record_hash());
        let matches = match (tip, expected_tip) {
            (None, None) => true,
            (Some(tip), Some(expected)) => ct_eq(tip, expected),
            _ => false,
        };
        if !matches {
            Err(Error::LedgerForked {
                expected: expected_tip.map(ser::base64_encode).unwrap_or_default(),
            })?;
        }
        let row_id = rows.last().map(|r| r.row_id() + 1).unwrap_or(1);
        record.set_row_id(row_id);
        rows.push(record.clone());
        Ok(record)
    }
}
