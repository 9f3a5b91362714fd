//! Per-connection prepared statement cache
//!
//! Statements are keyed by a [`Fingerprint`] of their SQL text and evicted
//! in least-recently-used order. The cache belongs to a single pooled
//! connection and is only ever touched by that connection's current
//! borrower, so it does no locking of its own.

use std::fmt;

use indexmap::IndexMap;
use ring::digest::{SHA256, digest};
use sluice_core::{RawStatement, Result};

/// Content hash of a SQL statement's text
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint the given SQL text
    pub fn of(sql: &str) -> Self {
        let hash = digest(&SHA256, sql.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(hash.as_ref());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(&self.0[..8]))
    }
}

/// Bounded LRU cache of prepared statements
///
/// The map keeps entries ordered from least to most recently used.
pub struct StatementCache {
    capacity: usize,
    entries: IndexMap<Fingerprint, Box<dyn RawStatement>>,
}

impl StatementCache {
    /// Create a cache holding at most `capacity` statements
    ///
    /// Returns `None` for a capacity of 0, which means caching is disabled.
    pub fn new(capacity: usize) -> Option<Self> {
        (capacity > 0).then(|| Self {
            capacity,
            entries: IndexMap::with_capacity(capacity + 1),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a statement for `fingerprint` is resident, without touching recency
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Resident fingerprints, least recently used first
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.entries.keys().copied().collect()
    }

    /// Look up a statement, preparing and inserting it on a miss
    ///
    /// A hit marks the entry most recently used. An insertion that takes the
    /// cache over capacity evicts and closes the least recently used entry
    /// before the new statement is handed back.
    pub fn get_or_prepare<P>(
        &mut self,
        fingerprint: Fingerprint,
        prepare: P,
    ) -> Result<&mut Box<dyn RawStatement>>
    where
        P: FnOnce() -> Result<Box<dyn RawStatement>>,
    {
        let last = match self.entries.get_index_of(&fingerprint) {
            Some(index) => {
                tracing::trace!(%fingerprint, "statement cache hit");
                let last = self.entries.len() - 1;
                self.entries.move_index(index, last);
                last
            }
            None => {
                tracing::trace!(%fingerprint, "statement cache miss");
                let statement = prepare()?;
                self.entries.insert(fingerprint, statement);
                if self.entries.len() > self.capacity {
                    self.evict_oldest();
                }
                self.entries.len() - 1
            }
        };

        let (_, statement) = self
            .entries
            .get_index_mut(last)
            .ok_or_else(|| sluice_core::SluiceError::Other("statement cache is empty".into()))?;
        Ok(statement)
    }

    fn evict_oldest(&mut self) {
        if let Some((fingerprint, statement)) = self.entries.shift_remove_index(0) {
            tracing::debug!(%fingerprint, "evicting prepared statement");
            if let Err(err) = statement.close() {
                tracing::warn!(%fingerprint, error = %err, "failed to close evicted statement");
            }
        }
    }

    /// Close and drop every resident statement, ignoring close errors
    pub fn clear(&mut self) {
        for (fingerprint, statement) in self.entries.drain(..) {
            if let Err(err) = statement.close() {
                tracing::warn!(%fingerprint, error = %err, "failed to close cached statement");
            }
        }
    }
}

impl Drop for StatementCache {
    fn drop(&mut self) {
        self.clear();
    }
}
