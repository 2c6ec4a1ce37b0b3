//! The distributed cache boundary.

use crate::error::CacheResult;
use std::sync::Arc;
use std::time::Duration;

/// Generation counter of a cache slot. Every successful write bumps it.
pub type Generation = u64;

/// A cached payload and the generation it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Stored bytes.
    pub bytes: Vec<u8>,
    /// Generation of this value.
    pub generation: Generation,
}

/// A key-value cache with per-slot compare-and-swap.
///
/// Caches offer no multi-slot transactions. Every mutation the caching
/// adapter makes goes through [`CacheClient::cas`] or
/// [`CacheClient::delete_if`]; only eviction uses a plain delete.
pub trait CacheClient: Send + Sync {
    /// Reads a batch of slots. Missing or expired slots are `None`.
    fn get_multi(&self, names: &[String]) -> CacheResult<Vec<Option<Versioned>>>;

    /// Stores `bytes` if the slot's generation is `expected`.
    ///
    /// `expected = None` succeeds only if the slot is empty. Returns the
    /// new generation, or `None` if the slot did not match.
    fn cas(
        &self,
        name: &str,
        expected: Option<Generation>,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> CacheResult<Option<Generation>>;

    /// Deletes the slot if its generation is `expected`.
    fn delete_if(&self, name: &str, expected: Generation) -> CacheResult<bool>;

    /// Deletes the slot unconditionally.
    fn delete(&self, name: &str) -> CacheResult<()>;
}

impl<C: CacheClient + ?Sized> CacheClient for Arc<C> {
    fn get_multi(&self, names: &[String]) -> CacheResult<Vec<Option<Versioned>>> {
        (**self).get_multi(names)
    }

    fn cas(
        &self,
        name: &str,
        expected: Option<Generation>,
        bytes: Vec<u8>,
        ttl: Duration,
    ) -> CacheResult<Option<Generation>> {
        (**self).cas(name, expected, bytes, ttl)
    }

    fn delete_if(&self, name: &str, expected: Generation) -> CacheResult<bool> {
        (**self).delete_if(name, expected)
    }

    fn delete(&self, name: &str) -> CacheResult<()> {
        (**self).delete(name)
    }
}
