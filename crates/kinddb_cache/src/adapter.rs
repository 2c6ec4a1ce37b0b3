//! Read-through, write-through caching over any adapter.
//!
//! ## Slot protocol
//!
//! Each complete key owns one cache slot holding a [`Slot`]:
//!
//! - Readers serve `Item` hits. On a miss they place a `Lease`, read the
//!   backend, and swap the lease for the record. A writer that touches the
//!   slot in between bumps its generation, so the stale fill fails.
//! - Writers swap every slot of a batch to `Locked` before touching the
//!   backend. A slot already `Locked` by someone else fails the whole batch
//!   with `Conflict` and nothing is written. Leases and items are simply
//!   overwritten, so readers never fail a writer.
//! - After the backend confirms, the lock becomes the new `Item` (put) or is
//!   cleared (delete) with a swap against the lock's own generation. A lock
//!   that changed underneath is evicted.
//! - Inside a transaction, reads bypass the cache and locks are journaled
//!   until the transaction commits or rolls back.

use crate::client::{CacheClient, Generation, Versioned};
use crate::error::CacheError;
use crate::slot::{slot_name, Slot};
use kinddb_core::adapter::QueryOptions;
use kinddb_core::{
    Adapter, BeginOptions, CacheConfig, CoreError, CoreResult, Key, PutRequest, Query, QueryBatch,
    ReadOptions, Record, TransactionHandle, TransactionId, WriteOptions,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Swaps attempted on one slot before giving up with `Conflict`.
const MAX_LOCK_ATTEMPTS: usize = 8;

/// Outcome of locking one slot.
enum Locked {
    /// Already locked with this token by an earlier write of the transaction.
    Held(Generation),
    /// Locked by this call.
    Fresh(Generation),
}

#[derive(Debug, Clone)]
enum Pending {
    Put(Record),
    Delete,
}

/// A slot held `Locked` by a writer.
#[derive(Debug)]
struct Lock {
    name: String,
    generation: Generation,
    pending: Pending,
}

/// Locks a transaction holds until it finishes.
#[derive(Debug)]
struct Journal {
    token: Uuid,
    locks: Vec<Lock>,
}

impl Journal {
    fn new() -> Self {
        Self {
            token: Uuid::new_v4(),
            locks: Vec::new(),
        }
    }

    fn record(&mut self, acquired: Vec<Lock>) {
        for lock in acquired {
            match self.locks.iter_mut().find(|held| held.name == lock.name) {
                Some(held) => held.pending = lock.pending,
                None => self.locks.push(lock),
            }
        }
    }
}

/// [`Adapter`] that keeps a [`CacheClient`] consistent with an inner adapter.
///
/// Lock contention is reported from `put` and `delete` as `Conflict`. A cache
/// outage while locking is `Unavailable`; an outage while reading falls back
/// to the inner adapter. Records created from partial keys are cached by
/// their first read.
pub struct CachingAdapter<A, C> {
    inner: A,
    cache: C,
    config: CacheConfig,
    journals: Mutex<HashMap<TransactionId, Journal>>,
}

impl<A: Adapter, C: CacheClient> CachingAdapter<A, C> {
    /// Wraps `inner` with `cache`.
    pub fn new(inner: A, cache: C, config: CacheConfig) -> Self {
        Self {
            inner,
            cache,
            config,
            journals: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the wrapped adapter.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Returns the cache client.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the slot name of `key`.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the key cannot be encoded.
    pub fn slot_name(&self, key: &Key) -> CoreResult<String> {
        Ok(slot_name(&self.config.prefix, key)?)
    }

    /// Swaps the slot of every target to `Locked(token)`.
    ///
    /// Slots already locked with `token` belong to the same transaction and
    /// are taken over. On failure, every slot locked by this call is
    /// released.
    fn lock(&self, targets: Vec<(Key, Pending)>, token: Uuid) -> CoreResult<Vec<Lock>> {
        let mut names: Vec<String> = Vec::with_capacity(targets.len());
        let mut wanted: Vec<(Key, Pending)> = Vec::with_capacity(targets.len());
        for (key, pending) in targets {
            let name = self.slot_name(&key)?;
            match names.iter().position(|n| *n == name) {
                Some(i) => wanted[i].1 = pending,
                None => {
                    names.push(name);
                    wanted.push((key, pending));
                }
            }
        }
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let current = self.cache.get_multi(&names)?;
        let marker = Slot::Locked(token).encode()?;
        let mut acquired: Vec<Lock> = Vec::with_capacity(names.len());
        let mut fresh: Vec<Lock> = Vec::new();

        for ((name, (key, pending)), slot) in names.into_iter().zip(wanted).zip(current) {
            match self.lock_slot(&name, &key, slot, token, &marker) {
                Ok(Locked::Held(generation)) => acquired.push(Lock {
                    name,
                    generation,
                    pending,
                }),
                Ok(Locked::Fresh(generation)) => {
                    trace!(%key, generation, "cache slot locked");
                    fresh.push(Lock {
                        name,
                        generation,
                        pending,
                    });
                }
                Err(err) => {
                    self.release(&fresh);
                    return Err(err);
                }
            }
        }
        acquired.extend(fresh);
        Ok(acquired)
    }

    /// Locks one slot, starting from its last observed state.
    ///
    /// Items and leases are overwritten. A swap lost to a reader's lease or
    /// fill is retried against the slot's new generation; only a lock held
    /// by another token is a conflict.
    fn lock_slot(
        &self,
        name: &str,
        key: &Key,
        mut slot: Option<Versioned>,
        token: Uuid,
        marker: &[u8],
    ) -> CoreResult<Locked> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let expected = match &slot {
                None => None,
                Some(versioned) => match Slot::decode(&versioned.bytes) {
                    Ok(Slot::Locked(owner)) if owner == token => {
                        return Ok(Locked::Held(versioned.generation));
                    }
                    Ok(Slot::Locked(_)) => {
                        debug!(%key, "cache slot locked by another writer");
                        return Err(CoreError::conflict(format!(
                            "{key} is being written by another writer"
                        )));
                    }
                    Ok(Slot::Item(_) | Slot::Lease(_)) | Err(_) => Some(versioned.generation),
                },
            };

            match self
                .cache
                .cas(name, expected, marker.to_vec(), self.config.lock_ttl)?
            {
                Some(generation) => return Ok(Locked::Fresh(generation)),
                None => {
                    trace!(%key, "cache slot changed while locking, re-reading");
                    let names = [name.to_string()];
                    slot = self.cache.get_multi(&names)?.pop().flatten();
                }
            }
        }
        debug!(%key, attempts = MAX_LOCK_ATTEMPTS, "gave up locking a busy cache slot");
        Err(CoreError::conflict(format!(
            "{key} kept changing while it was being locked"
        )))
    }

    /// Clears locks whose write was abandoned or has an unknown outcome.
    fn release(&self, locks: &[Lock]) {
        for lock in locks {
            match self.cache.delete_if(&lock.name, lock.generation) {
                Ok(true) => {}
                Ok(false) => self.evict(
                    &lock.name,
                    &CacheError::Inconsistency {
                        slot: lock.name.clone(),
                    },
                ),
                Err(err) => warn!(slot = %lock.name, error = %err, "failed to release cache lock"),
            }
        }
    }

    /// Replaces locks with the written records, or clears them for deletes.
    fn finalize(&self, locks: &[Lock]) {
        for lock in locks {
            let swapped = match &lock.pending {
                Pending::Put(record) => Slot::Item(record.clone()).encode().and_then(|bytes| {
                    self.cache
                        .cas(&lock.name, Some(lock.generation), bytes, self.config.item_ttl)
                        .map(|generation| generation.is_some())
                }),
                Pending::Delete => self.cache.delete_if(&lock.name, lock.generation),
            };
            match swapped {
                Ok(true) => {}
                Ok(false) => self.evict(
                    &lock.name,
                    &CacheError::Inconsistency {
                        slot: lock.name.clone(),
                    },
                ),
                Err(err) => self.evict(&lock.name, &err),
            }
        }
    }

    fn evict(&self, name: &str, reason: &CacheError) {
        warn!(slot = %name, error = %reason, "evicting cache slot");
        if let Err(err) = self.cache.delete(name) {
            warn!(slot = %name, error = %err, "eviction failed; slot expires on its own");
        }
    }

    fn write<T>(
        &self,
        targets: Vec<(Key, Pending)>,
        options: &WriteOptions<'_>,
        apply: impl FnOnce() -> CoreResult<T>,
    ) -> CoreResult<T> {
        let Some(handle) = options.transaction else {
            let acquired = self.lock(targets, Uuid::new_v4())?;
            return match apply() {
                Ok(value) => {
                    self.finalize(&acquired);
                    Ok(value)
                }
                Err(err) => {
                    self.release(&acquired);
                    Err(err)
                }
            };
        };

        let (token, held) = {
            let mut journals = self.journals.lock();
            let journal = journals.entry(handle.id()).or_insert_with(Journal::new);
            let held: Vec<String> = journal.locks.iter().map(|l| l.name.clone()).collect();
            (journal.token, held)
        };
        let acquired = self.lock(targets, token)?;
        match apply() {
            Ok(value) => {
                trace!(txn = %handle.id(), locks = acquired.len(), "journaling cache locks");
                if let Some(journal) = self.journals.lock().get_mut(&handle.id()) {
                    journal.record(acquired);
                }
                Ok(value)
            }
            Err(err) => {
                let fresh: Vec<Lock> = acquired
                    .into_iter()
                    .filter(|lock| !held.contains(&lock.name))
                    .collect();
                self.release(&fresh);
                Err(err)
            }
        }
    }
}

impl<A: Adapter, C: CacheClient> Adapter for CachingAdapter<A, C> {
    fn name(&self) -> &str {
        "caching"
    }

    fn get(&self, keys: &[Key], options: &ReadOptions<'_>) -> CoreResult<Vec<Option<Record>>> {
        if options.transaction.is_some() || keys.is_empty() {
            return self.inner.get(keys, options);
        }
        for key in keys {
            key.validate_complete()?;
        }

        let names = keys
            .iter()
            .map(|key| self.slot_name(key))
            .collect::<CoreResult<Vec<_>>>()?;
        let cached = match self.cache.get_multi(&names) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(error = %err, "cache read failed, reading through");
                return self.inner.get(keys, options);
            }
        };

        let lease = Slot::Lease(Uuid::new_v4()).encode()?;
        let mut results: Vec<Option<Record>> = vec![None; keys.len()];
        let mut misses: Vec<usize> = Vec::new();
        let mut leases: HashMap<&str, Generation> = HashMap::new();

        for (i, slot) in cached.into_iter().enumerate() {
            let name = names[i].as_str();
            match slot.map(|v| Slot::decode(&v.bytes)) {
                Some(Ok(Slot::Item(record))) => results[i] = Some(record),
                Some(Ok(Slot::Lease(_) | Slot::Locked(_))) => misses.push(i),
                Some(Err(err)) => {
                    self.evict(name, &err);
                    misses.push(i);
                }
                None => {
                    if !leases.contains_key(name) {
                        match self
                            .cache
                            .cas(name, None, lease.clone(), self.config.lock_ttl)
                        {
                            Ok(Some(generation)) => {
                                leases.insert(name, generation);
                            }
                            Ok(None) => {}
                            Err(err) => warn!(slot = %name, error = %err, "failed to lease cache slot"),
                        }
                    }
                    misses.push(i);
                }
            }
        }
        trace!(hits = keys.len() - misses.len(), misses = misses.len(), "cache lookup");
        if misses.is_empty() {
            return Ok(results);
        }

        let miss_keys: Vec<Key> = misses.iter().map(|&i| keys[i].clone()).collect();
        let fetched = match self.inner.get(&miss_keys, options) {
            Ok(fetched) => fetched,
            Err(err) => {
                for (name, generation) in leases {
                    let _ = self.cache.delete_if(name, generation);
                }
                return Err(err);
            }
        };

        for (&i, record) in misses.iter().zip(fetched) {
            if let Some(generation) = leases.remove(names[i].as_str()) {
                let filled = match &record {
                    Some(record) => Slot::Item(record.clone()).encode().and_then(|bytes| {
                        self.cache
                            .cas(&names[i], Some(generation), bytes, self.config.fill_ttl)
                            .map(|g| g.is_some())
                    }),
                    None => self.cache.delete_if(&names[i], generation),
                };
                match filled {
                    Ok(true) => {}
                    Ok(false) => trace!(slot = %names[i], "fill lost to a writer"),
                    Err(err) => warn!(slot = %names[i], error = %err, "cache fill failed"),
                }
            }
            results[i] = record;
        }
        Ok(results)
    }

    fn put(&self, requests: Vec<PutRequest>, options: &WriteOptions<'_>) -> CoreResult<Vec<Key>> {
        for request in &requests {
            request.validate()?;
        }
        let targets = requests
            .iter()
            .filter(|r| r.key.is_complete())
            .map(|r| (r.key.clone(), Pending::Put(r.record.clone())))
            .collect();
        self.write(targets, options, || self.inner.put(requests, options))
    }

    fn delete(&self, keys: &[Key], options: &WriteOptions<'_>) -> CoreResult<()> {
        for key in keys {
            key.validate_complete()?;
        }
        let targets = keys.iter().map(|k| (k.clone(), Pending::Delete)).collect();
        self.write(targets, options, || self.inner.delete(keys, options))
    }

    fn run_query(&self, query: &Query, options: &QueryOptions) -> CoreResult<QueryBatch> {
        self.inner.run_query(query, options)
    }

    fn begin_transaction(&self, options: &BeginOptions) -> CoreResult<TransactionHandle> {
        let handle = self.inner.begin_transaction(options)?;
        self.journals.lock().insert(handle.id(), Journal::new());
        Ok(handle)
    }

    fn commit(&self, handle: &TransactionHandle) -> CoreResult<()> {
        let journal = self.journals.lock().remove(&handle.id());
        let result = self.inner.commit(handle);
        if let Some(journal) = journal {
            match &result {
                Ok(()) => self.finalize(&journal.locks),
                Err(_) => self.release(&journal.locks),
            }
        }
        result
    }

    fn rollback(&self, handle: &TransactionHandle) -> CoreResult<()> {
        if let Some(journal) = self.journals.lock().remove(&handle.id()) {
            debug!(txn = %handle.id(), locks = journal.locks.len(), "releasing cache locks");
            self.release(&journal.locks);
        }
        self.inner.rollback(handle)
    }
}

impl<A, C> std::fmt::Debug for CachingAdapter<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingAdapter")
            .field("prefix", &self.config.prefix)
            .field("open_transactions", &self.journals.lock().len())
            .finish_non_exhaustive()
    }
}
