//! Explicit client context.

use crate::adapter::{deadline_after, Adapter, PutRequest, ReadOptions, WriteOptions};
use crate::config::Config;
use crate::context;
use crate::entity::{Entity, KindRegistry};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::query::{Cursor, Page, Pages, Query, Resultset};
use crate::record::Record;
use crate::transaction::{TransactionHandle, TransactionManager, TransactionOptions};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A client context threading an adapter, configuration and the
/// transaction stack through every operation.
///
/// A session belongs to one execution context and is not `Sync`.
/// Concurrent callers each create their own session over a shared
/// adapter, so each sees only its own transactions.
///
/// Reads and writes made inside [`Session::run_in_transaction`] join the
/// current transaction. Queries never do.
pub struct Session {
    adapter: Arc<dyn Adapter>,
    config: Config,
    transactions: TransactionManager,
}

impl Session {
    /// Creates a session over `adapter`.
    pub fn new(adapter: Arc<dyn Adapter>, config: Config) -> Self {
        Self {
            transactions: TransactionManager::new(Arc::clone(&adapter)),
            adapter,
            config,
        }
    }

    /// Creates a session over the process-wide adapter.
    ///
    /// # Errors
    ///
    /// Returns the error from [`context::adapter`].
    pub fn from_context(config: Config) -> CoreResult<Self> {
        Ok(Self::new(context::adapter()?, config))
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current transaction, if any.
    pub fn current_transaction(&self) -> Option<TransactionHandle> {
        self.transactions.current()
    }

    /// Returns true inside a transaction.
    pub fn in_transaction(&self) -> bool {
        self.transactions.in_transaction()
    }

    /// Returns transaction options seeded from the configuration.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions::new().with_retries(self.config.retries)
    }

    /// Runs `body` as a transactional unit of work.
    ///
    /// See [`TransactionManager::run`] for nesting and retry behaviour.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or a transaction error converted into `E`.
    pub fn run_in_transaction<T, E, F>(&self, options: &TransactionOptions, mut body: F) -> Result<T, E>
    where
        F: FnMut(&Session) -> Result<T, E>,
        E: From<CoreError>,
    {
        self.transactions.run(options, || body(self))
    }

    fn deadline(&self) -> Option<Instant> {
        let call = deadline_after(self.config.request_timeout);
        match (self.transactions.current_deadline(), call) {
            (Some(txn), Some(call)) => Some(txn.min(call)),
            (txn, call) => txn.or(call),
        }
    }

    /// Looks up raw records, positionally.
    ///
    /// # Errors
    ///
    /// Returns any adapter error. Missing keys are `None`, not errors.
    pub fn get_records(&self, keys: &[Key]) -> CoreResult<Vec<Option<Record>>> {
        let transaction = self.transactions.current();
        let options = ReadOptions {
            transaction: transaction.as_ref(),
            deadline: self.deadline(),
        };
        self.adapter.get(keys, &options)
    }

    /// Loads an entity by key.
    ///
    /// # Errors
    ///
    /// Returns any adapter or mapper error.
    pub fn get<T: Entity>(&self, key: &Key) -> CoreResult<Option<T>> {
        let mut found = self.get_multi::<T>(std::slice::from_ref(key))?;
        Ok(found.pop().flatten())
    }

    /// Loads an entity by key, treating absence as `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key has no record.
    pub fn load<T: Entity>(&self, key: &Key) -> CoreResult<T> {
        self.get(key)?
            .ok_or_else(|| CoreError::not_found(key.clone()))
    }

    /// Loads a batch of entities, positionally.
    ///
    /// # Errors
    ///
    /// Returns the `pre_get` hook's error or any adapter or mapper error.
    pub fn get_multi<T: Entity>(&self, keys: &[Key]) -> CoreResult<Vec<Option<T>>> {
        for key in keys {
            key.validate_complete()?;
            T::pre_get(key)?;
        }
        let records = self.get_records(keys)?;
        keys.iter()
            .zip(records)
            .map(|(key, record)| {
                record
                    .map(|record| {
                        let mut entity = T::from_record(key.clone(), record)?;
                        entity.post_get();
                        Ok(entity)
                    })
                    .transpose()
            })
            .collect()
    }

    /// Loads a polymorphic record through `registry`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown discriminator, or any
    /// adapter or loader error.
    pub fn get_poly<T>(&self, registry: &KindRegistry<T>, key: &Key) -> CoreResult<Option<T>> {
        key.validate_complete()?;
        let record = self.get_records(std::slice::from_ref(key))?.pop().flatten();
        record.map(|record| registry.load(key.clone(), record)).transpose()
    }

    /// Stores an entity and sets its completed key.
    ///
    /// # Errors
    ///
    /// Returns the `pre_put` hook's error or any mapper or adapter error.
    pub fn put<T: Entity>(&self, entity: &mut T) -> CoreResult<Key> {
        let mut keys = self.put_multi(std::slice::from_mut(entity))?;
        keys.pop()
            .ok_or_else(|| CoreError::codec("adapter returned no key for put"))
    }

    /// Stores a batch of entities and sets their completed keys.
    ///
    /// # Errors
    ///
    /// Returns the first hook, mapper or adapter error. A failed batch
    /// reports no partial result.
    pub fn put_multi<T: Entity>(&self, entities: &mut [T]) -> CoreResult<Vec<Key>> {
        let mut requests = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            entity.pre_put()?;
            requests.push(PutRequest::new(entity.storage_key(), entity.to_record()?));
        }

        let transaction = self.transactions.current();
        let options = WriteOptions {
            transaction: transaction.as_ref(),
            deadline: self.deadline(),
        };
        let keys = self.adapter.put(requests, &options)?;
        if keys.len() != entities.len() {
            return Err(CoreError::codec(format!(
                "adapter returned {} keys for {} puts",
                keys.len(),
                entities.len()
            )));
        }
        debug!(kind = T::kind(), count = keys.len(), "stored entities");

        for (entity, key) in entities.iter_mut().zip(&keys) {
            entity.set_key(key.clone());
            entity.post_put();
        }
        Ok(keys)
    }

    /// Deletes an entity by its key.
    ///
    /// Entities without a key were never stored, so deleting them is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the `pre_delete` hook's error or any adapter error.
    pub fn delete<T: Entity>(&self, entity: &mut T) -> CoreResult<()> {
        let Some(key) = entity.key().cloned() else {
            return Ok(());
        };
        entity.pre_delete()?;
        self.delete_keys(&[key])?;
        entity.post_delete();
        Ok(())
    }

    /// Deletes a batch of keys. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a partial key or any adapter error.
    pub fn delete_keys(&self, keys: &[Key]) -> CoreResult<()> {
        for key in keys {
            key.validate_complete()?;
        }
        let transaction = self.transactions.current();
        let options = WriteOptions {
            transaction: transaction.as_ref(),
            deadline: self.deadline(),
        };
        self.adapter.delete(keys, &options)
    }

    /// Builds a query over `T`'s kind using the configured batch size.
    pub fn query<T: Entity>(&self) -> Query {
        Query::new(T::kind()).with_batch_size(self.config.batch_size)
    }

    /// Runs a query lazily.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid descriptor.
    pub fn run(&self, query: &Query) -> CoreResult<Resultset<'_>> {
        query.run(self.adapter())
    }

    /// Runs a query and maps every result to `T`.
    ///
    /// # Errors
    ///
    /// Returns the first adapter or mapper error.
    pub fn fetch<T: Entity>(&self, query: &Query) -> CoreResult<Vec<T>> {
        query
            .run(self.adapter())?
            .map(|entry| entry.and_then(|e| e.into_entity()))
            .collect()
    }

    /// Runs a query and maps every result through `registry`.
    ///
    /// # Errors
    ///
    /// Returns the first adapter or loader error.
    pub fn fetch_poly<T>(&self, registry: &KindRegistry<T>, query: &Query) -> CoreResult<Vec<T>> {
        query
            .run(self.adapter())?
            .map(|entry| {
                let (key, record) = entry?.into_parts();
                let record = record.ok_or_else(|| {
                    CoreError::invalid_operation("keys-only results cannot be resolved")
                })?;
                registry.load(key, record)
            })
            .collect()
    }

    /// Paginates a query.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid descriptor or page size.
    pub fn paginate(&self, query: &Query, page_size: usize, cursor: Option<Cursor>) -> CoreResult<Pages<'_>> {
        query.paginate(self.adapter(), page_size, cursor)
    }

    /// Fetches one page after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns any adapter error.
    pub fn fetch_page(&self, query: &Query, page_size: usize, cursor: Option<&Cursor>) -> CoreResult<Page> {
        query.fetch_page(self.adapter(), page_size, cursor)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("adapter", &self.adapter.name())
            .field("config", &self.config)
            .field("transactions", &self.transactions)
            .finish()
    }
}
