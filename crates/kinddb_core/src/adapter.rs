//! The adapter seam between the client layer and storage.
//!
//! Every other component talks to storage through [`Adapter`]. All
//! operations are batched, may block on the network, and accept an
//! optional deadline.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::query::{Cursor, Query};
use crate::record::Record;
use crate::transaction::{IsolationScope, TransactionHandle};
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A batched upsert request for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    /// Target key, possibly partial.
    pub key: Key,
    /// Record to store.
    pub record: Record,
    /// Names of properties to index.
    pub indexed: Vec<String>,
}

impl PutRequest {
    /// Creates a request that indexes the properties flagged as indexed.
    pub fn new(key: Key, record: Record) -> Self {
        let indexed = record.indexed_names();
        Self {
            key,
            record,
            indexed,
        }
    }

    /// Replaces the list of indexed properties.
    #[must_use]
    pub fn with_indexed(mut self, names: Vec<String>) -> Self {
        self.indexed = names;
        self
    }

    /// Checks the key and that every indexed property is indexable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key, an index request on a
    /// missing property, or one on a value type that cannot be indexed.
    pub fn validate(&self) -> CoreResult<()> {
        self.key.validate()?;
        for name in &self.indexed {
            let value = self.record.get(name).ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "cannot index missing property {name:?} of {}",
                    self.key
                ))
            })?;
            if !value.is_indexable() {
                return Err(CoreError::invalid_argument(format!(
                    "property {name:?} of {} holds a non-indexable {} value",
                    self.key,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }
}

/// Options for [`Adapter::get`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions<'a> {
    /// Read inside this transaction.
    pub transaction: Option<&'a TransactionHandle>,
    /// Give up after this instant.
    pub deadline: Option<Instant>,
}

impl<'a> ReadOptions<'a> {
    /// Reads inside `transaction`.
    #[must_use]
    pub fn in_transaction(transaction: &'a TransactionHandle) -> Self {
        Self {
            transaction: Some(transaction),
            deadline: None,
        }
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Options for [`Adapter::put`] and [`Adapter::delete`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions<'a> {
    /// Stage the write in this transaction instead of applying it.
    pub transaction: Option<&'a TransactionHandle>,
    /// Give up after this instant.
    pub deadline: Option<Instant>,
}

impl<'a> WriteOptions<'a> {
    /// Stages writes in `transaction`.
    #[must_use]
    pub fn in_transaction(transaction: &'a TransactionHandle) -> Self {
        Self {
            transaction: Some(transaction),
            deadline: None,
        }
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Options for one [`Adapter::run_query`] batch.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Resume after this cursor.
    pub start_cursor: Option<Cursor>,
    /// Maximum number of results in this batch.
    pub limit: Option<usize>,
    /// Results to skip before the first one returned.
    pub offset: usize,
    /// Give up after this instant.
    pub deadline: Option<Instant>,
}

/// Options for [`Adapter::begin_transaction`].
#[derive(Debug, Clone, Default)]
pub struct BeginOptions {
    /// Records the transaction may touch.
    pub scope: IsolationScope,
    /// Transaction suspended while this one runs.
    pub parent: Option<TransactionId>,
    /// Give up after this instant.
    pub deadline: Option<Instant>,
}

/// What a query batch returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    /// Complete records.
    Full,
    /// Records holding only the projected properties.
    Projection,
    /// Keys only; `records` is empty.
    KeysOnly,
}

/// One batch of query results.
#[derive(Debug, Clone)]
pub struct QueryBatch {
    /// Keys of the results, in query order.
    pub keys: Vec<Key>,
    /// Records aligned with `keys`; empty for keys-only batches.
    pub records: Vec<Record>,
    /// Position after the last result of this batch.
    pub next_cursor: Option<Cursor>,
    /// Whether the backend may have more results after `next_cursor`.
    pub more: bool,
    /// The kind of results held by this batch.
    pub result_type: ResultType,
}

impl QueryBatch {
    /// Returns an empty, exhausted batch.
    pub fn empty(result_type: ResultType) -> Self {
        Self {
            keys: Vec::new(),
            records: Vec::new(),
            next_cursor: None,
            more: false,
            result_type,
        }
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the batch holds no results.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Storage adapter contract.
///
/// Implementations must:
/// - preserve input order and count in `get`, with `None` for missing keys
/// - complete partial keys in `put`
/// - treat deleting a missing key as a no-op
/// - never retry a write whose outcome is unknown; report it as
///   `Unavailable { ambiguous: true }`
/// - report a transaction's concurrency conflicts from `commit`
///
/// Writes carrying a transaction are staged and become visible when the
/// transaction commits.
pub trait Adapter: Send + Sync {
    /// Returns a short name for logging.
    fn name(&self) -> &str;

    /// Looks up a batch of keys.
    fn get(&self, keys: &[Key], options: &ReadOptions<'_>) -> CoreResult<Vec<Option<Record>>>;

    /// Upserts a batch of records and returns their complete keys.
    fn put(&self, requests: Vec<PutRequest>, options: &WriteOptions<'_>) -> CoreResult<Vec<Key>>;

    /// Deletes a batch of keys.
    fn delete(&self, keys: &[Key], options: &WriteOptions<'_>) -> CoreResult<()>;

    /// Runs one batch of a query.
    fn run_query(&self, query: &Query, options: &QueryOptions) -> CoreResult<QueryBatch>;

    /// Starts a backend transaction.
    fn begin_transaction(&self, options: &BeginOptions) -> CoreResult<TransactionHandle>;

    /// Commits a transaction.
    ///
    /// The call is bounded by [`TransactionHandle::deadline`]. A commit
    /// attempted after that deadline fails with `Unavailable` without
    /// being sent.
    fn commit(&self, handle: &TransactionHandle) -> CoreResult<()>;

    /// Rolls back a transaction. Rolling back a finished transaction is a no-op.
    ///
    /// Local state for the transaction is dropped even when the call fails.
    fn rollback(&self, handle: &TransactionHandle) -> CoreResult<()>;
}

/// Returns `Unavailable` if `deadline` has passed.
///
/// # Errors
///
/// Returns `CoreError::Unavailable` once the deadline has expired.
pub fn check_deadline(deadline: Option<Instant>) -> CoreResult<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(CoreError::deadline_exceeded()),
        _ => Ok(()),
    }
}

/// Returns the instant `timeout` from now, or `None` when that is beyond
/// what `Instant` can represent.
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Returns the time left before `deadline`, if any.
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}
