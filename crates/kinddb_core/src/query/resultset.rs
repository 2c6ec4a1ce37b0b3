//! Lazy query results.

use crate::adapter::{check_deadline, deadline_after, Adapter, QueryBatch, QueryOptions, ResultType};
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::query::cursor::Cursor;
use crate::query::descriptor::Query;
use crate::record::Record;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use tracing::trace;

/// One query result.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// A complete record.
    Full(Key, Record),
    /// A record holding only the projected properties.
    Projected(Key, Record),
    /// A key from a keys-only query.
    KeyOnly(Key),
}

impl Entry {
    /// Returns the key.
    pub fn key(&self) -> &Key {
        match self {
            Self::Full(key, _) | Self::Projected(key, _) | Self::KeyOnly(key) => key,
        }
    }

    /// Returns the record, if the query returned one.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Full(_, record) | Self::Projected(_, record) => Some(record),
            Self::KeyOnly(_) => None,
        }
    }

    /// Splits the entry into its key and record.
    pub fn into_parts(self) -> (Key, Option<Record>) {
        match self {
            Self::Full(key, record) | Self::Projected(key, record) => (key, Some(record)),
            Self::KeyOnly(key) => (key, None),
        }
    }

    /// Maps a full entry to an entity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for keys-only and projected entries, or
    /// the mapper's error.
    pub fn into_entity<T: Entity>(self) -> CoreResult<T> {
        match self {
            Self::Full(key, record) => T::from_record(key, record),
            Self::Projected(key, _) | Self::KeyOnly(key) => Err(CoreError::invalid_operation(
                format!("cannot map partial result {key} to an entity"),
            )),
        }
    }
}

/// Converts a backend batch into entries, honouring its reported result type.
pub(crate) fn batch_entries(batch: QueryBatch) -> CoreResult<(Vec<Entry>, Option<Cursor>, bool)> {
    let QueryBatch {
        keys,
        records,
        next_cursor,
        more,
        result_type,
    } = batch;

    let entries = match result_type {
        ResultType::KeysOnly => keys.into_iter().map(Entry::KeyOnly).collect(),
        ResultType::Full | ResultType::Projection => {
            if keys.len() != records.len() {
                return Err(CoreError::codec(format!(
                    "query batch has {} keys but {} records",
                    keys.len(),
                    records.len()
                )));
            }
            let make: fn(Key, Record) -> Entry = match result_type {
                ResultType::Full => Entry::Full,
                _ => Entry::Projected,
            };
            keys.into_iter()
                .zip(records)
                .map(|(key, record)| make(key, record))
                .collect()
        }
    };
    Ok((entries, next_cursor, more))
}

pub(crate) fn batch_options(
    query: &Query,
    cursor: Option<Cursor>,
    limit: usize,
    offset: usize,
) -> CoreResult<QueryOptions> {
    let deadline = query.timeout().and_then(deadline_after);
    check_deadline(deadline)?;
    Ok(QueryOptions {
        start_cursor: cursor,
        limit: Some(limit),
        offset,
        deadline,
    })
}

/// A lazy, forward-only, single-pass sequence of query results.
///
/// Batches of `batch_size` results (capped by the remaining limit) are
/// fetched on demand, following the backend's cursor. Once exhausted, or
/// after an error, the iterator yields nothing more; running the query
/// again requires a new call to [`Query::run`].
pub struct Resultset<'a> {
    adapter: &'a dyn Adapter,
    query: Query,
    buffer: VecDeque<Entry>,
    cursor: Option<Cursor>,
    more: bool,
    first: bool,
    remaining: Option<usize>,
    batches: usize,
}

impl<'a> Resultset<'a> {
    pub(crate) fn new(adapter: &'a dyn Adapter, query: Query) -> Self {
        let remaining = query.limit();
        Self {
            adapter,
            query,
            buffer: VecDeque::new(),
            cursor: None,
            more: true,
            first: true,
            remaining,
            batches: 0,
        }
    }

    /// Returns the number of backend batches fetched so far.
    pub fn batches_fetched(&self) -> usize {
        self.batches
    }

    /// Returns the cursor after the last fetched batch.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Returns the query being run.
    pub fn query(&self) -> &Query {
        &self.query
    }

    fn exhausted(&self) -> bool {
        !self.more || self.remaining == Some(0)
    }

    fn fetch(&mut self) -> CoreResult<()> {
        let limit = match self.remaining {
            Some(remaining) => remaining.min(self.query.batch_size()),
            None => self.query.batch_size(),
        };
        let offset = if self.first { self.query.offset() } else { 0 };
        let options = batch_options(&self.query, self.cursor.clone(), limit, offset)?;

        let batch = self.adapter.run_query(&self.query, &options)?;
        self.batches += 1;
        self.first = false;

        let (entries, next_cursor, more) = batch_entries(batch)?;
        trace!(
            kind = ?self.query.kind(),
            batch = self.batches,
            results = entries.len(),
            more,
            "fetched query batch"
        );

        let stalled = entries.is_empty() && next_cursor == self.cursor;
        self.more = more && next_cursor.is_some() && !stalled;
        self.cursor = next_cursor;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(entries.len());
        }
        self.buffer.extend(entries);
        Ok(())
    }
}

impl Iterator for Resultset<'_> {
    type Item = CoreResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.exhausted() {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.more = false;
                return Some(Err(err));
            }
        }
    }
}

impl FusedIterator for Resultset<'_> {}

impl std::fmt::Debug for Resultset<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resultset")
            .field("adapter", &self.adapter.name())
            .field("query", &self.query)
            .field("buffered", &self.buffer.len())
            .field("more", &self.more)
            .field("batches", &self.batches)
            .finish()
    }
}

impl Query {
    /// Runs the query and returns its results lazily.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the descriptor is invalid. Nothing is
    /// sent to the backend until the first result is requested.
    pub fn run<'a>(&self, adapter: &'a dyn Adapter) -> CoreResult<Resultset<'a>> {
        self.validate()?;
        Ok(Resultset::new(adapter, self.clone()))
    }

    /// Runs the query with a limit of one and returns the first result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid descriptor or any adapter error.
    pub fn get(&self, adapter: &dyn Adapter) -> CoreResult<Option<Entry>> {
        self.with_limit(1).run(adapter)?.next().transpose()
    }

    /// Runs the query to completion and collects the results.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn fetch(&self, adapter: &dyn Adapter) -> CoreResult<Vec<Entry>> {
        self.run(adapter)?.collect()
    }

    /// Runs the query and returns only the result keys.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn fetch_keys(&self, adapter: &dyn Adapter) -> CoreResult<Vec<Key>> {
        self.keys_only()
            .run(adapter)?
            .map(|entry| entry.map(|e| e.key().clone()))
            .collect()
    }
}
