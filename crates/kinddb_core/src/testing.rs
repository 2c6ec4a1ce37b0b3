//! In-crate test adapter.

use crate::adapter::{
    check_deadline, Adapter, BeginOptions, PutRequest, QueryBatch, QueryOptions, ReadOptions,
    ResultType, WriteOptions,
};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::query::{Cursor, Query};
use crate::record::Record;
use crate::transaction::TransactionHandle;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

enum Staged {
    Put(Key, Record),
    Delete(Key),
}

#[derive(Default)]
struct State {
    records: BTreeMap<Key, Record>,
    staged: HashMap<TransactionId, Vec<Staged>>,
    next_id: i64,
    calls: Vec<QueryOptions>,
    fail_after: Option<usize>,
    more_at_end: bool,
}

/// Ordered key-record list with offset cursors. Ignores filters and orders.
#[derive(Default)]
pub(crate) struct ListAdapter {
    state: Mutex<State>,
}

impl ListAdapter {
    pub(crate) fn with_people(n: i64) -> Self {
        let adapter = Self::default();
        {
            let mut state = adapter.state.lock();
            for i in 1..=n {
                let record = Record::new()
                    .with_indexed("name", format!("person{i}"))
                    .with_indexed("age", i);
                state.records.insert(Key::new("Person", i), record);
            }
            state.next_id = n + 1;
        }
        adapter
    }

    pub(crate) fn calls(&self) -> Vec<QueryOptions> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn fail_after(&self, calls: usize) {
        self.state.lock().fail_after = Some(calls);
    }

    pub(crate) fn report_more_at_end(&self) {
        self.state.lock().more_at_end = true;
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    fn position(cursor: Option<&Cursor>) -> usize {
        cursor
            .and_then(|c| <[u8; 8]>::try_from(c.as_bytes()).ok())
            .map_or(0, |bytes| u64::from_be_bytes(bytes) as usize)
    }
}

impl Adapter for ListAdapter {
    fn name(&self) -> &str {
        "list"
    }

    fn get(&self, keys: &[Key], _: &ReadOptions<'_>) -> CoreResult<Vec<Option<Record>>> {
        let state = self.state.lock();
        Ok(keys.iter().map(|k| state.records.get(k).cloned()).collect())
    }

    fn put(&self, requests: Vec<PutRequest>, options: &WriteOptions<'_>) -> CoreResult<Vec<Key>> {
        let mut state = self.state.lock();
        let mut keys = Vec::with_capacity(requests.len());
        for request in requests {
            request.validate()?;
            let key = if request.key.is_partial() {
                let id = state.next_id.max(1);
                state.next_id = id + 1;
                request.key.with_completed_id(id)
            } else {
                request.key
            };
            match options.transaction {
                Some(txn) => state
                    .staged
                    .entry(txn.id())
                    .or_default()
                    .push(Staged::Put(key.clone(), request.record)),
                None => {
                    state.records.insert(key.clone(), request.record);
                }
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn delete(&self, keys: &[Key], options: &WriteOptions<'_>) -> CoreResult<()> {
        let mut state = self.state.lock();
        for key in keys {
            match options.transaction {
                Some(txn) => state
                    .staged
                    .entry(txn.id())
                    .or_default()
                    .push(Staged::Delete(key.clone())),
                None => {
                    state.records.remove(key);
                }
            }
        }
        Ok(())
    }

    fn run_query(&self, query: &Query, options: &QueryOptions) -> CoreResult<QueryBatch> {
        let mut state = self.state.lock();
        state.calls.push(options.clone());
        if let Some(limit) = state.fail_after {
            if state.calls.len() > limit {
                return Err(CoreError::unavailable("injected failure"));
            }
        }

        let start = Self::position(options.start_cursor.as_ref()) + options.offset;
        let take = options.limit.unwrap_or(usize::MAX);
        let rows: Vec<(Key, Record)> = state
            .records
            .iter()
            .filter(|(k, _)| query.kind().map_or(true, |kind| k.kind() == kind))
            .skip(start)
            .take(take)
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        let total = state
            .records
            .keys()
            .filter(|k| query.kind().map_or(true, |kind| k.kind() == kind))
            .count();

        let end = start + rows.len();
        let more = if state.more_at_end {
            !rows.is_empty()
        } else {
            end < total
        };
        let result_type = query.result_type();
        let (keys, records): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
        let records = match result_type {
            ResultType::KeysOnly => Vec::new(),
            ResultType::Projection => records
                .iter()
                .map(|r| r.project(query.projection()))
                .collect(),
            ResultType::Full => records,
        };
        Ok(QueryBatch {
            keys,
            records,
            next_cursor: Some(Cursor::new((end as u64).to_be_bytes().to_vec())),
            more,
            result_type,
        })
    }

    fn begin_transaction(&self, options: &BeginOptions) -> CoreResult<TransactionHandle> {
        let handle = TransactionHandle::new(Vec::new(), options.scope.clone(), options.parent)
            .with_deadline(options.deadline);
        self.state.lock().staged.insert(handle.id(), Vec::new());
        Ok(handle)
    }

    fn commit(&self, handle: &TransactionHandle) -> CoreResult<()> {
        check_deadline(handle.deadline())?;
        let mut state = self.state.lock();
        let staged = state.staged.remove(&handle.id()).unwrap_or_default();
        for op in staged {
            match op {
                Staged::Put(key, record) => {
                    state.records.insert(key, record);
                }
                Staged::Delete(key) => {
                    state.records.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self, handle: &TransactionHandle) -> CoreResult<()> {
        self.state.lock().staged.remove(&handle.id());
        Ok(())
    }
}
