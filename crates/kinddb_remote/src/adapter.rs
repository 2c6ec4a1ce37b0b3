//! Adapter over a remote store service.

use crate::error::{CallKind, ServiceError};
use crate::messages::{
    AllocateIdsRequest, BeginTransactionRequest, CommitRequest, LookupRequest, MoreResults,
    Mutation, RollbackRequest, RunQueryRequest,
};
use crate::service::StoreService;
use kinddb_core::adapter::{check_deadline, QueryOptions};
use kinddb_core::{
    Adapter, BeginOptions, CoreError, CoreResult, IsolationScope, Key, PutRequest, Query,
    QueryBatch, ReadOptions, Record, ResultType, TransactionHandle, TransactionId, WriteOptions,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Mutations buffered for an open transaction.
#[derive(Debug)]
struct Staged {
    token: Vec<u8>,
    mutations: Vec<Mutation>,
}

/// [`Adapter`] that talks to a [`StoreService`].
///
/// Non-transactional writes are committed immediately as a single-shot
/// commit. Transactional writes are buffered locally and sent with the
/// transaction's commit, so they stay invisible until then.
pub struct RemoteAdapter<S> {
    service: S,
    project: String,
    staged: Mutex<HashMap<TransactionId, Staged>>,
}

impl<S: StoreService> RemoteAdapter<S> {
    /// Creates an adapter for `project`.
    pub fn new(service: S, project: impl Into<String>) -> Self {
        Self {
            service,
            project: project.into(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Returns the project id.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Returns the number of transactions begun and not yet finished.
    pub fn open_transactions(&self) -> usize {
        self.staged.lock().len()
    }

    fn lookup_all(
        &self,
        keys: Vec<Key>,
        transaction: Option<&TransactionHandle>,
        deadline: Option<Instant>,
    ) -> CoreResult<HashMap<Key, Record>> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut pending = keys;
        let mut round = 0;
        while !pending.is_empty() {
            check_deadline(deadline)?;
            round += 1;
            let request = LookupRequest {
                project: self.project.clone(),
                keys: pending,
                transaction: transaction.map(|t| t.token().to_vec()),
            };
            let response = self
                .service
                .lookup(&request, deadline)
                .map_err(|e| e.into_core(CallKind::Read))?;

            if response.deferred.len() >= request.keys.len() {
                return Err(CoreError::unavailable(format!(
                    "lookup of {} keys made no progress",
                    request.keys.len()
                )));
            }
            if !response.deferred.is_empty() {
                trace!(round, deferred = response.deferred.len(), "lookup deferred keys");
            }
            found.extend(response.found);
            pending = response.deferred;
        }
        Ok(found)
    }

    fn allocate(&self, requests: &mut [PutRequest], deadline: Option<Instant>) -> CoreResult<()> {
        let partial: Vec<usize> = requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.key.is_partial())
            .map(|(i, _)| i)
            .collect();
        if partial.is_empty() {
            return Ok(());
        }
        check_deadline(deadline)?;

        let request = AllocateIdsRequest {
            project: self.project.clone(),
            keys: partial.iter().map(|&i| requests[i].key.clone()).collect(),
        };
        let response = self
            .service
            .allocate_ids(&request, deadline)
            .map_err(|e| e.into_core(CallKind::Read))?;
        if response.keys.len() != partial.len() || response.keys.iter().any(Key::is_partial) {
            return Err(CoreError::codec(format!(
                "allocated {} keys for {} partial keys",
                response.keys.len(),
                partial.len()
            )));
        }
        for (i, key) in partial.into_iter().zip(response.keys) {
            requests[i].key = key;
        }
        Ok(())
    }

    fn apply(
        &self,
        mutations: Vec<Mutation>,
        transaction: Option<&TransactionHandle>,
        deadline: Option<Instant>,
    ) -> CoreResult<()> {
        match transaction {
            Some(handle) => {
                if let Some(key) = mutations
                    .iter()
                    .map(Mutation::key)
                    .find(|key| !handle.scope().contains(key))
                {
                    return Err(CoreError::invalid_argument(format!(
                        "{key} is outside the isolation scope of {}",
                        handle.id()
                    )));
                }
                let mut staged = self.staged.lock();
                let entry = staged.get_mut(&handle.id()).ok_or_else(|| {
                    CoreError::invalid_operation(format!("{} is not open", handle.id()))
                })?;
                trace!(txn = %handle.id(), count = mutations.len(), "staging mutations");
                entry.mutations.extend(mutations);
                Ok(())
            }
            None => {
                check_deadline(deadline)?;
                let request = CommitRequest {
                    project: self.project.clone(),
                    transaction: None,
                    mutations,
                };
                self.service
                    .commit(&request, deadline)
                    .map_err(|e| e.into_core(CallKind::Write))?;
                Ok(())
            }
        }
    }
}

impl<S: StoreService> Adapter for RemoteAdapter<S> {
    fn name(&self) -> &str {
        "remote"
    }

    fn get(&self, keys: &[Key], options: &ReadOptions<'_>) -> CoreResult<Vec<Option<Record>>> {
        check_deadline(options.deadline)?;
        for key in keys {
            key.validate_complete()?;
        }

        let mut unique: Vec<Key> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(key) {
                unique.push(key.clone());
            }
        }
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        debug!(keys = unique.len(), "lookup");
        let found = self.lookup_all(unique, options.transaction, options.deadline)?;
        Ok(keys.iter().map(|key| found.get(key).cloned()).collect())
    }

    fn put(&self, mut requests: Vec<PutRequest>, options: &WriteOptions<'_>) -> CoreResult<Vec<Key>> {
        check_deadline(options.deadline)?;
        for request in &requests {
            request.validate()?;
        }
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        self.allocate(&mut requests, options.deadline)?;
        let keys: Vec<Key> = requests.iter().map(|r| r.key.clone()).collect();
        let mutations = requests
            .into_iter()
            .map(|r| Mutation::Upsert {
                key: r.key,
                record: r.record,
                indexed: r.indexed,
            })
            .collect();

        debug!(keys = keys.len(), transactional = options.transaction.is_some(), "put");
        self.apply(mutations, options.transaction, options.deadline)?;
        Ok(keys)
    }

    fn delete(&self, keys: &[Key], options: &WriteOptions<'_>) -> CoreResult<()> {
        check_deadline(options.deadline)?;
        for key in keys {
            key.validate_complete()?;
        }
        if keys.is_empty() {
            return Ok(());
        }

        debug!(keys = keys.len(), transactional = options.transaction.is_some(), "delete");
        let mutations = keys
            .iter()
            .map(|key| Mutation::Delete { key: key.clone() })
            .collect();
        self.apply(mutations, options.transaction, options.deadline)
    }

    fn run_query(&self, query: &Query, options: &QueryOptions) -> CoreResult<QueryBatch> {
        check_deadline(options.deadline)?;
        query.validate()?;

        let request = RunQueryRequest {
            project: self.project.clone(),
            query: query.clone(),
            start_cursor: options.start_cursor.clone(),
            limit: options.limit,
            offset: options.offset,
        };
        let response = self
            .service
            .run_query(&request, options.deadline)
            .map_err(|e| e.into_core(CallKind::Read))?;

        if response.result_type != ResultType::KeysOnly
            && response.records.len() != response.keys.len()
        {
            return Err(CoreError::codec(format!(
                "query returned {} keys but {} records",
                response.keys.len(),
                response.records.len()
            )));
        }
        trace!(
            kind = query.kind().unwrap_or("*"),
            results = response.keys.len(),
            more = ?response.more_results,
            "query batch"
        );
        Ok(QueryBatch {
            keys: response.keys,
            records: response.records,
            next_cursor: response.end_cursor,
            more: response.more_results != MoreResults::NoMoreResults,
            result_type: response.result_type,
        })
    }

    fn begin_transaction(&self, options: &BeginOptions) -> CoreResult<TransactionHandle> {
        check_deadline(options.deadline)?;
        let ancestors = match &options.scope {
            IsolationScope::Global => None,
            IsolationScope::Ancestors(keys) => Some(keys.clone()),
        };
        let request = BeginTransactionRequest {
            project: self.project.clone(),
            ancestors,
        };
        let response = self
            .service
            .begin_transaction(&request, options.deadline)
            .map_err(|e| e.into_core(CallKind::Read))?;

        let handle =
            TransactionHandle::new(response.transaction, options.scope.clone(), options.parent)
                .with_deadline(options.deadline);
        self.staged.lock().insert(
            handle.id(),
            Staged {
                token: handle.token().to_vec(),
                mutations: Vec::new(),
            },
        );
        debug!(txn = %handle.id(), parent = ?options.parent, "begin transaction");
        Ok(handle)
    }

    fn commit(&self, handle: &TransactionHandle) -> CoreResult<()> {
        let staged = {
            let mut open = self.staged.lock();
            let staged = open.remove(&handle.id()).ok_or_else(|| {
                CoreError::invalid_operation(format!("{} is not open", handle.id()))
            })?;
            // An expired commit is never sent; the rollback that follows releases it.
            if let Err(err) = check_deadline(handle.deadline()) {
                open.insert(handle.id(), staged);
                return Err(err);
            }
            staged
        };
        debug!(txn = %handle.id(), mutations = staged.mutations.len(), "commit");
        let request = CommitRequest {
            project: self.project.clone(),
            transaction: Some(staged.token),
            mutations: staged.mutations,
        };
        self.service
            .commit(&request, handle.deadline())
            .map_err(|e| e.into_core(CallKind::Write))?;
        Ok(())
    }

    fn rollback(&self, handle: &TransactionHandle) -> CoreResult<()> {
        let Some(staged) = self.staged.lock().remove(&handle.id()) else {
            return Ok(());
        };
        debug!(txn = %handle.id(), dropped = staged.mutations.len(), "rollback");
        let request = RollbackRequest {
            project: self.project.clone(),
            transaction: staged.token,
        };
        check_deadline(handle.deadline())?;
        match self.service.rollback(&request, handle.deadline()) {
            Ok(()) | Err(ServiceError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into_core(CallKind::Read)),
        }
    }
}

impl<S> std::fmt::Debug for RemoteAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("project", &self.project)
            .field("open_transactions", &self.staged.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryService;
    use kinddb_core::{Operator, Query};
    use std::sync::Arc;
    use std::time::Duration;

    fn adapter() -> RemoteAdapter<Arc<InMemoryService>> {
        RemoteAdapter::new(Arc::new(InMemoryService::new()), "test")
    }

    fn person(name: &str, age: i64) -> Record {
        Record::new().with_indexed("name", name).with_indexed("age", age)
    }

    #[test]
    fn put_completes_partial_keys() {
        let adapter = adapter();
        let keys = adapter
            .put(
                vec![
                    PutRequest::new(Key::partial("Person"), person("a", 1)),
                    PutRequest::new(Key::new("Person", "bob"), person("b", 2)),
                    PutRequest::new(Key::partial("Person"), person("c", 3)),
                ],
                &WriteOptions::default(),
            )
            .unwrap();
        assert!(keys.iter().all(Key::is_complete));
        assert_eq!(keys[1], Key::new("Person", "bob"));
        assert_ne!(keys[0], keys[2]);
        assert_eq!(adapter.service().calls().allocate_ids, 1);
    }

    #[test]
    fn get_preserves_order_duplicates_and_gaps() {
        let adapter = adapter();
        let a = Key::new("Person", 1);
        let b = Key::new("Person", 2);
        adapter
            .put(vec![PutRequest::new(a.clone(), person("a", 1))], &WriteOptions::default())
            .unwrap();

        let results = adapter
            .get(&[b.clone(), a.clone(), a.clone()], &ReadOptions::default())
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_none());
        assert_eq!(results[1], Some(person("a", 1)));
        assert_eq!(results[2], results[1]);
    }

    #[test]
    fn deferred_keys_are_requested_again() {
        let adapter = adapter();
        let keys: Vec<Key> = (1..=5).map(|i| Key::new("Person", i)).collect();
        let requests = keys
            .iter()
            .map(|k| PutRequest::new(k.clone(), person("p", 1)))
            .collect();
        adapter.put(requests, &WriteOptions::default()).unwrap();

        adapter.service().defer_lookups(2);
        let results = adapter.get(&keys, &ReadOptions::default()).unwrap();
        assert!(results.iter().all(Option::is_some));
        assert_eq!(adapter.service().calls().lookup, 3);
    }

    #[test]
    fn get_rejects_partial_keys() {
        let result = adapter().get(&[Key::partial("Person")], &ReadOptions::default());
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn transactional_writes_are_staged_until_commit() {
        let adapter = adapter();
        let key = Key::new("Person", 1);
        let handle = adapter.begin_transaction(&BeginOptions::default()).unwrap();
        adapter
            .put(
                vec![PutRequest::new(key.clone(), person("a", 1))],
                &WriteOptions::in_transaction(&handle),
            )
            .unwrap();
        assert!(adapter.get(&[key.clone()], &ReadOptions::default()).unwrap()[0].is_none());
        assert_eq!(adapter.service().calls().commit, 0);

        adapter.commit(&handle).unwrap();
        assert!(adapter.get(&[key], &ReadOptions::default()).unwrap()[0].is_some());
        assert_eq!(adapter.open_transactions(), 0);
    }

    #[test]
    fn expired_commit_is_not_sent() {
        let adapter = adapter();
        let key = Key::new("Person", 1);
        let deadline = Instant::now() + Duration::from_millis(5);
        let handle = adapter
            .begin_transaction(&BeginOptions {
                deadline: Some(deadline),
                ..BeginOptions::default()
            })
            .unwrap();
        assert_eq!(handle.deadline(), Some(deadline));
        adapter
            .put(
                vec![PutRequest::new(key.clone(), person("a", 1))],
                &WriteOptions::in_transaction(&handle),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert!(matches!(
            adapter.commit(&handle),
            Err(CoreError::Unavailable { ambiguous: false, .. })
        ));
        assert_eq!(adapter.service().calls().commit, 0);
        assert_eq!(adapter.open_transactions(), 1);
        assert!(adapter.rollback(&handle).is_err());
        assert_eq!(adapter.open_transactions(), 0);
        assert!(adapter.get(&[key], &ReadOptions::default()).unwrap()[0].is_none());
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let adapter = adapter();
        let key = Key::new("Person", 1);
        let handle = adapter.begin_transaction(&BeginOptions::default()).unwrap();
        adapter
            .delete(&[key.clone()], &WriteOptions::in_transaction(&handle))
            .unwrap();
        adapter.rollback(&handle).unwrap();
        adapter.rollback(&handle).unwrap();
        assert!(matches!(
            adapter.commit(&handle),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn writes_outside_scope_are_rejected() {
        let adapter = adapter();
        let org = Key::new("Organization", 1);
        let handle = adapter
            .begin_transaction(&BeginOptions {
                scope: IsolationScope::Ancestors(vec![org.clone()]),
                ..BeginOptions::default()
            })
            .unwrap();
        let inside = org.child("Person", 1).unwrap();
        let options = WriteOptions::in_transaction(&handle);
        assert!(adapter
            .put(vec![PutRequest::new(inside, person("a", 1))], &options)
            .is_ok());
        let outside = adapter.put(
            vec![PutRequest::new(Key::new("Person", 1), person("b", 2))],
            &options,
        );
        assert!(matches!(outside, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn concurrent_transactions_conflict_at_commit() {
        let adapter = adapter();
        let key = Key::new("Counter", 1);
        let first = adapter.begin_transaction(&BeginOptions::default()).unwrap();
        let second = adapter.begin_transaction(&BeginOptions::default()).unwrap();
        for handle in [&first, &second] {
            adapter
                .get(&[key.clone()], &ReadOptions::in_transaction(handle))
                .unwrap();
            adapter
                .put(
                    vec![PutRequest::new(key.clone(), Record::new().with_indexed("n", 1i64))],
                    &WriteOptions::in_transaction(handle),
                )
                .unwrap();
        }
        adapter.commit(&first).unwrap();
        let err = adapter.commit(&second).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn lost_commit_reply_is_ambiguous() {
        let adapter = adapter();
        adapter.service().drop_commit_replies(1);
        let key = Key::new("Person", 1);
        let err = adapter
            .put(vec![PutRequest::new(key.clone(), person("a", 1))], &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::Unavailable { ambiguous: true, .. }));
        // The write landed even though the reply was lost.
        assert!(adapter.get(&[key], &ReadOptions::default()).unwrap()[0].is_some());
        assert_eq!(adapter.service().calls().commit, 1);
    }

    #[test]
    fn expired_deadline_skips_the_call() {
        let adapter = adapter();
        let past = Instant::now();
        std::thread::sleep(Duration::from_millis(1));
        let options = ReadOptions::default().with_deadline(Some(past));
        let err = adapter.get(&[Key::new("Person", 1)], &options).unwrap_err();
        assert!(matches!(err, CoreError::Unavailable { ambiguous: false, .. }));
        assert_eq!(adapter.service().calls().lookup, 0);
    }

    #[test]
    fn query_batches_report_continuation() {
        let adapter = adapter();
        let requests = (1..=5)
            .map(|i| PutRequest::new(Key::new("Person", i), person("p", i)))
            .collect();
        adapter.put(requests, &WriteOptions::default()).unwrap();

        let query = Query::new("Person").filter("age", Operator::Gt, 1i64);
        let first = adapter
            .run_query(&query, &QueryOptions { limit: Some(2), ..QueryOptions::default() })
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.more);

        let rest = adapter
            .run_query(
                &query,
                &QueryOptions {
                    start_cursor: first.next_cursor,
                    ..QueryOptions::default()
                },
            )
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert!(!rest.more);
    }
}
