//! In-process emulator of the hierarchical store.
//!
//! [`InMemoryService`] implements the whole [`StoreService`] surface in
//! memory: optimistic transactions, id allocation, kind, namespace and
//! ancestor scoping, conjunctive filters over indexed properties,
//! multi-term ordering, projections, and opaque cursors bound to the
//! query that issued them. Faults can be injected for tests.

use crate::error::{ServiceError, ServiceResult};
use crate::messages::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitRequest, CommitResponse, LookupRequest, LookupResponse, MoreResults, Mutation,
    RollbackRequest, RunQueryRequest, RunQueryResponse,
};
use crate::service::StoreService;
use kinddb_core::{
    Cursor, Direction, Filter, Key, Order, Query, Record, ResultType, Value,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Number of calls made to each RPC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `lookup` calls.
    pub lookup: usize,
    /// `allocate_ids` calls.
    pub allocate_ids: usize,
    /// `commit` calls.
    pub commit: usize,
    /// `run_query` calls.
    pub run_query: usize,
    /// `begin_transaction` calls.
    pub begin_transaction: usize,
    /// `rollback` calls.
    pub rollback: usize,
}

#[derive(Debug, Clone)]
struct Stored {
    record: Record,
    indexed: BTreeSet<String>,
}

#[derive(Debug)]
struct OpenTransaction {
    start: u64,
    reads: HashSet<Key>,
    ancestors: Option<Vec<Key>>,
}

impl OpenTransaction {
    fn check_scope(&self, key: &Key) -> ServiceResult<()> {
        match &self.ancestors {
            Some(roots) if !roots.iter().any(|root| key.has_ancestor(root)) => Err(
                ServiceError::InvalidArgument(format!("{key} is outside the transaction's entity groups")),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    commit_errors: VecDeque<ServiceError>,
    dropped_commit_replies: usize,
    unavailable: Option<String>,
    lookup_limit: Option<usize>,
    max_batch: Option<usize>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    entities: BTreeMap<Key, Stored>,
    versions: HashMap<Key, u64>,
    sequence: u64,
    next_id: i64,
    next_transaction: u64,
    transactions: HashMap<Vec<u8>, OpenTransaction>,
    faults: Faults,
    calls: CallCounts,
}

/// Position of an emulator cursor.
#[derive(Serialize, Deserialize)]
struct Position {
    fingerprint: Vec<u8>,
    offset: usize,
}

/// The parts of a query that decide its result order.
#[derive(Serialize)]
struct Shape<'a> {
    kind: Option<&'a str>,
    namespace: Option<&'a str>,
    ancestor: Option<&'a Key>,
    filters: &'a [Filter],
    orders: Vec<Order>,
    projection: &'a [String],
    keys_only: bool,
}

/// In-memory [`StoreService`].
///
/// ```rust
/// use kinddb_remote::{InMemoryService, RemoteAdapter};
/// use kinddb_core::{Adapter, Key, PutRequest, ReadOptions, Record, WriteOptions};
///
/// let adapter = RemoteAdapter::new(InMemoryService::new(), "demo");
/// let keys = adapter
///     .put(
///         vec![PutRequest::new(Key::partial("Note"), Record::new().with_indexed("text", "hi"))],
///         &WriteOptions::default(),
///     )
///     .unwrap();
/// let found = adapter.get(&keys, &ReadOptions::default()).unwrap();
/// assert!(found[0].is_some());
/// ```
#[derive(Debug)]
pub struct InMemoryService {
    state: Mutex<State>,
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryService {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    /// Returns the number of calls made so far.
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Returns the number of stored entities.
    pub fn len(&self) -> usize {
        self.state.lock().entities.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entities.is_empty()
    }

    /// Reads a record without going through the RPC surface.
    pub fn peek(&self, key: &Key) -> Option<Record> {
        self.state
            .lock()
            .entities
            .get(key)
            .map(|stored| stored.record.clone())
    }

    /// Returns the number of open transactions.
    pub fn open_transactions(&self) -> usize {
        self.state.lock().transactions.len()
    }

    /// Makes the next `count` commits fail with `error` without applying.
    pub fn fail_commits_with(&self, count: usize, error: ServiceError) {
        let mut state = self.state.lock();
        state
            .faults
            .commit_errors
            .extend(std::iter::repeat(error).take(count));
    }

    /// Applies the next `count` commits and then reports a lost reply.
    pub fn drop_commit_replies(&self, count: usize) {
        self.state.lock().faults.dropped_commit_replies = count;
    }

    /// Makes every call fail with `Unavailable`, or clears the fault.
    pub fn set_unavailable(&self, message: Option<&str>) {
        self.state.lock().faults.unavailable = message.map(str::to_string);
    }

    /// Answers at most `max` keys per lookup and defers the rest.
    pub fn defer_lookups(&self, max: usize) {
        self.state.lock().faults.lookup_limit = Some(max);
    }

    /// Returns at most `max` results per query batch.
    pub fn set_max_batch(&self, max: Option<usize>) {
        self.state.lock().faults.max_batch = max;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().faults.latency = latency;
    }

    fn enter(
        &self,
        deadline: Option<Instant>,
        count: impl FnOnce(&mut CallCounts),
    ) -> ServiceResult<parking_lot::MutexGuard<'_, State>> {
        let latency = {
            let mut state = self.state.lock();
            count(&mut state.calls);
            if let Some(message) = &state.faults.unavailable {
                return Err(ServiceError::Unavailable(message.clone()));
            }
            state.faults.latency
        };
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ServiceError::DeadlineExceeded);
        }
        Ok(self.state.lock())
    }
}

impl State {
    fn transaction(&mut self, token: &[u8]) -> ServiceResult<&mut OpenTransaction> {
        self.transactions
            .get_mut(token)
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {token:02x?}")))
    }

    fn allocate(&mut self, key: &Key) -> Key {
        loop {
            let id = self.next_id;
            self.next_id += 1;
            let candidate = key.with_completed_id(id);
            if !self.entities.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn check_conflicts(&self, open: &OpenTransaction, mutations: &[Mutation]) -> ServiceResult<()> {
        let touched = open.reads.iter().chain(mutations.iter().map(Mutation::key));
        for key in touched {
            if self.versions.get(key).is_some_and(|&v| v > open.start) {
                return Err(ServiceError::Aborted(format!(
                    "too much contention on {key}; please try again"
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, mutations: Vec<Mutation>) -> u64 {
        self.sequence += 1;
        let sequence = self.sequence;
        let mut index_updates = 0;
        for mutation in mutations {
            match mutation {
                Mutation::Upsert {
                    key,
                    record,
                    indexed,
                } => {
                    index_updates += indexed.len() as u64;
                    self.versions.insert(key.clone(), sequence);
                    self.entities.insert(
                        key,
                        Stored {
                            record,
                            indexed: indexed.into_iter().collect(),
                        },
                    );
                }
                Mutation::Delete { key } => {
                    if let Some(stored) = self.entities.remove(&key) {
                        index_updates += stored.indexed.len() as u64;
                    }
                    self.versions.insert(key, sequence);
                }
            }
        }
        index_updates
    }
}

fn complete(keys: &[Key]) -> ServiceResult<()> {
    for key in keys {
        key.validate_complete()
            .map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;
    }
    Ok(())
}

fn fingerprint(query: &Query) -> ServiceResult<Vec<u8>> {
    let shape = Shape {
        kind: query.kind(),
        namespace: query.namespace(),
        ancestor: query.ancestor(),
        filters: query.filters(),
        orders: query.effective_orders(),
        projection: query.projection(),
        keys_only: query.is_keys_only(),
    };
    let mut bytes = Vec::new();
    ciborium::into_writer(&shape, &mut bytes)
        .map_err(|e| ServiceError::Internal(format!("failed to fingerprint query: {e}")))?;
    Ok(Sha256::digest(&bytes).to_vec())
}

fn start_offset(cursor: Option<&Cursor>, fingerprint: &[u8]) -> ServiceResult<usize> {
    let Some(cursor) = cursor else {
        return Ok(0);
    };
    let position: Position = ciborium::from_reader(cursor.as_bytes())
        .map_err(|_| ServiceError::InvalidArgument("malformed cursor".into()))?;
    if position.fingerprint != fingerprint {
        return Err(ServiceError::InvalidArgument(
            "cursor does not belong to this query".into(),
        ));
    }
    Ok(position.offset)
}

fn cursor_at(fingerprint: Vec<u8>, offset: usize) -> ServiceResult<Cursor> {
    let mut bytes = Vec::new();
    ciborium::into_writer(&Position { fingerprint, offset }, &mut bytes)
        .map_err(|e| ServiceError::Internal(format!("failed to encode cursor: {e}")))?;
    Ok(Cursor::new(bytes))
}

/// Returns the indexed value of `property`, or `None` if it cannot match.
fn indexed_value<'a>(stored: &'a Stored, property: &str) -> Option<&'a Value> {
    if !stored.indexed.contains(property) {
        return None;
    }
    stored.record.get(property)
}

fn matches(stored: &Stored, filter: &Filter) -> bool {
    let accepts = |value: &Value| filter.op.accepts(value.cmp_index(&filter.value));
    match indexed_value(stored, &filter.property) {
        Some(Value::Array(items)) => items.iter().any(accepts),
        Some(value) => accepts(value),
        None => false,
    }
}

/// Sort value of a property: arrays sort by their smallest element
/// ascending and their largest descending.
fn sort_value<'a>(stored: &'a Stored, order: &Order) -> Option<&'a Value> {
    match indexed_value(stored, &order.property)? {
        Value::Array(items) => {
            let pick = items.iter();
            match order.direction {
                Direction::Ascending => pick.min_by(|a, b| a.cmp_index(b)),
                Direction::Descending => pick.max_by(|a, b| a.cmp_index(b)),
            }
        }
        value => Some(value),
    }
}

fn compare(a: (&Key, &Stored), b: (&Key, &Stored), orders: &[Order]) -> Ordering {
    for order in orders {
        let (Some(x), Some(y)) = (sort_value(a.1, order), sort_value(b.1, order)) else {
            continue;
        };
        let ordering = match order.direction {
            Direction::Ascending => x.cmp_index(y),
            Direction::Descending => y.cmp_index(x),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.0.cmp(b.0)
}

fn in_scope(query: &Query, key: &Key) -> bool {
    key.namespace() == query.namespace()
        && query.kind().map_or(true, |kind| key.kind() == kind)
        && query.ancestor().map_or(true, |ancestor| key.has_ancestor(ancestor))
}

impl StoreService for InMemoryService {
    fn lookup(
        &self,
        request: &LookupRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<LookupResponse> {
        let mut state = self.enter(deadline, |c| c.lookup += 1)?;
        complete(&request.keys)?;

        let limit = state.faults.lookup_limit.unwrap_or(usize::MAX);
        let answered = request.keys.len().min(limit.max(1));
        let (now, later) = request.keys.split_at(answered);

        if let Some(token) = &request.transaction {
            let open = state.transaction(token)?;
            for key in now {
                open.check_scope(key)?;
            }
            open.reads.extend(now.iter().cloned());
        }

        let mut response = LookupResponse {
            deferred: later.to_vec(),
            ..LookupResponse::default()
        };
        for key in now {
            match state.entities.get(key) {
                Some(stored) => response.found.push((key.clone(), stored.record.clone())),
                None => response.missing.push(key.clone()),
            }
        }
        trace!(
            found = response.found.len(),
            missing = response.missing.len(),
            deferred = response.deferred.len(),
            "emulator lookup"
        );
        Ok(response)
    }

    fn allocate_ids(
        &self,
        request: &AllocateIdsRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<AllocateIdsResponse> {
        let mut state = self.enter(deadline, |c| c.allocate_ids += 1)?;
        if let Some(key) = request.keys.iter().find(|k| !k.is_partial()) {
            return Err(ServiceError::InvalidArgument(format!(
                "cannot allocate an id for complete key {key}"
            )));
        }
        let keys = request.keys.iter().map(|key| state.allocate(key)).collect();
        Ok(AllocateIdsResponse { keys })
    }

    fn commit(
        &self,
        request: &CommitRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<CommitResponse> {
        let mut state = self.enter(deadline, |c| c.commit += 1)?;
        let open = match &request.transaction {
            Some(token) => {
                let open = state.transactions.remove(token).ok_or_else(|| {
                    ServiceError::NotFound(format!("transaction {token:02x?}"))
                })?;
                Some(open)
            }
            None => None,
        };

        if let Some(error) = state.faults.commit_errors.pop_front() {
            debug!(error = %error, "emulator injected commit failure");
            return Err(error);
        }

        let keys: Vec<Key> = request.mutations.iter().map(|m| m.key().clone()).collect();
        complete(&keys)?;
        if let Some(open) = &open {
            for key in &keys {
                open.check_scope(key)?;
            }
            state.check_conflicts(open, &request.mutations)?;
        }

        let index_updates = state.apply(request.mutations.clone());
        debug!(
            mutations = request.mutations.len(),
            transactional = open.is_some(),
            "emulator commit"
        );

        if state.faults.dropped_commit_replies > 0 {
            state.faults.dropped_commit_replies -= 1;
            return Err(ServiceError::transport("connection reset before commit reply"));
        }
        Ok(CommitResponse { index_updates })
    }

    fn run_query(
        &self,
        request: &RunQueryRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<RunQueryResponse> {
        let state = self.enter(deadline, |c| c.run_query += 1)?;
        let query = &request.query;
        query
            .validate()
            .map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;

        let fingerprint = fingerprint(query)?;
        let start = start_offset(request.start_cursor.as_ref(), &fingerprint)?;
        let orders = query.effective_orders();

        let mut rows: Vec<(&Key, &Stored)> = state
            .entities
            .iter()
            .filter(|(key, _)| in_scope(query, key))
            .filter(|(_, stored)| query.filters().iter().all(|f| matches(stored, f)))
            .filter(|(_, stored)| orders.iter().all(|o| sort_value(stored, o).is_some()))
            .filter(|(_, stored)| {
                query
                    .projection()
                    .iter()
                    .all(|p| indexed_value(stored, p).is_some())
            })
            .collect();
        rows.sort_by(|a, b| compare(*a, *b, &orders));

        let total = rows.len();
        let first = start.saturating_add(request.offset).min(total);
        let mut limit = request.limit.unwrap_or(usize::MAX);
        let mut capped = false;
        if let Some(max) = state.faults.max_batch {
            if max < limit {
                limit = max;
                capped = true;
            }
        }
        let end = first.saturating_add(limit).min(total);
        let batch = &rows[first..end];

        let result_type = query.result_type();
        let keys = batch.iter().map(|(key, _)| (*key).clone()).collect();
        let records = match result_type {
            ResultType::KeysOnly => Vec::new(),
            ResultType::Projection => batch
                .iter()
                .map(|(_, stored)| stored.record.project(query.projection()))
                .collect(),
            ResultType::Full => batch.iter().map(|(_, s)| s.record.clone()).collect(),
        };
        let more_results = if end >= total {
            MoreResults::NoMoreResults
        } else if capped {
            MoreResults::NotFinished
        } else {
            MoreResults::MoreAfterLimit
        };

        trace!(
            kind = query.kind().unwrap_or("*"),
            start = first,
            returned = end - first,
            total,
            "emulator query"
        );
        Ok(RunQueryResponse {
            keys,
            records,
            end_cursor: Some(cursor_at(fingerprint, end)?),
            more_results,
            result_type,
        })
    }

    fn begin_transaction(
        &self,
        request: &BeginTransactionRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<BeginTransactionResponse> {
        let mut state = self.enter(deadline, |c| c.begin_transaction += 1)?;
        if let Some(ancestors) = &request.ancestors {
            complete(ancestors)?;
        }
        state.next_transaction += 1;
        let token = state.next_transaction.to_be_bytes().to_vec();
        let start = state.sequence;
        state.transactions.insert(
            token.clone(),
            OpenTransaction {
                start,
                reads: HashSet::new(),
                ancestors: request.ancestors.clone(),
            },
        );
        Ok(BeginTransactionResponse { transaction: token })
    }

    fn rollback(&self, request: &RollbackRequest, deadline: Option<Instant>) -> ServiceResult<()> {
        let mut state = self.enter(deadline, |c| c.rollback += 1)?;
        state
            .transactions
            .remove(&request.transaction)
            .map(|_| ())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("transaction {:02x?}", request.transaction))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinddb_core::{Operator, Record};

    const PROJECT: &str = "test";

    fn upsert(key: Key, record: Record) -> Mutation {
        let indexed = record.indexed_names();
        Mutation::Upsert {
            key,
            record,
            indexed,
        }
    }

    fn seed(service: &InMemoryService, rows: Vec<(Key, Record)>) {
        let request = CommitRequest {
            project: PROJECT.into(),
            transaction: None,
            mutations: rows.into_iter().map(|(k, r)| upsert(k, r)).collect(),
        };
        service.commit(&request, None).unwrap();
    }

    fn query(service: &InMemoryService, query: Query) -> RunQueryResponse {
        let request = RunQueryRequest {
            project: PROJECT.into(),
            query,
            start_cursor: None,
            limit: None,
            offset: 0,
        };
        service.run_query(&request, None).unwrap()
    }

    fn people() -> InMemoryService {
        let service = InMemoryService::new();
        seed(
            &service,
            vec![
                (
                    Key::new("Person", 1),
                    Record::new()
                        .with_indexed("age", 30i64)
                        .with_indexed("tags", Value::array(["a", "b"])),
                ),
                (
                    Key::new("Person", 2),
                    Record::new()
                        .with_indexed("age", 20i64)
                        .with_indexed("tags", Value::array(["c"])),
                ),
                (
                    Key::new("Person", 3),
                    Record::new().with_unindexed("age", 40i64),
                ),
                (Key::new("Pet", 1), Record::new().with_indexed("age", 3i64)),
            ],
        );
        service
    }

    fn ids(response: &RunQueryResponse) -> Vec<i64> {
        response.keys.iter().filter_map(Key::int_id).collect()
    }

    #[test]
    fn filters_only_match_indexed_properties() {
        let service = people();
        let response = query(&service, Query::new("Person").filter("age", Operator::Gt, 10i64));
        assert_eq!(ids(&response), vec![2, 1]);
    }

    #[test]
    fn repeated_properties_match_any_element() {
        let service = people();
        let response = query(&service, Query::new("Person").filter("tags", Operator::Eq, "b"));
        assert_eq!(ids(&response), vec![1]);
    }

    #[test]
    fn descending_order_excludes_missing_properties() {
        let service = people();
        let response = query(
            &service,
            Query::new("Person").order_by("age", Direction::Descending),
        );
        assert_eq!(ids(&response), vec![1, 2]);
    }

    #[test]
    fn kindless_query_spans_kinds() {
        let service = people();
        let response = query(&service, Query::kindless().keys_only());
        assert_eq!(response.keys.len(), 4);
        assert!(response.records.is_empty());
        assert_eq!(response.result_type, ResultType::KeysOnly);
    }

    #[test]
    fn ancestor_queries_include_the_ancestor() {
        let service = InMemoryService::new();
        let org = Key::new("Org", 1);
        let member = org.child("Org", 2).unwrap();
        seed(
            &service,
            vec![
                (org.clone(), Record::new()),
                (member.clone(), Record::new()),
                (Key::new("Org", 3), Record::new()),
            ],
        );
        let response = query(&service, Query::new("Org").with_ancestor(org.clone()));
        assert_eq!(response.keys, vec![org, member]);
    }

    #[test]
    fn projection_returns_only_selected_properties() {
        let service = people();
        let response = query(&service, Query::new("Person").select(["age"]));
        assert_eq!(response.result_type, ResultType::Projection);
        assert_eq!(response.records.len(), 2);
        assert!(response.records.iter().all(|r| r.len() == 1));
    }

    #[test]
    fn cursor_resumes_and_is_bound_to_its_query() {
        let service = people();
        let q = Query::new("Person").order_by("age", Direction::Ascending);
        let first = service
            .run_query(
                &RunQueryRequest {
                    project: PROJECT.into(),
                    query: q.clone(),
                    start_cursor: None,
                    limit: Some(1),
                    offset: 0,
                },
                None,
            )
            .unwrap();
        assert_eq!(ids(&first), vec![2]);
        assert_eq!(first.more_results, MoreResults::MoreAfterLimit);

        let resume = |query: Query| {
            service.run_query(
                &RunQueryRequest {
                    project: PROJECT.into(),
                    query,
                    start_cursor: first.end_cursor.clone(),
                    limit: None,
                    offset: 0,
                },
                None,
            )
        };
        let rest = resume(q.clone()).unwrap();
        assert_eq!(ids(&rest), vec![1]);
        assert_eq!(rest.more_results, MoreResults::NoMoreResults);

        let other = resume(q.order_by("age", Direction::Descending));
        assert!(matches!(other, Err(ServiceError::InvalidArgument(_))));
    }

    #[test]
    fn max_batch_reports_not_finished() {
        let service = people();
        service.set_max_batch(Some(1));
        let response = query(&service, Query::new("Person").order_by("age", Direction::Ascending));
        assert_eq!(response.keys.len(), 1);
        assert_eq!(response.more_results, MoreResults::NotFinished);
    }

    #[test]
    fn write_after_transactional_read_aborts() {
        let service = people();
        let key = Key::new("Person", 1);
        let token = service
            .begin_transaction(
                &BeginTransactionRequest {
                    project: PROJECT.into(),
                    ancestors: None,
                },
                None,
            )
            .unwrap()
            .transaction;
        service
            .lookup(
                &LookupRequest {
                    project: PROJECT.into(),
                    keys: vec![key.clone()],
                    transaction: Some(token.clone()),
                },
                None,
            )
            .unwrap();

        seed(&service, vec![(key.clone(), Record::new())]);

        let result = service.commit(
            &CommitRequest {
                project: PROJECT.into(),
                transaction: Some(token),
                mutations: vec![Mutation::Delete { key }],
            },
            None,
        );
        assert!(matches!(result, Err(ServiceError::Aborted(_))));
        assert_eq!(service.open_transactions(), 0);
    }

    #[test]
    fn unknown_transaction_is_not_found() {
        let service = InMemoryService::new();
        let result = service.rollback(
            &RollbackRequest {
                project: PROJECT.into(),
                transaction: vec![0xde, 0xad],
            },
            None,
        );
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn allocated_ids_skip_taken_ones() {
        let service = InMemoryService::new();
        seed(&service, vec![(Key::new("Person", 1), Record::new())]);
        let response = service
            .allocate_ids(
                &AllocateIdsRequest {
                    project: PROJECT.into(),
                    keys: vec![Key::partial("Person")],
                },
                None,
            )
            .unwrap();
        assert_eq!(response.keys, vec![Key::new("Person", 2)]);
    }

    #[test]
    fn injected_faults() {
        let service = InMemoryService::new();
        service.fail_commits_with(1, ServiceError::Aborted("injected".into()));
        let request = CommitRequest {
            project: PROJECT.into(),
            transaction: None,
            mutations: vec![upsert(Key::new("Person", 1), Record::new())],
        };
        assert!(matches!(
            service.commit(&request, None),
            Err(ServiceError::Aborted(_))
        ));
        assert!(service.is_empty());
        assert!(service.commit(&request, None).is_ok());

        service.set_unavailable(Some("maintenance"));
        assert!(matches!(
            service.commit(&request, None),
            Err(ServiceError::Unavailable(_))
        ));
        service.set_unavailable(None);

        service.set_latency(Some(Duration::from_millis(5)));
        let deadline = Instant::now() + Duration::from_millis(1);
        assert_eq!(
            service.commit(&request, Some(deadline)),
            Err(ServiceError::DeadlineExceeded)
        );
        assert_eq!(service.calls().commit, 4);
    }

    proptest::proptest! {
        #[test]
        fn range_filters_match_a_linear_scan(
            ages in proptest::collection::vec(-50i64..50, 0..24),
            low in -60i64..60,
            span in 0i64..40,
        ) {
            let service = InMemoryService::new();
            let rows = ages
                .iter()
                .enumerate()
                .map(|(i, &age)| (Key::new("Person", i as i64 + 1), Record::new().with_indexed("age", age)))
                .collect();
            seed(&service, rows);

            let response = query(
                &service,
                Query::new("Person")
                    .filter("age", Operator::Ge, low)
                    .and_filter("age", Operator::Lt, low + span),
            );
            let found: Vec<i64> = response
                .records
                .iter()
                .filter_map(|r| r.get("age").and_then(Value::as_integer))
                .collect();
            let mut expected: Vec<i64> = ages
                .iter()
                .copied()
                .filter(|age| (low..low + span).contains(age))
                .collect();
            expected.sort_unstable();
            proptest::prop_assert_eq!(found, expected);
        }
    }
}
