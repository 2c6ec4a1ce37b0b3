//! Transaction manager.

use crate::adapter::{deadline_after, Adapter, BeginOptions};
use crate::error::{CoreError, CoreResult};
use crate::transaction::handle::{IsolationScope, TransactionHandle};
use crate::transaction::state::Transaction;
use crate::types::TransactionId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default number of retries after a commit conflict.
pub const DEFAULT_RETRIES: u32 = 3;

/// How a transactional scope relates to an enclosing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Join the enclosing transaction if there is one.
    #[default]
    Nested,
    /// Always begin a new transaction, suspending the enclosing one.
    Independent,
}

/// Options for one transactional unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Propagation mode.
    pub propagation: Propagation,
    /// Retries after a commit conflict. The body runs at most `retries + 1` times.
    pub retries: u32,
    /// Records the transaction may touch.
    pub scope: IsolationScope,
    /// Deadline for each attempt, measured from its begin.
    pub timeout: Option<Duration>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            propagation: Propagation::Nested,
            retries: DEFAULT_RETRIES,
            scope: IsolationScope::Global,
            timeout: None,
        }
    }
}

impl TransactionOptions {
    /// Creates default options: nested, three retries, global scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options for an independent transaction.
    #[must_use]
    pub fn independent() -> Self {
        Self::default().with_propagation(Propagation::Independent)
    }

    /// Sets the propagation mode.
    #[must_use]
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the isolation scope.
    #[must_use]
    pub fn with_scope(mut self, scope: IsolationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

type Frame = Rc<RefCell<Transaction>>;

/// Runs units of work inside backend transactions.
///
/// A manager owns the transaction stack of one execution context and is
/// deliberately `!Sync`: each thread or task builds its own. The top of the
/// stack is the transaction that reads and writes are attached to.
///
/// - An outermost or [`Propagation::Independent`] scope begins a backend
///   transaction, runs the body, and commits. A commit `Conflict` rolls
///   back and re-runs the body, up to the retry budget.
/// - A [`Propagation::Nested`] scope inside an active transaction joins it.
///   Its commit is a no-op and its failure dooms the owning transaction.
pub struct TransactionManager {
    adapter: Arc<dyn Adapter>,
    stack: RefCell<Vec<Frame>>,
    depth: Cell<usize>,
}

impl TransactionManager {
    /// Creates a manager over `adapter`.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            stack: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        }
    }

    /// Returns the handle of the current transaction.
    pub fn current(&self) -> Option<TransactionHandle> {
        self.top()
            .and_then(|frame| frame.borrow().handle().cloned())
    }

    /// Returns the deadline of the current transaction attempt.
    pub fn current_deadline(&self) -> Option<Instant> {
        self.top().and_then(|frame| frame.borrow().deadline())
    }

    /// Returns true inside an active transaction.
    pub fn in_transaction(&self) -> bool {
        self.top().is_some()
    }

    /// Returns the current scope nesting depth; zero outside transactions.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    fn top(&self) -> Option<Frame> {
        self.stack
            .borrow()
            .last()
            .filter(|frame| frame.borrow().is_active())
            .cloned()
    }

    /// Runs `body` in a transactional scope.
    ///
    /// Errors returned by the body roll the scope back and are returned
    /// unchanged. Only `Conflict` from commit is retried.
    ///
    /// # Errors
    ///
    /// Returns the body's error, `RetriesExceeded` once the retry budget
    /// is spent, `TransactionAborted` if a nested scope failed, or any
    /// error from begin or commit.
    pub fn run<T, E, F>(&self, options: &TransactionOptions, body: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: From<CoreError>,
    {
        match (options.propagation, self.top()) {
            (Propagation::Nested, Some(owner)) => self.run_nested(&owner, body),
            _ => self.run_new(options, body),
        }
    }

    fn run_nested<T, E, F>(&self, owner: &Frame, mut body: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let _depth = DepthGuard::enter(&self.depth);
        let depth = self.depth.get();
        trace!(depth, "joining enclosing transaction");

        let result = body();
        if result.is_err() {
            debug!(depth, "nested scope failed, dooming enclosing transaction");
            owner
                .borrow_mut()
                .doom(format!("nested scope at depth {depth} failed"));
        }
        result
    }

    fn run_new<T, E, F>(&self, options: &TransactionOptions, mut body: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: From<CoreError>,
    {
        let max_attempts = options.retries.saturating_add(1);
        let parent = self.current().map(|handle| handle.id());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let scope = self.begin(options, parent)?;
            debug!(txn = %scope.handle.id(), attempt, depth = scope.depth, "transaction started");

            let value = match body() {
                Ok(value) => value,
                Err(err) => {
                    scope.rollback();
                    return Err(err);
                }
            };

            let doomed = scope.frame.borrow().doomed().map(str::to_string);
            if let Some(reason) = doomed {
                scope.rollback();
                return Err(CoreError::transaction_aborted(reason).into());
            }

            match scope.commit() {
                Ok(()) => return Ok(value),
                Err(err) if err.is_conflict() => {
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %err, "transaction retries exceeded");
                        return Err(CoreError::RetriesExceeded {
                            attempts: attempt,
                            source: Box::new(err),
                        }
                        .into());
                    }
                    debug!(attempt, error = %err, "commit conflict, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn begin(
        &self,
        options: &TransactionOptions,
        parent: Option<TransactionId>,
    ) -> CoreResult<ScopeGuard<'_>> {
        let deadline = options.timeout.and_then(deadline_after);
        let handle = self.adapter.begin_transaction(&BeginOptions {
            scope: options.scope.clone(),
            parent,
            deadline,
        })?;

        let depth_guard = DepthGuard::enter(&self.depth);
        let depth = self.depth.get();
        let frame = Rc::new(RefCell::new(Transaction::new(depth, deadline)));
        frame.borrow_mut().start(handle.clone())?;
        self.stack.borrow_mut().push(Rc::clone(&frame));

        Ok(ScopeGuard {
            manager: self,
            frame,
            handle,
            depth,
            _depth: depth_guard,
        })
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("adapter", &self.adapter.name())
            .field("depth", &self.depth.get())
            .finish_non_exhaustive()
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Owns one pushed frame. Dropping it pops the frame and rolls back a
/// transaction that is still active, which covers panics in the body.
struct ScopeGuard<'a> {
    manager: &'a TransactionManager,
    frame: Frame,
    handle: TransactionHandle,
    depth: usize,
    _depth: DepthGuard<'a>,
}

impl ScopeGuard<'_> {
    fn commit(self) -> CoreResult<()> {
        match self.manager.adapter.commit(&self.handle) {
            Ok(()) => {
                self.frame.borrow_mut().mark_committed()?;
                debug!(txn = %self.handle.id(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.release(&err.to_string());
                Err(err)
            }
        }
    }

    fn rollback(self) {
        self.release("scope failed");
    }

    fn release(&self, reason: &str) {
        if !self.frame.borrow().is_active() {
            return;
        }
        if let Err(err) = self.manager.adapter.rollback(&self.handle) {
            warn!(txn = %self.handle.id(), error = %err, "rollback failed");
        }
        // Only fails when the frame is no longer active, checked above.
        let _ = self.frame.borrow_mut().mark_rolled_back();
        debug!(txn = %self.handle.id(), reason, "transaction rolled back");
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.release("scope dropped");
        self.manager
            .stack
            .borrow_mut()
            .retain(|frame| !Rc::ptr_eq(frame, &self.frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{PutRequest, QueryBatch, QueryOptions, ReadOptions, ResultType, WriteOptions};
    use crate::key::Key;
    use crate::query::Query;
    use crate::record::Record;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Script {
        begins: Vec<TransactionHandle>,
        commits: usize,
        rollbacks: usize,
        commit_results: VecDeque<CoreResult<()>>,
        always_conflict: bool,
    }

    #[derive(Default)]
    struct ScriptedAdapter {
        script: Mutex<Script>,
    }

    impl ScriptedAdapter {
        fn conflicting() -> Self {
            let adapter = Self::default();
            adapter.script.lock().always_conflict = true;
            adapter
        }

        fn with_commit_results(results: Vec<CoreResult<()>>) -> Self {
            let adapter = Self::default();
            adapter.script.lock().commit_results = results.into();
            adapter
        }
    }

    impl Adapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        fn get(&self, keys: &[Key], _: &ReadOptions<'_>) -> CoreResult<Vec<Option<Record>>> {
            Ok(vec![None; keys.len()])
        }

        fn put(&self, requests: Vec<PutRequest>, _: &WriteOptions<'_>) -> CoreResult<Vec<Key>> {
            Ok(requests.into_iter().map(|r| r.key.with_completed_id(1)).collect())
        }

        fn delete(&self, _: &[Key], _: &WriteOptions<'_>) -> CoreResult<()> {
            Ok(())
        }

        fn run_query(&self, _: &Query, _: &QueryOptions) -> CoreResult<QueryBatch> {
            Ok(QueryBatch::empty(ResultType::Full))
        }

        fn begin_transaction(&self, options: &BeginOptions) -> CoreResult<TransactionHandle> {
            let handle = TransactionHandle::new(vec![], options.scope.clone(), options.parent);
            self.script.lock().begins.push(handle.clone());
            Ok(handle)
        }

        fn commit(&self, _: &TransactionHandle) -> CoreResult<()> {
            let mut script = self.script.lock();
            script.commits += 1;
            if script.always_conflict {
                return Err(CoreError::conflict("contention"));
            }
            script.commit_results.pop_front().unwrap_or(Ok(()))
        }

        fn rollback(&self, _: &TransactionHandle) -> CoreResult<()> {
            self.script.lock().rollbacks += 1;
            Ok(())
        }
    }

    fn manager(adapter: &Arc<ScriptedAdapter>) -> TransactionManager {
        TransactionManager::new(Arc::clone(adapter) as Arc<dyn Adapter>)
    }

    #[test]
    fn conflicts_exhaust_retry_budget() {
        let adapter = Arc::new(ScriptedAdapter::conflicting());
        let tm = manager(&adapter);
        let mut runs = 0;

        let result: CoreResult<()> = tm.run(&TransactionOptions::new().with_retries(3), || {
            runs += 1;
            Ok(())
        });

        assert_eq!(runs, 4);
        match result {
            Err(CoreError::RetriesExceeded { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(source.is_conflict());
            }
            other => panic!("expected RetriesExceeded, got {other:?}"),
        }
        let script = adapter.script.lock();
        assert_eq!(script.begins.len(), 4);
        assert_eq!(script.rollbacks, 4);
        assert!(!tm.in_transaction());
    }

    #[test]
    fn conflict_then_success_retries_once() {
        let adapter = Arc::new(ScriptedAdapter::with_commit_results(vec![
            Err(CoreError::conflict("contention")),
            Ok(()),
        ]));
        let tm = manager(&adapter);
        let mut runs = 0;

        let value = tm
            .run(&TransactionOptions::new(), || -> CoreResult<i32> {
                runs += 1;
                Ok(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(runs, 2);
        let script = adapter.script.lock();
        assert_ne!(script.begins[0].id(), script.begins[1].id());
    }

    #[test]
    fn body_error_rolls_back_without_retry() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let tm = manager(&adapter);
        let mut runs = 0;

        let result: CoreResult<()> = tm.run(&TransactionOptions::new(), || {
            runs += 1;
            Err(CoreError::invalid_argument("bad"))
        });

        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
        assert_eq!(runs, 1);
        let script = adapter.script.lock();
        assert_eq!(script.commits, 0);
        assert_eq!(script.rollbacks, 1);
    }

    #[test]
    fn ambiguous_commit_is_not_retried() {
        let adapter = Arc::new(ScriptedAdapter::with_commit_results(vec![Err(
            CoreError::ambiguous("connection reset during commit"),
        )]));
        let tm = manager(&adapter);
        let mut runs = 0;

        let result: CoreResult<()> = tm.run(&TransactionOptions::new(), || {
            runs += 1;
            Ok(())
        });

        assert!(matches!(
            result,
            Err(CoreError::Unavailable { ambiguous: true, .. })
        ));
        assert_eq!(runs, 1);
    }

    #[test]
    fn nested_scope_joins_outer_transaction() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let tm = manager(&adapter);

        tm.run(&TransactionOptions::new(), || -> CoreResult<()> {
            let outer = tm.current().unwrap();
            assert_eq!(tm.depth(), 1);
            tm.run(&TransactionOptions::new(), || -> CoreResult<()> {
                assert_eq!(tm.current().unwrap().id(), outer.id());
                assert_eq!(tm.depth(), 2);
                Ok(())
            })
        })
        .unwrap();

        let script = adapter.script.lock();
        assert_eq!(script.begins.len(), 1);
        assert_eq!(script.commits, 1);
        assert_eq!(tm.depth(), 0);
    }

    #[test]
    fn nested_failure_dooms_outer() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let tm = manager(&adapter);

        let result: CoreResult<()> = tm.run(&TransactionOptions::new(), || {
            let inner: CoreResult<()> = tm.run(&TransactionOptions::new(), || {
                Err(CoreError::invalid_argument("inner failure"))
            });
            assert!(inner.is_err());
            Ok(())
        });

        assert!(matches!(result, Err(CoreError::TransactionAborted { .. })));
        let script = adapter.script.lock();
        assert_eq!(script.commits, 0);
        assert_eq!(script.rollbacks, 1);
    }

    #[test]
    fn independent_failure_leaves_outer_intact() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let tm = manager(&adapter);

        tm.run(&TransactionOptions::new(), || -> CoreResult<()> {
            let outer = tm.current().unwrap();
            let inner: CoreResult<()> = tm.run(&TransactionOptions::independent(), || {
                let handle = tm.current().unwrap();
                assert_ne!(handle.id(), outer.id());
                assert_eq!(handle.parent(), Some(outer.id()));
                Err(CoreError::invalid_argument("independent failure"))
            });
            assert!(inner.is_err());
            assert_eq!(tm.current().unwrap().id(), outer.id());
            Ok(())
        })
        .unwrap();

        let script = adapter.script.lock();
        assert_eq!(script.begins.len(), 2);
        assert_eq!(script.commits, 1);
        assert_eq!(script.rollbacks, 1);
    }

    #[test]
    fn panic_rolls_back_and_unwinds_stack() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let tm = manager(&adapter);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: CoreResult<()> = tm.run(&TransactionOptions::new(), || panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(!tm.in_transaction());
        assert_eq!(tm.depth(), 0);
        assert_eq!(adapter.script.lock().rollbacks, 1);
    }

    #[test]
    fn timeout_sets_attempt_deadline() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let tm = manager(&adapter);
        let options = TransactionOptions::new().with_timeout(Duration::from_secs(5));

        tm.run(&options, || -> CoreResult<()> {
            assert!(tm.current_deadline().is_some());
            Ok(())
        })
        .unwrap();
        assert!(tm.current_deadline().is_none());
    }
}
