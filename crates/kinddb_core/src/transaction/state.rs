//! Transaction scope state.

use crate::error::{CoreError, CoreResult};
use crate::transaction::handle::TransactionHandle;
use std::time::Instant;

/// State of a transactional scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No backend transaction has been opened yet.
    NotStarted,
    /// A backend transaction is open and accepts operations.
    Active,
    /// The backend transaction has been committed.
    Committed,
    /// The backend transaction has been rolled back.
    RolledBack,
}

/// One transactional scope owning a backend transaction.
///
/// Nested scopes share the owning scope's transaction. A nested scope
/// that fails dooms the owner: the owner then rolls back instead of
/// committing.
#[derive(Debug)]
pub struct Transaction {
    depth: usize,
    state: TransactionState,
    handle: Option<TransactionHandle>,
    deadline: Option<Instant>,
    doomed: Option<String>,
}

impl Transaction {
    /// Creates a scope at the given nesting depth.
    pub(crate) fn new(depth: usize, deadline: Option<Instant>) -> Self {
        Self {
            depth,
            state: TransactionState::NotStarted,
            handle: None,
            deadline,
            doomed: None,
        }
    }

    /// Returns the nesting depth at which this scope was opened.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the scope is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the backend handle once started.
    pub fn handle(&self) -> Option<&TransactionHandle> {
        self.handle.as_ref()
    }

    /// Returns the deadline of this attempt.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the abort reason if a nested scope doomed this transaction.
    pub fn doomed(&self) -> Option<&str> {
        self.doomed.as_deref()
    }

    /// Attaches the backend handle and activates the scope.
    pub(crate) fn start(&mut self, handle: TransactionHandle) -> CoreResult<()> {
        if self.state != TransactionState::NotStarted {
            return Err(CoreError::invalid_operation("transaction already started"));
        }
        self.handle = Some(handle);
        self.state = TransactionState::Active;
        Ok(())
    }

    /// Forces the transaction to roll back when its owner finishes.
    pub(crate) fn doom(&mut self, reason: impl Into<String>) {
        if self.doomed.is_none() {
            self.doomed = Some(reason.into());
        }
    }

    /// Marks the transaction as committed.
    pub(crate) fn mark_committed(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Marks the transaction as rolled back.
    pub(crate) fn mark_rolled_back(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Ensures the scope is active.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::NotStarted => {
                Err(CoreError::invalid_operation("transaction not started"))
            }
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::RolledBack => Err(CoreError::invalid_operation(
                "transaction already rolled back",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::handle::IsolationScope;

    fn started() -> Transaction {
        let mut txn = Transaction::new(1, None);
        txn.start(TransactionHandle::new(vec![7], IsolationScope::Global, None))
            .unwrap();
        txn
    }

    #[test]
    fn new_scope_is_not_started() {
        let txn = Transaction::new(1, None);
        assert_eq!(txn.state(), TransactionState::NotStarted);
        assert!(txn.handle().is_none());
        assert!(txn.ensure_active().is_err());
    }

    #[test]
    fn start_activates() {
        let txn = started();
        assert!(txn.is_active());
        assert_eq!(txn.handle().unwrap().token(), &[7]);
    }

    #[test]
    fn cannot_start_twice() {
        let mut txn = started();
        let again = TransactionHandle::new(vec![8], IsolationScope::Global, None);
        assert!(txn.start(again).is_err());
    }

    #[test]
    fn cannot_finish_twice() {
        let mut txn = started();
        txn.mark_committed().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.mark_rolled_back().is_err());
        assert!(txn.mark_committed().is_err());
    }

    #[test]
    fn first_doom_reason_wins() {
        let mut txn = started();
        txn.doom("inner failed");
        txn.doom("second failure");
        assert_eq!(txn.doomed(), Some("inner failed"));
        assert!(txn.is_active());
    }
}
