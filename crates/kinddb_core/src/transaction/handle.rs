//! Backend transaction handles.

use crate::key::Key;
use crate::types::TransactionId;
use std::time::Instant;

/// The set of records a transaction may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IsolationScope {
    /// No restriction; the backend decides.
    #[default]
    Global,
    /// Only records under these ancestor keys.
    Ancestors(Vec<Key>),
}

impl IsolationScope {
    /// Returns true if `key` falls inside this scope.
    pub fn contains(&self, key: &Key) -> bool {
        match self {
            Self::Global => true,
            Self::Ancestors(roots) => roots.iter().any(|root| key.has_ancestor(root)),
        }
    }
}

/// A handle to a backend-native transaction.
///
/// Handles are created by [`Adapter::begin_transaction`] and are finished
/// by exactly one `commit` or `rollback`. They are never reused: a retried
/// unit of work begins a fresh handle.
///
/// [`Adapter::begin_transaction`]: crate::Adapter::begin_transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    id: TransactionId,
    token: Vec<u8>,
    scope: IsolationScope,
    parent: Option<TransactionId>,
    deadline: Option<Instant>,
}

impl TransactionHandle {
    /// Creates a handle around a backend token.
    pub fn new(token: Vec<u8>, scope: IsolationScope, parent: Option<TransactionId>) -> Self {
        Self {
            id: TransactionId::next(),
            token,
            scope,
            parent,
            deadline: None,
        }
    }

    /// Bounds `commit` and `rollback` of this transaction.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns the process-local handle id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the opaque backend token.
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Returns the isolation scope.
    pub fn scope(&self) -> &IsolationScope {
        &self.scope
    }

    /// Returns the transaction that was suspended when this one began.
    #[must_use]
    pub fn parent(&self) -> Option<TransactionId> {
        self.parent
    }

    /// Returns the deadline of this attempt, taken from its begin options.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_never_reused() {
        let a = TransactionHandle::new(vec![1], IsolationScope::Global, None);
        let b = TransactionHandle::new(vec![1], IsolationScope::Global, None);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn ancestor_scope() {
        let org = Key::new("Org", 1);
        let scope = IsolationScope::Ancestors(vec![org.clone()]);
        assert!(scope.contains(&org.child("Person", 1).unwrap()));
        assert!(scope.contains(&org));
        assert!(!scope.contains(&Key::new("Org", 2)));
        assert!(IsolationScope::Global.contains(&Key::new("Org", 2)));
    }
}
