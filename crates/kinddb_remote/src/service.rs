//! The backend RPC boundary.

use crate::error::ServiceResult;
use crate::messages::{
    AllocateIdsRequest, AllocateIdsResponse, BeginTransactionRequest, BeginTransactionResponse,
    CommitRequest, CommitResponse, LookupRequest, LookupResponse, RollbackRequest,
    RunQueryRequest, RunQueryResponse,
};
use std::sync::Arc;
use std::time::Instant;

/// A hierarchical key-value store reached through batched RPCs.
///
/// This trait abstracts the wire, allowing for different implementations
/// (HTTP, an in-process emulator, scripted mocks for testing).
pub trait StoreService: Send + Sync {
    /// Looks up a batch of keys.
    fn lookup(&self, request: &LookupRequest, deadline: Option<Instant>)
        -> ServiceResult<LookupResponse>;

    /// Completes partial keys with backend-assigned ids.
    fn allocate_ids(
        &self,
        request: &AllocateIdsRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<AllocateIdsResponse>;

    /// Applies a batch of mutations atomically.
    fn commit(&self, request: &CommitRequest, deadline: Option<Instant>)
        -> ServiceResult<CommitResponse>;

    /// Runs one batch of a query.
    fn run_query(
        &self,
        request: &RunQueryRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<RunQueryResponse>;

    /// Starts a transaction.
    fn begin_transaction(
        &self,
        request: &BeginTransactionRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<BeginTransactionResponse>;

    /// Abandons a transaction.
    fn rollback(&self, request: &RollbackRequest, deadline: Option<Instant>) -> ServiceResult<()>;
}

impl<S: StoreService + ?Sized> StoreService for Arc<S> {
    fn lookup(
        &self,
        request: &LookupRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<LookupResponse> {
        (**self).lookup(request, deadline)
    }

    fn allocate_ids(
        &self,
        request: &AllocateIdsRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<AllocateIdsResponse> {
        (**self).allocate_ids(request, deadline)
    }

    fn commit(
        &self,
        request: &CommitRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<CommitResponse> {
        (**self).commit(request, deadline)
    }

    fn run_query(
        &self,
        request: &RunQueryRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<RunQueryResponse> {
        (**self).run_query(request, deadline)
    }

    fn begin_transaction(
        &self,
        request: &BeginTransactionRequest,
        deadline: Option<Instant>,
    ) -> ServiceResult<BeginTransactionResponse> {
        (**self).begin_transaction(request, deadline)
    }

    fn rollback(&self, request: &RollbackRequest, deadline: Option<Instant>) -> ServiceResult<()> {
        (**self).rollback(request, deadline)
    }
}
