//! Request and response messages of the store service.
//!
//! Each message maps to one backend RPC. Bodies travel as CBOR when a
//! service is reached over HTTP.

use kinddb_core::{Cursor, Key, Query, Record, ResultType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Batched point lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Backend project id.
    pub project: String,
    /// Keys to look up. Must be complete and distinct.
    pub keys: Vec<Key>,
    /// Read inside this transaction.
    pub transaction: Option<Vec<u8>>,
}

/// Reply to a [`LookupRequest`].
///
/// Every requested key appears in exactly one of the three lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Keys that exist, with their records.
    pub found: Vec<(Key, Record)>,
    /// Keys that do not exist.
    pub missing: Vec<Key>,
    /// Keys the backend did not get to. Ask again.
    pub deferred: Vec<Key>,
}

/// Completes partial keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocateIdsRequest {
    /// Backend project id.
    pub project: String,
    /// Partial keys to complete.
    pub keys: Vec<Key>,
}

/// Reply to an [`AllocateIdsRequest`], aligned with the request keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateIdsResponse {
    /// Completed keys.
    pub keys: Vec<Key>,
}

/// One change applied by a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert or replace a record.
    Upsert {
        /// Complete key.
        key: Key,
        /// New record.
        record: Record,
        /// Properties to index.
        indexed: Vec<String>,
    },
    /// Remove a record if it exists.
    Delete {
        /// Complete key.
        key: Key,
    },
}

impl Mutation {
    /// Returns the key the mutation touches.
    pub fn key(&self) -> &Key {
        match self {
            Self::Upsert { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Applies mutations atomically, ending `transaction` if one is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Backend project id.
    pub project: String,
    /// Transaction to commit, `None` for a single-shot commit.
    pub transaction: Option<Vec<u8>>,
    /// Changes in program order.
    pub mutations: Vec<Mutation>,
}

/// Reply to a [`CommitRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Number of index entries touched.
    pub index_updates: u64,
}

/// Runs one batch of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueryRequest {
    /// Backend project id.
    pub project: String,
    /// The query.
    pub query: Query,
    /// Resume after this cursor.
    pub start_cursor: Option<Cursor>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Results to skip first.
    pub offset: usize,
}

/// Why a query batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoreResults {
    /// The backend stopped early; more results may follow.
    NotFinished,
    /// The batch hit its limit; more results may follow.
    MoreAfterLimit,
    /// The query is exhausted.
    NoMoreResults,
}

/// Reply to a [`RunQueryRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueryResponse {
    /// Result keys in query order.
    pub keys: Vec<Key>,
    /// Records aligned with `keys`, empty for keys-only queries.
    pub records: Vec<Record>,
    /// Position after the last result.
    pub end_cursor: Option<Cursor>,
    /// Why the batch ended.
    pub more_results: MoreResults,
    /// What the batch holds.
    pub result_type: ResultType,
}

/// Starts a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginTransactionRequest {
    /// Backend project id.
    pub project: String,
    /// Restrict the transaction to these entity groups.
    pub ancestors: Option<Vec<Key>>,
}

/// Reply to a [`BeginTransactionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginTransactionResponse {
    /// Opaque transaction token.
    pub transaction: Vec<u8>,
}

/// Abandons a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRequest {
    /// Backend project id.
    pub project: String,
    /// Token returned by begin.
    pub transaction: Vec<u8>,
}

/// Encodes a message as CBOR.
///
/// # Errors
///
/// Returns `Protocol` if the value cannot be encoded.
pub fn encode<T: Serialize>(value: &T) -> ServiceResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| ServiceError::Protocol(format!("failed to encode message: {e}")))?;
    Ok(buf)
}

/// Decodes a CBOR message.
///
/// # Errors
///
/// Returns `Protocol` if the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ServiceResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| ServiceError::Protocol(format!("failed to decode message: {e}")))
}
