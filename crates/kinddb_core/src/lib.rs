//! # kinddb core
//!
//! Client-side data access over hierarchical key-value stores.
//!
//! This crate provides:
//! - Keys, values and records
//! - The [`Adapter`] contract every storage backend implements
//! - Transactional scopes with nested propagation and commit retry
//! - Immutable queries with lazy result sets and cursor pagination
//! - The [`Entity`] mapper boundary and polymorphic kind resolution
//! - Namespace scoping and process-wide adapter registration
//!
//! ```rust
//! use kinddb_core::{Key, Operator, Query};
//!
//! let org = Key::new("Organization", 1);
//! let query = Query::new("Person")
//!     .with_ancestor(org)
//!     .filter("age", Operator::Ge, 21i64);
//! assert!(query.validate().is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
mod config;
pub mod context;
mod entity;
mod error;
mod key;
pub mod namespace;
pub mod query;
mod record;
mod session;
pub mod transaction;
mod types;
mod value;

#[cfg(test)]
mod testing;

pub use adapter::{
    Adapter, BeginOptions, PutRequest, QueryBatch, QueryOptions, ReadOptions, ResultType,
    WriteOptions,
};
pub use config::{CacheConfig, Config};
pub use entity::{Entity, KindRegistry, CLASS_PROPERTY};
pub use error::{CoreError, CoreResult};
pub use key::{Key, KeyId, PathElement, MAX_NAME_LENGTH};
pub use query::{
    Cursor, Direction, Entry, Filter, Operator, Order, Page, Pages, Query, Resultset,
};
pub use record::{Property, Record};
pub use session::Session;
pub use transaction::{
    IsolationScope, Propagation, TransactionHandle, TransactionManager, TransactionOptions,
    TransactionState,
};
pub use types::TransactionId;
pub use value::{Value, MAX_INDEXED_LENGTH};
