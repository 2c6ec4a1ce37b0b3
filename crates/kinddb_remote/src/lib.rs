//! # kinddb remote
//!
//! Storage adapter for hierarchical key-value store services.
//!
//! This crate provides:
//! - The [`StoreService`] RPC boundary and its request/response messages
//! - [`RemoteAdapter`], the [`Adapter`](kinddb_core::Adapter) over any service
//! - [`HttpService`], a CBOR-over-HTTP client over an abstract [`HttpClient`]
//! - [`InMemoryService`], an in-process emulator with fault injection
//! - Default adapter registration for [`kinddb_core::context`]
//!
//! ## Write semantics
//!
//! - Partial keys are completed by the service before a put is applied
//! - Transactional writes are buffered client-side and sent with the commit
//! - A write whose reply is lost is reported as ambiguous and never retried

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod error;
mod factory;
mod http;
mod memory;
pub mod messages;
mod service;

pub use adapter::RemoteAdapter;
pub use config::RemoteConfig;
pub use error::{CallKind, ServiceError, ServiceResult};
pub use factory::{
    build_adapter, register_default_service, register_default_service_with_client,
    shared_emulator,
};
pub use http::{HttpClient, HttpService, LoopbackClient, LoopbackServer, ServiceDispatcher};
pub use memory::{CallCounts, InMemoryService};
pub use service::StoreService;
