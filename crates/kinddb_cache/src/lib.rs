//! # kinddb cache
//!
//! A caching [`Adapter`](kinddb_core::Adapter) that never serves a value
//! older than the last acknowledged write.
//!
//! The cache is reached through the [`CacheClient`] trait, which needs only
//! batched reads, compare-and-swap, and conditional deletes. Writers lock
//! every slot they touch before writing the backend; readers fill misses
//! through a lease that any writer invalidates.
//!
//! ```rust
//! use kinddb_cache::{CachingAdapter, InMemoryCache};
//! use kinddb_core::{Adapter, CacheConfig, Key, PutRequest, ReadOptions, Record, WriteOptions};
//! use kinddb_remote::{InMemoryService, RemoteAdapter};
//!
//! let adapter = CachingAdapter::new(
//!     RemoteAdapter::new(InMemoryService::new(), "demo"),
//!     InMemoryCache::new(),
//!     CacheConfig::default(),
//! );
//! let key = Key::new("Greeting", 1);
//! let record = Record::new().with_indexed("text", "hello");
//! adapter
//!     .put(vec![PutRequest::new(key.clone(), record.clone())], &WriteOptions::default())
//!     .unwrap();
//! let found = adapter.get(&[key], &ReadOptions::default()).unwrap();
//! assert_eq!(found, vec![Some(record)]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod client;
mod error;
mod memory;
mod slot;

pub use adapter::CachingAdapter;
pub use client::{CacheClient, Generation, Versioned};
pub use error::{CacheError, CacheResult};
pub use memory::InMemoryCache;
pub use slot::{slot_name, Slot};
