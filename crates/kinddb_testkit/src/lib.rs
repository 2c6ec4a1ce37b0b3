//! # kinddb testkit
//!
//! Test utilities for kinddb.
//!
//! This crate provides:
//! - Sample entities and a [`Harness`] wiring the emulator behind the
//!   remote and caching adapters
//! - Property-based test generators using proptest
//! - A once-per-process tracing subscriber for tests
//!
//! The integration tests under `tests/` exercise the adapters, the
//! transaction manager and the query engine together.
//!
//! ## Usage
//!
//! ```rust
//! use kinddb_testkit::prelude::*;
//!
//! let harness = Harness::cached();
//! let session = harness.session();
//! let key = session.put(&mut Person::new("ada", 36)).unwrap();
//! let ada: Person = session.load(&key).unwrap();
//! assert_eq!(ada.age, 36);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::init_tracing;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::init_tracing;
