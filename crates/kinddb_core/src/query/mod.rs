//! Query descriptors, lazy result sets and pagination.
//!
//! Filters are conjunctive. Only one property may carry inequality
//! filters, and if the query declares sort orders that property must come
//! first. Violations are reported as `InvalidArgument` before any request
//! is sent.

mod cursor;
mod descriptor;
mod pages;
mod resultset;

pub use cursor::Cursor;
pub use descriptor::{Direction, Filter, Operator, Order, Query, DEFAULT_BATCH_SIZE};
pub use pages::{Page, Pages};
pub use resultset::{Entry, Resultset};
