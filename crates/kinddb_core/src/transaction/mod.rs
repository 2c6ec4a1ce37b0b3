//! Transactional scopes over backend transactions.
//!
//! A scope moves through `NotStarted → Active → Committed | RolledBack`.
//! Scopes nest per [`Propagation`] and retry on commit conflicts; see
//! [`TransactionManager`].

mod handle;
mod manager;
mod state;

pub use handle::{IsolationScope, TransactionHandle};
pub use manager::{Propagation, TransactionManager, TransactionOptions, DEFAULT_RETRIES};
pub use state::{Transaction, TransactionState};
