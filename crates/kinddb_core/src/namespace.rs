//! Namespace scoping.
//!
//! Keys and queries capture the namespace that is current when they are
//! built and keep it afterwards. The current namespace resolves, in order,
//! to the innermost thread-local override and then to the process-wide
//! default. `None` is the store's default (unnamed) namespace.
//!
//! ```rust
//! use kinddb_core::namespace;
//!
//! {
//!     let _outer = namespace::scoped("tenant-a");
//!     {
//!         let _inner = namespace::scoped("tenant-b");
//!         assert_eq!(namespace::current().as_deref(), Some("tenant-b"));
//!     }
//!     assert_eq!(namespace::current().as_deref(), Some("tenant-a"));
//! }
//! ```

use parking_lot::RwLock;
use std::cell::RefCell;

static DEFAULT_NAMESPACE: RwLock<Option<String>> = RwLock::new(None);

thread_local! {
    static LOCAL_NAMESPACE: RefCell<Option<Option<String>>> = const { RefCell::new(None) };
}

fn normalize(namespace: Option<String>) -> Option<String> {
    namespace.filter(|ns| !ns.is_empty())
}

/// Sets the process-wide default namespace and returns it.
pub fn set_default_namespace(namespace: Option<String>) -> Option<String> {
    let namespace = normalize(namespace);
    *DEFAULT_NAMESPACE.write() = namespace.clone();
    namespace
}

/// Returns the process-wide default namespace.
pub fn default_namespace() -> Option<String> {
    DEFAULT_NAMESPACE.read().clone()
}

/// Returns the namespace for the current thread.
pub fn current() -> Option<String> {
    LOCAL_NAMESPACE
        .with(|local| local.borrow().clone())
        .unwrap_or_else(default_namespace)
}

/// Sets the thread-local namespace override.
///
/// Passing `None` removes the override so that [`current`] falls back to
/// the process-wide default.
pub fn set_namespace(namespace: Option<String>) {
    LOCAL_NAMESPACE.with(|local| {
        *local.borrow_mut() = namespace.map(|ns| normalize(Some(ns)));
    });
}

/// Overrides the thread-local namespace until the returned guard is dropped.
#[must_use = "the namespace is restored as soon as the guard is dropped"]
pub fn scoped(namespace: impl Into<String>) -> NamespaceGuard {
    let previous = LOCAL_NAMESPACE.with(|local| local.borrow().clone());
    set_namespace(Some(namespace.into()));
    NamespaceGuard { previous }
}

/// Restores the previous thread-local namespace on drop.
#[derive(Debug)]
pub struct NamespaceGuard {
    previous: Option<Option<String>>,
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        LOCAL_NAMESPACE.with(|local| *local.borrow_mut() = previous);
    }
}
