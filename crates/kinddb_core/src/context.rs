//! Process-wide adapter registration.
//!
//! Most code should pass an adapter explicitly, usually through a
//! [`Session`](crate::Session). This module provides the ambient default
//! for code that does not: a single current adapter, set explicitly or
//! built lazily by a registered factory.
//!
//! Client connections do not survive `fork`. The slot remembers the
//! process id it was filled in and is rebuilt from the factory when a
//! forked child first asks for it.

use crate::adapter::Adapter;
use crate::error::{CoreError, CoreResult};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

type Factory = dyn Fn() -> CoreResult<Arc<dyn Adapter>> + Send + Sync;

struct Slot {
    adapter: Option<Arc<dyn Adapter>>,
    pid: u32,
}

static SLOT: Mutex<Slot> = Mutex::new(Slot {
    adapter: None,
    pid: 0,
});

static FACTORY: RwLock<Option<Box<Factory>>> = RwLock::new(None);

/// Registers the factory that builds the default adapter.
///
/// The factory runs lazily, on the first [`adapter`] call with an empty
/// slot, while the slot is locked. It must not call back into this module.
pub fn set_default_factory<F>(factory: F)
where
    F: Fn() -> CoreResult<Arc<dyn Adapter>> + Send + Sync + 'static,
{
    *FACTORY.write() = Some(Box::new(factory));
}

/// Returns true if a default factory is registered.
pub fn has_default_factory() -> bool {
    FACTORY.read().is_some()
}

/// Returns the current adapter, building it from the factory if needed.
///
/// # Errors
///
/// Returns `InvalidOperation` if no adapter is set and no factory is
/// registered, or the factory's error.
pub fn adapter() -> CoreResult<Arc<dyn Adapter>> {
    adapter_for(std::process::id())
}

fn adapter_for(pid: u32) -> CoreResult<Arc<dyn Adapter>> {
    let mut slot = SLOT.lock();
    if slot.pid != pid {
        if slot.adapter.take().is_some() {
            debug!(pid, "discarding adapter inherited across fork");
        }
        slot.pid = pid;
    }
    if let Some(adapter) = &slot.adapter {
        return Ok(Arc::clone(adapter));
    }

    let factory = FACTORY.read();
    let factory = factory.as_ref().ok_or_else(|| {
        CoreError::invalid_operation("no adapter set and no default factory registered")
    })?;
    let adapter = factory()?;
    debug!(adapter = adapter.name(), "built default adapter");
    slot.adapter = Some(Arc::clone(&adapter));
    Ok(adapter)
}

/// Replaces the current adapter and returns the previous one.
pub fn set_adapter(adapter: Arc<dyn Adapter>) -> Option<Arc<dyn Adapter>> {
    let mut slot = SLOT.lock();
    let pid = std::process::id();
    let previous = if slot.pid == pid {
        slot.adapter.take()
    } else {
        None
    };
    slot.pid = pid;
    slot.adapter = Some(adapter);
    previous
}

/// Empties the slot so the next [`adapter`] call uses the factory.
pub fn clear_adapter() -> Option<Arc<dyn Adapter>> {
    SLOT.lock().adapter.take()
}

/// Replaces the current adapter until the returned guard is dropped.
#[must_use = "the previous adapter is restored as soon as the guard is dropped"]
pub fn scoped_adapter(adapter: Arc<dyn Adapter>) -> AdapterGuard {
    AdapterGuard {
        previous: set_adapter(adapter),
    }
}

/// Restores the previous adapter on drop.
pub struct AdapterGuard {
    previous: Option<Arc<dyn Adapter>>,
}

impl Drop for AdapterGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                set_adapter(previous);
            }
            None => {
                clear_adapter();
            }
        }
    }
}

impl std::fmt::Debug for AdapterGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterGuard")
            .field("previous", &self.previous.as_ref().map(|a| a.name().to_string()))
            .finish()
    }
}
