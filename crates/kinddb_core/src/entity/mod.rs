//! Entity mapper boundary.
//!
//! The core never looks inside typed objects. An [`Entity`] converts
//! itself to and from a [`Record`]; everything below the mapper works on
//! records only.

mod registry;

pub use registry::{KindRegistry, CLASS_PROPERTY};

use crate::error::CoreResult;
use crate::key::Key;
use crate::record::Record;

/// A typed record stored under one kind.
///
/// Lifecycle hooks default to no-ops and are invoked by the typed
/// operations on [`Session`](crate::Session). Query results are mapped
/// without calling hooks.
///
/// # Example
///
/// ```rust
/// use kinddb_core::{CoreError, CoreResult, Entity, Key, Record};
///
/// struct Note {
///     key: Option<Key>,
///     text: String,
/// }
///
/// impl Entity for Note {
///     fn kind() -> &'static str {
///         "Note"
///     }
///
///     fn key(&self) -> Option<&Key> {
///         self.key.as_ref()
///     }
///
///     fn set_key(&mut self, key: Key) {
///         self.key = Some(key);
///     }
///
///     fn to_record(&self) -> CoreResult<Record> {
///         Ok(Record::new().with_unindexed("text", self.text.as_str()))
///     }
///
///     fn from_record(key: Key, record: Record) -> CoreResult<Self> {
///         let text = record
///             .get("text")
///             .and_then(|v| v.as_text())
///             .ok_or_else(|| CoreError::codec("missing text"))?;
///         Ok(Note { key: Some(key), text: text.to_string() })
///     }
/// }
/// ```
pub trait Entity: Sized {
    /// Returns the storage kind.
    fn kind() -> &'static str;

    /// Returns the key, if the entity has one.
    fn key(&self) -> Option<&Key>;

    /// Replaces the key, typically with the one assigned by a put.
    fn set_key(&mut self, key: Key);

    /// Converts the entity to a record.
    ///
    /// # Errors
    ///
    /// Returns an error if a property cannot be represented.
    fn to_record(&self) -> CoreResult<Record>;

    /// Rebuilds an entity from a stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not describe this type.
    fn from_record(key: Key, record: Record) -> CoreResult<Self>;

    /// Returns the key to store under, partial if none is set yet.
    fn storage_key(&self) -> Key {
        self.key().cloned().unwrap_or_else(|| Key::partial(Self::kind()))
    }

    /// Called before the entity is written.
    ///
    /// # Errors
    ///
    /// An error cancels the put.
    fn pre_put(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Called after the entity was written and its key completed.
    fn post_put(&mut self) {}

    /// Called before the entity's key is deleted.
    ///
    /// # Errors
    ///
    /// An error cancels the delete.
    fn pre_delete(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// Called after the entity's key was deleted.
    fn post_delete(&mut self) {}

    /// Called with each requested key before a lookup by key.
    ///
    /// # Errors
    ///
    /// An error cancels the whole lookup.
    fn pre_get(_key: &Key) -> CoreResult<()> {
        Ok(())
    }

    /// Called after the entity was loaded by key.
    fn post_get(&mut self) {}
}
