//! Cache slot payloads and names.

use crate::error::{CacheError, CacheResult};
use kinddb_core::{Key, Record};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use uuid::Uuid;

/// What a cache slot holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// A record as stored in the backend.
    Item(Record),
    /// A reader is filling the slot after a miss.
    Lease(Uuid),
    /// A writer is changing the record. Readers go to the backend.
    Locked(Uuid),
}

impl Slot {
    /// Encodes the slot as CBOR.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the record cannot be encoded.
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CacheError::Codec(format!("failed to encode slot: {e}")))?;
        Ok(bytes)
    }

    /// Decodes a slot.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the bytes are not a slot.
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| CacheError::Codec(format!("failed to decode slot: {e}")))
    }
}

/// Returns the deterministic slot name of a key: `{prefix}:{sha256 hex}`.
///
/// # Errors
///
/// Returns `Codec` if the key cannot be encoded.
pub fn slot_name(prefix: &str, key: &Key) -> CacheResult<String> {
    let mut bytes = Vec::new();
    ciborium::into_writer(key, &mut bytes)
        .map_err(|e| CacheError::Codec(format!("failed to encode key {key}: {e}")))?;
    let digest = Sha256::digest(&bytes);
    let mut name = String::with_capacity(prefix.len() + 1 + digest.len() * 2);
    name.push_str(prefix);
    name.push(':');
    for byte in digest {
        let _ = write!(name, "{byte:02x}");
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic_and_distinct() {
        let a = slot_name("kinddb", &Key::new("Person", 1)).unwrap();
        assert_eq!(a, slot_name("kinddb", &Key::new("Person", 1)).unwrap());
        assert_ne!(a, slot_name("kinddb", &Key::new("Person", 2)).unwrap());
        assert_ne!(a, slot_name("other", &Key::new("Person", 1)).unwrap());
        assert!(a.starts_with("kinddb:"));
        assert_eq!(a.len(), "kinddb:".len() + 64);
    }

    #[test]
    fn namespaces_get_separate_slots() {
        let plain = Key::new("Person", 1);
        let scoped = plain.with_namespace(Some("tenant".into()));
        assert_ne!(
            slot_name("kinddb", &plain).unwrap(),
            slot_name("kinddb", &scoped).unwrap()
        );
    }

    #[test]
    fn lock_markers_are_distinguishable_from_items() {
        let token = Uuid::new_v4();
        let locked = Slot::decode(&Slot::Locked(token).encode().unwrap()).unwrap();
        assert_eq!(locked, Slot::Locked(token));
        assert_ne!(locked, Slot::Lease(token));
    }
}
