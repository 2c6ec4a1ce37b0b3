//! Query cursors.

use crate::error::{CoreError, CoreResult};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, backend-issued position in a query's result order.
///
/// A cursor is only meaningful when replayed against the query that
/// produced it. Its bytes are never interpreted on the client.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    /// Wraps backend cursor bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the cursor and returns its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Encodes the cursor as URL-safe base64 without padding.
    pub fn to_urlsafe(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Decodes a cursor produced by [`Cursor::to_urlsafe`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the string is not valid base64.
    pub fn from_urlsafe(encoded: &str) -> CoreResult<Self> {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map(Self)
            .map_err(|e| CoreError::invalid_argument(format!("malformed cursor: {e}")))
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.to_urlsafe())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_urlsafe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlsafe_encoding() {
        let cursor = Cursor::new(vec![0xfb, 0xff, 0x00, 0x10]);
        let encoded = cursor.to_urlsafe();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(Cursor::from_urlsafe(&encoded).unwrap(), cursor);
    }

    #[test]
    fn malformed_cursor_is_invalid_argument() {
        assert!(matches!(
            Cursor::from_urlsafe("not base64!"),
            Err(CoreError::InvalidArgument { .. })
        ));
    }
}
