//! Validated store keys

use std::borrow::Borrow;
use std::fmt;

use bytes::Bytes;

use crate::error::{Result, StoreError};

/// A non-empty, byte-exact key
///
/// Keys are validated once on entry to the store; everything below the
/// facade takes `Key` and trusts it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(StoreError::InvalidKey("key must not be empty".to_string()));
        }
        Ok(Key(bytes))
    }

    /// Validate a borrowed key, copying it
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(Bytes::copy_from_slice(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&str> for Key {
    type Error = StoreError;

    fn try_from(s: &str) -> Result<Self> {
        Key::from_slice(s.as_bytes())
    }
}

impl TryFrom<Vec<u8>> for Key {
    type Error = StoreError;

    fn try_from(v: Vec<u8>) -> Result<Self> {
        Key::new(v)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(&self.0))
    }
}
