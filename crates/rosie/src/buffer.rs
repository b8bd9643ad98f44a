//! Ownership of byte buffers that cross the engine boundary.
//!
//! Bytes leave an engine in one of two forms:
//! - borrowed: a slice into storage the engine keeps, valid until the next call
//!   on that engine. In Rust this is enforced by the lock guard a
//!   [`crate::Match`] holds; C callers get the same window by contract.
//! - owned: an [`OwnedBuffer`] allocated independently for each call. The caller
//!   owns it once the call returns.

use std::fmt;
use std::ops::Deref;

/// Caller-owned bytes (diagnostics, trace text, configuration, stashed
/// scripted results).
#[derive(PartialEq, Eq)]
pub struct OwnedBuffer {
    bytes: Box<[u8]>,
}

impl OwnedBuffer {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        #[cfg(test)]
        live::adjust(1);
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The contents as text, when they are valid UTF-8.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes).into_vec()
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        #[cfg(test)]
        live::adjust(-1);
    }
}

impl Deref for OwnedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for OwnedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for OwnedBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        OwnedBuffer::new(bytes)
    }
}

impl From<&[u8]> for OwnedBuffer {
    fn from(bytes: &[u8]) -> Self {
        OwnedBuffer::new(bytes)
    }
}

impl From<String> for OwnedBuffer {
    fn from(text: String) -> Self {
        OwnedBuffer::new(text.into_bytes())
    }
}

impl fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedBuffer({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
