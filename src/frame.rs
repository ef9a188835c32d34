//! Opaque frame payloads.
//!
//! A [`Frame`] is one unit of received byte data, exactly as delivered by the
//! underlying transport. The crate never interprets, validates, or reassembles
//! frame contents; a frame has no identity beyond its arrival order.
//!
//! Frames wrap [`bytes::Bytes`], so cloning is cheap (reference count bump)
//! and receive buffers are never copied more than once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;

// ============================================================================
// Frame
// ============================================================================

/// One opaque unit of byte data delivered by a transport.
///
/// Order-significant, immutable, and cheap to clone. Diagnostic payloads are
/// conventionally rendered as hex, so `Debug` prints the hex encoding rather
/// than a byte list.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame(Bytes);

impl Frame {
    /// Creates a frame from anything convertible to [`Bytes`].
    #[inline]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// Creates a frame by copying a byte slice.
    #[inline]
    pub fn copy_from(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the payload as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the frame, returning the underlying buffer.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Returns the payload hex-encoded (lowercase, no separators).
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl Deref for Frame {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Frame {
    #[inline]
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<Vec<u8>> for Frame {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Frame {
    #[inline]
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({} bytes: [{}])", self.len(), self.to_hex())
    }
}

// ============================================================================
// Tests
// ============================================================================
