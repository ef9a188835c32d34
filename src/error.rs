//! Error types for the diagnostic link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use diaglink::{Result, StreamConnection};
//! use tokio::net::TcpStream;
//!
//! async fn request(conn: &StreamConnection<TcpStream>) -> Result<()> {
//!     conn.send(&[0x10, 0x03]).await?;
//!     let response = conn.expect_frame(Duration::from_secs(2)).await?;
//!     println!("{response:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Lifecycle | [`Error::NotOpen`], [`Error::AlreadyOpen`], [`Error::Faulted`] |
//! | Timeout | [`Error::FrameTimeout`] |
//! | Transport | [`Error::Transport`], [`Error::TransportClosed`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation requires an open connection.
    ///
    /// Returned when send or wait is attempted before `open` or after
    /// `close`.
    #[error("Connection not open: {operation}")]
    NotOpen {
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// Connection is already open.
    ///
    /// Returned when `open` is called twice without an intervening `close`.
    /// The existing session is left untouched.
    #[error("Connection already open")]
    AlreadyOpen,

    /// Receive loop terminated abnormally.
    ///
    /// Returned when the background receiver died on a transport failure.
    /// The connection must be closed and reopened.
    #[error("Connection faulted: receive loop terminated")]
    Faulted,

    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// No frame arrived within the wait deadline.
    ///
    /// Returned by `expect_frame` when the queue stayed empty for the full
    /// timeout.
    #[error("Timed out after {timeout_ms}ms waiting for frame")]
    FrameTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport-level failure.
    ///
    /// Returned when the underlying socket or link reports an error during
    /// bind, send, or receive.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Transport closed by the peer.
    ///
    /// Returned when the remote endpoint shut down the link mid-session.
    #[error("Transport closed by peer")]
    TransportClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a not-open error for the named operation.
    #[inline]
    pub fn not_open(operation: &'static str) -> Self {
        Self::NotOpen { operation }
    }

    /// Creates a frame timeout error.
    #[inline]
    pub fn frame_timeout(timeout_ms: u64) -> Self {
        Self::FrameTimeout { timeout_ms }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::FrameTimeout { .. })
    }

    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::TransportClosed | Self::Io(_)
        )
    }

    /// Returns `true` if the connection is unusable after this error.
    ///
    /// Fatal errors require a `close` and a fresh `open`; non-fatal ones
    /// (timeouts, lifecycle misuse) leave the session as it was.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Faulted | Self::Transport { .. } | Self::TransportClosed | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
