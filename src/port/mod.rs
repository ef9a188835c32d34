//! Transport port abstraction and concrete bindings.
//!
//! A [`TransportPort`] is the seam between a connection and the wire. It
//! hides what the endpoint actually is (TCP socket, in-process stream,
//! ISO-TP link) behind four operations: bind, send, receive, close. The
//! receive loop polls [`TransportPort::receive`] with a short timeout so
//! shutdown requests are noticed between polls.
//!
//! Two bindings ship with the crate:
//!
//! - [`StreamPort`]: byte-stream endpoints ([`tokio::net::TcpStream`],
//!   [`tokio::io::DuplexStream`], anything `AsyncRead + AsyncWrite`). One
//!   read's worth of bytes is one frame.
//! - [`IsoTpPort`]: datagram-style ISO-TP links where the socket layer
//!   already delivers whole frames. Backed by any [`IsoTpSocket`], including
//!   the in-memory [`MemoryLink`] pair used in tests and examples.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::frame::Frame;

// ============================================================================
// Submodules
// ============================================================================

mod isotp;
mod memory;
mod stream;

pub use isotp::{IsoTpAddress, IsoTpPort, IsoTpSocket};
pub use memory::MemoryLink;
pub use stream::{StreamPort, DEFAULT_BUFSIZE};

// ============================================================================
// TransportPort Trait
// ============================================================================

/// One endpoint of a diagnostic link, seen as a source and sink of frames.
///
/// Implementations are driven from two places at once: the owning
/// connection sends on the caller's task while the background receive loop
/// polls for inbound frames. Every method therefore takes `&self`.
///
/// `receive` must be cancel-safe in the sense that expiry of the poll
/// timeout never discards a frame that was already delivered.
#[async_trait]
pub trait TransportPort: Send + Sync + 'static {
    /// Returns a short endpoint description for log messages.
    fn describe(&self) -> String;

    /// Establishes the underlying endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be (re)established, for
    /// example when a one-shot stream was already consumed by a previous
    /// session.
    async fn bind(&self) -> Result<()>;

    /// Writes one payload to the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails or the peer has
    /// closed the link.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits up to `poll` for one inbound frame.
    ///
    /// Returns `Ok(None)` when nothing arrived within the poll window; the
    /// caller is expected to check for shutdown and poll again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the peer shut the link down
    /// and a transport error for any other receive failure.
    ///
    /// [`Error::TransportClosed`]: crate::Error::TransportClosed
    async fn receive(&self, poll: Duration) -> Result<Option<Frame>>;

    /// Releases the underlying endpoint.
    ///
    /// Closing an already-closed port is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures tearing down OS resources.
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the endpoint is bound.
    fn is_bound(&self) -> bool;
}
