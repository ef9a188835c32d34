//! Diaglink - Transport abstraction for diagnostic protocol clients.
//!
//! This library decouples a request/response diagnostic client from the
//! medium carrying its frames. The client talks to one [`Connection`];
//! everything below it (TCP sockets, ISO-TP links, in-memory pairs) hides
//! behind the [`TransportPort`] trait.
//!
//! # Architecture
//!
//! Each connection runs a background receive loop for as long as it is
//! open:
//!
//! ```text
//! caller ── send() ─────────────────────────► TransportPort ──► medium
//! caller ◄─ wait_frame() ── FrameQueue ◄── receive loop ◄───────┘
//! ```
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns: transport port + frame queue + receive loop
//! - Frames are opaque byte payloads in strict arrival order
//! - Waiting callers block on a deadline, never busy-poll
//! - A dead transport faults the connection instead of hanging it
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use diaglink::{Connection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Wrap a TCP stream to the diagnostic gateway
//!     let conn = Connection::connect("192.168.8.40:13400").await?;
//!     conn.open().await?;
//!
//!     // Request the active diagnostic session
//!     conn.send(&[0x10, 0x03]).await?;
//!     let response = conn.expect_frame(Duration::from_secs(2)).await?;
//!     println!("ECU answered: {}", response.to_hex());
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Connection lifecycle, receive loop, [`WaitOutcome`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frame`] | Opaque received payload: [`Frame`] |
//! | [`port`] | Transport endpoints behind [`TransportPort`] |
//! | [`queue`] | Thread-safe FIFO with deadline waits (internal) |
//!
//! # Properties
//!
//! - **Order-preserving**: frames pop in the order the medium delivered them
//! - **Prompt shutdown**: close latency is bounded by the poll interval
//! - **Fault-observable**: transport death is a state, not a silent timeout
//! - **Test-friendly**: [`MemoryLink`] pairs wire two connections in memory

// ============================================================================
// Modules
// ============================================================================

/// Connection lifecycle and frame delivery.
///
/// This module contains the public client surface:
///
/// - [`Connection`] - open/send/wait/close over one port
/// - [`WaitOutcome`] - what a bounded wait produced
/// - [`ConnectionState`] - observable lifecycle
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Opaque received payload.
///
/// [`Frame`] is a cheaply clonable byte buffer with a hex-forward `Debug`.
pub mod frame;

/// Transport endpoints.
///
/// The [`TransportPort`] trait plus the shipped implementations:
/// byte streams, ISO-TP links, and in-memory pairs.
pub mod port;

/// Thread-safe frame FIFO.
///
/// Internal buffering between the receive loop and waiting callers.
pub mod queue;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    Connection, ConnectionState, IsoTpConnection, StreamConnection, WaitOutcome,
    DEFAULT_POLL_TIMEOUT,
};

// Error types
pub use error::{Error, Result};

// Frame type
pub use frame::Frame;

// Port types
pub use port::{
    IsoTpAddress, IsoTpPort, IsoTpSocket, MemoryLink, StreamPort, TransportPort, DEFAULT_BUFSIZE,
};

// Queue type
pub use queue::FrameQueue;
