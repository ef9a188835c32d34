//! Byte-stream transport port.
//!
//! Wraps any `AsyncRead + AsyncWrite` endpoint (TCP socket, in-process
//! duplex pipe) as a [`TransportPort`]. Framing is read-sized: whatever one
//! `read` call returns is surfaced as one frame, which matches how
//! datagram-like diagnostic payloads ride on top of stream sockets in
//! practice.
//!
//! The stream is split once at construction. Send and receive own separate
//! halves behind separate locks, so a blocked receive poll never delays an
//! outgoing write.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::port::TransportPort;

// ============================================================================
// Constants
// ============================================================================

/// Default receive buffer size in bytes.
///
/// 4095 is the largest payload a segmented diagnostic transfer can carry
/// (12-bit length field), so a single read never truncates one.
pub const DEFAULT_BUFSIZE: usize = 4095;

// ============================================================================
// StreamPort
// ============================================================================

/// Receive half plus its reusable buffer.
struct ReadEnd<S> {
    half: ReadHalf<S>,
    buf: Vec<u8>,
}

/// [`TransportPort`] over a byte stream.
///
/// The endpoint is consumed on [`close`]: a `StreamPort` cannot rebind a
/// stream it has torn down, so reopening a connection that closed one
/// requires constructing a fresh port from a fresh stream.
///
/// [`close`]: TransportPort::close
pub struct StreamPort<S> {
    read: Mutex<Option<ReadEnd<S>>>,
    write: Mutex<Option<WriteHalf<S>>>,
    bound: AtomicBool,
    label: String,
}

impl<S> StreamPort<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps an already-connected stream with the default receive buffer.
    pub fn new(stream: S) -> Self {
        Self::with_bufsize(stream, DEFAULT_BUFSIZE)
    }

    /// Wraps an already-connected stream with a custom receive buffer size.
    pub fn with_bufsize(stream: S, bufsize: usize) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            read: Mutex::new(Some(ReadEnd {
                half: read_half,
                buf: vec![0u8; bufsize],
            })),
            write: Mutex::new(Some(write_half)),
            bound: AtomicBool::new(false),
            label: "stream".to_string(),
        }
    }

    /// Sets the endpoint label used in log messages.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl StreamPort<TcpStream> {
    /// Connects a TCP socket and wraps it as a port.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let label = match stream.peer_addr() {
            Ok(peer) => format!("tcp://{peer}"),
            Err(_) => "tcp".to_string(),
        };
        Ok(Self::new(stream).with_label(label))
    }
}

// ============================================================================
// TransportPort Implementation
// ============================================================================

#[async_trait]
impl<S> TransportPort for StreamPort<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn bind(&self) -> Result<()> {
        if self.read.lock().await.is_none() {
            return Err(Error::transport(
                "stream endpoint consumed; construct a new port to reconnect",
            ));
        }
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.write.lock().await;
        let half = guard
            .as_mut()
            .ok_or_else(|| Error::transport("stream endpoint closed"))?;
        half.write_all(payload).await?;
        half.flush().await?;
        Ok(())
    }

    async fn receive(&self, poll: Duration) -> Result<Option<Frame>> {
        let mut guard = self.read.lock().await;
        let end = guard
            .as_mut()
            .ok_or_else(|| Error::transport("stream endpoint closed"))?;
        let ReadEnd { half, buf } = end;

        match time::timeout(poll, half.read(buf.as_mut_slice())).await {
            // Poll window expired with nothing read.
            Err(_) => Ok(None),
            // Zero-byte read is EOF on a stream.
            Ok(Ok(0)) => Err(Error::TransportClosed),
            Ok(Ok(n)) => Ok(Some(Frame::copy_from(&buf[..n]))),
            Ok(Err(err)) => Err(err.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.bound.store(false, Ordering::SeqCst);

        // Take the write half first so the peer sees EOF, then drop the
        // read half. Shutdown failures are expected when the peer is
        // already gone.
        if let Some(mut half) = self.write.lock().await.take() {
            if let Err(err) = half.shutdown().await {
                tracing::debug!(error = %err, "stream shutdown failed during close");
            }
        }
        self.read.lock().await.take();
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

impl<S> fmt::Debug for StreamPort<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPort")
            .field("label", &self.label)
            .field("bound", &self.bound.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
