//! In-memory ISO-TP link pair.
//!
//! [`MemoryLink::pair`] creates two cross-wired link endpoints: whatever one
//! side sends, the other receives, whole-frame and in order. It implements
//! [`IsoTpSocket`], so either end plugs straight into an
//! [`IsoTpPort`](crate::port::IsoTpPort). Used by the test suite and the
//! examples; also handy for exercising diagnostic clients on machines
//! without CAN hardware.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::port::isotp::{IsoTpAddress, IsoTpSocket};

// ============================================================================
// MemoryLink
// ============================================================================

/// One endpoint of an in-memory link pair.
///
/// Closing an endpoint drops its sender, which the peer observes as
/// link-closed once it has drained any frames already in flight. A closed
/// endpoint stays closed; it cannot be rebound.
#[derive(Debug)]
pub struct MemoryLink {
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Frame>>,
    bound: AtomicBool,
    closed: AtomicBool,
}

impl MemoryLink {
    /// Creates two cross-wired endpoints.
    #[must_use]
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let (near_tx, far_rx) = mpsc::unbounded_channel();
        let (far_tx, near_rx) = mpsc::unbounded_channel();
        (
            Self::from_halves(near_tx, near_rx),
            Self::from_halves(far_tx, far_rx),
        )
    }

    fn from_halves(
        tx: mpsc::UnboundedSender<Frame>,
        rx: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
            bound: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// IsoTpSocket Implementation
// ============================================================================

#[async_trait]
impl IsoTpSocket for MemoryLink {
    async fn bind(&self, _address: &IsoTpAddress) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::transport("link closed; create a new pair"));
        }
        self.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(Error::TransportClosed)?;
        tx.send(Frame::copy_from(payload))
            .map_err(|_| Error::TransportClosed)
    }

    async fn recv(&self) -> Result<Frame> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) => Ok(frame),
            None => Err(Error::TransportClosed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.bound.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender is what the peer sees as EOF.
        self.tx.lock().take();
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
