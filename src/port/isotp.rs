//! ISO-TP style link-layer transport port.
//!
//! ISO-TP sockets deliver whole reassembled payloads, so unlike the stream
//! binding there is no framing concern here: one socket receive is one
//! frame. The actual socket is injected behind the [`IsoTpSocket`] trait,
//! which keeps the port usable with an OS-level ISO-TP socket on Linux, a
//! vendor adapter, or the in-memory [`MemoryLink`] pair in tests.
//!
//! [`MemoryLink`]: crate::port::MemoryLink

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use crate::error::Result;
use crate::frame::Frame;
use crate::port::TransportPort;

// ============================================================================
// IsoTpAddress
// ============================================================================

/// Addressing pair for an ISO-TP link: the CAN interface plus the transmit
/// and receive arbitration IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoTpAddress {
    /// Network interface name, e.g. `vcan0`.
    pub interface: String,
    /// Arbitration ID used for outgoing frames.
    pub tx_id: u32,
    /// Arbitration ID listened on for incoming frames.
    pub rx_id: u32,
}

impl IsoTpAddress {
    /// Creates an address from an interface name and ID pair.
    pub fn new(interface: impl Into<String>, tx_id: u32, rx_id: u32) -> Self {
        Self {
            interface: interface.into(),
            tx_id,
            rx_id,
        }
    }
}

impl fmt::Display for IsoTpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:#05X}->{:#05X}",
            self.interface, self.tx_id, self.rx_id
        )
    }
}

// ============================================================================
// IsoTpSocket Trait
// ============================================================================

/// Socket-level operations an ISO-TP link must provide.
///
/// `recv` must be cancel-safe: the port wraps it in a poll timeout, and a
/// frame must never be lost because the timeout expired while the future
/// was pending.
#[async_trait]
pub trait IsoTpSocket: Send + Sync + 'static {
    /// Binds the socket to the given address.
    async fn bind(&self, address: &IsoTpAddress) -> Result<()>;

    /// Transmits one payload.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next reassembled payload.
    async fn recv(&self) -> Result<Frame>;

    /// Releases the socket.
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the socket is bound.
    fn is_bound(&self) -> bool;
}

// ============================================================================
// IsoTpPort
// ============================================================================

/// [`TransportPort`] over an [`IsoTpSocket`].
#[derive(Debug)]
pub struct IsoTpPort<L> {
    link: L,
    address: IsoTpAddress,
}

impl<L: IsoTpSocket> IsoTpPort<L> {
    /// Wraps a link socket with its addressing.
    pub fn new(link: L, address: IsoTpAddress) -> Self {
        Self { link, address }
    }

    /// Returns the configured address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &IsoTpAddress {
        &self.address
    }
}

// ============================================================================
// TransportPort Implementation
// ============================================================================

#[async_trait]
impl<L: IsoTpSocket> TransportPort for IsoTpPort<L> {
    fn describe(&self) -> String {
        format!("isotp {}", self.address)
    }

    async fn bind(&self) -> Result<()> {
        self.link.bind(&self.address).await
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        self.link.send(payload).await
    }

    async fn receive(&self, poll: Duration) -> Result<Option<Frame>> {
        match time::timeout(poll, self.link.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(frame)) => {
                // Zero-length payloads carry no diagnostic data; treat them
                // like an empty poll.
                if frame.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(frame))
                }
            }
            Ok(Err(err)) => Err(err),
        }
    }

    async fn close(&self) -> Result<()> {
        self.link.close().await
    }

    fn is_bound(&self) -> bool {
        self.link.is_bound()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::port::MemoryLink;

    fn test_address() -> IsoTpAddress {
        IsoTpAddress::new("vcan0", 0x7E0, 0x7E8)
    }

    #[test]
    fn test_address_display() {
        assert_eq!(test_address().to_string(), "vcan0 0x7E0->0x7E8");
    }

    #[test]
    fn test_describe_includes_address() {
        let (near, _far) = MemoryLink::pair();
        let port = IsoTpPort::new(near, test_address());
        assert_eq!(port.describe(), "isotp vcan0 0x7E0->0x7E8");
    }

    #[tokio::test]
    async fn test_round_trip_between_paired_ports() {
        let (near, far) = MemoryLink::pair();
        let tester = IsoTpPort::new(near, test_address());
        let ecu = IsoTpPort::new(far, IsoTpAddress::new("vcan0", 0x7E8, 0x7E0));

        tester.bind().await.unwrap();
        ecu.bind().await.unwrap();

        tester.send(&[0x10, 0x03]).await.unwrap();
        let request = ecu.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(request, Some(Frame::from(vec![0x10, 0x03])));

        ecu.send(&[0x50, 0x03, 0x00, 0x32, 0x00, 0x00]).await.unwrap();
        let response = tester.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            response,
            Some(Frame::from(vec![0x50, 0x03, 0x00, 0x32, 0x00, 0x00]))
        );
    }

    #[tokio::test]
    async fn test_empty_payload_is_skipped() {
        let (near, far) = MemoryLink::pair();
        let port = IsoTpPort::new(near, test_address());
        port.bind().await.unwrap();

        far.send(&[]).await.unwrap();
        far.send(&[0x7F, 0x10, 0x78]).await.unwrap();

        assert_eq!(port.receive(Duration::from_millis(50)).await.unwrap(), None);
        assert_eq!(
            port.receive(Duration::from_millis(50)).await.unwrap(),
            Some(Frame::from(vec![0x7F, 0x10, 0x78]))
        );
    }

    #[tokio::test]
    async fn test_receive_poll_expiry_yields_none() {
        let (near, _far) = MemoryLink::pair();
        let port = IsoTpPort::new(near, test_address());
        port.bind().await.unwrap();

        let outcome = port.receive(Duration::from_millis(20)).await.unwrap();
        assert_eq!(outcome, None);
    }
}
