//! Public connection contract over a transport port.
//!
//! A [`Connection`] composes three pieces behind one open/send/wait/close
//! surface: the [`TransportPort`] it owns, the [`FrameQueue`] buffering
//! inbound frames, and the background receive loop draining the former
//! into the latter. Two type aliases name the shipped wirings:
//! [`StreamConnection`] for byte streams and [`IsoTpConnection`] for
//! ISO-TP links.
//!
//! # Lifecycle
//!
//! [`open`] binds the port, installs a fresh frame queue for the session,
//! and spawns the receive loop. [`close`] signals the loop, joins it for a
//! bounded grace period, and releases the port. A transport
//! failure inside the loop moves the connection to
//! [`ConnectionState::Faulted`]: frames received before the failure stay
//! poppable, and once they are gone [`wait_frame`] reports the fault
//! instead of idling into timeouts.
//!
//! [`open`]: Connection::open
//! [`close`]: Connection::close
//! [`wait_frame`]: Connection::wait_frame

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace};

use crate::connection::receiver::run_receive_loop;
use crate::connection::state::{ConnectionState, StateCell};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::port::{IsoTpAddress, IsoTpPort, IsoTpSocket, StreamPort, TransportPort};
use crate::queue::FrameQueue;

// ============================================================================
// Constants
// ============================================================================

/// Default receive-loop poll interval.
///
/// Short enough that a close request is honored promptly, long enough not
/// to spin on an idle link. Callers waiting in [`Connection::wait_frame`]
/// have their own, independent deadline.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

// ============================================================================
// WaitOutcome
// ============================================================================

/// Outcome of one [`Connection::wait_frame`] call.
///
/// A missing frame has three distinct causes (deadline expiry, a
/// connection that was never opened or already closed, a receive loop
/// killed by a transport failure), and each gets its own variant so the
/// caller can branch without guessing. Use [`Connection::expect_frame`]
/// when any non-frame outcome should simply be an error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum WaitOutcome {
    /// The next frame, in arrival order.
    Frame(Frame),
    /// No frame arrived within the deadline. The connection is still
    /// usable.
    TimedOut,
    /// The connection is not open.
    NotOpen,
    /// The receive loop died on a transport failure; nothing further will
    /// ever arrive. Close and reopen to recover.
    Faulted,
}

impl WaitOutcome {
    /// Returns the frame, discarding the non-frame outcomes.
    #[inline]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Self::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Returns `true` if a frame was delivered.
    #[inline]
    #[must_use]
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame(_))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A diagnostic link over one exclusively-owned transport port.
///
/// The connection spawns one background receive task per open session and
/// is deliberately not `Clone`: the port, the queue, and the loop live and
/// die with this value. Dropping it without [`close`] still stops the
/// loop, but skips the graceful port teardown.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use diaglink::{IsoTpAddress, IsoTpConnection, MemoryLink, Result};
///
/// # async fn demo() -> Result<()> {
/// let (near, _far) = MemoryLink::pair();
/// let conn = IsoTpConnection::bind_with(near, IsoTpAddress::new("vcan0", 0x7E0, 0x7E8))
///     .with_name("engine-ecu");
///
/// conn.open().await?;
/// conn.send(&[0x3E, 0x00]).await?;
/// if let Some(frame) = conn.wait_frame(Duration::from_secs(2)).await.into_frame() {
///     println!("response: {frame:?}");
/// }
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
///
/// Cloning is rejected at compile time:
///
/// ```compile_fail,E0277
/// use diaglink::{IsoTpAddress, IsoTpConnection, MemoryLink};
///
/// fn shared<T: Clone>(value: &T) -> T {
///     value.clone()
/// }
///
/// let (near, _far) = MemoryLink::pair();
/// let conn = IsoTpConnection::bind_with(near, IsoTpAddress::new("vcan0", 0x7E0, 0x7E8));
/// let _copy = shared(&conn);
/// ```
///
/// [`close`]: Connection::close
pub struct Connection<P> {
    /// Name used in log messages.
    name: String,
    /// The port, shared only with this connection's receive loop.
    port: Arc<P>,
    /// Inbound frames of the current session. Replaced with a fresh queue
    /// on every open; each receive loop keeps a clone of its own.
    queue: Mutex<Arc<FrameQueue>>,
    /// Lifecycle cell, shared with the receive loop.
    state: Arc<StateCell>,
    /// Receive-loop poll interval.
    poll_timeout: Duration,
    /// Handle of the running receive loop, taken by `close`.
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// Connection over a byte-stream endpoint. See [`StreamPort`].
pub type StreamConnection<S> = Connection<StreamPort<S>>;

/// Connection over an ISO-TP link socket. See [`IsoTpPort`].
pub type IsoTpConnection<L> = Connection<IsoTpPort<L>>;

// ============================================================================
// Connection - Constructors
// ============================================================================

impl<P: TransportPort> Connection<P> {
    /// Wraps a port with the default name and poll interval.
    pub fn new(port: P) -> Self {
        Self {
            name: "Connection".to_string(),
            port: Arc::new(port),
            queue: Mutex::new(Arc::new(FrameQueue::new())),
            state: Arc::new(StateCell::new()),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            loop_task: Mutex::new(None),
        }
    }

    /// Names the connection for log messages, rendered as
    /// `Connection[name]`. Intended to be set before [`open`].
    ///
    /// [`open`]: Connection::open
    #[must_use]
    pub fn with_name(mut self, name: impl AsRef<str>) -> Self {
        self.name = format!("Connection[{}]", name.as_ref());
        self
    }

    /// Overrides the receive-loop poll interval.
    ///
    /// The interval bounds the latency of [`close`], not of callers
    /// waiting for frames.
    ///
    /// [`close`]: Connection::close
    #[must_use]
    pub fn with_poll_timeout(mut self, poll: Duration) -> Self {
        self.poll_timeout = poll;
        self
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl<P: TransportPort> Connection<P> {
    /// Binds the port and starts the background receive loop.
    ///
    /// Each session gets its own frame queue, so a reopened connection
    /// never observes stale data, not even from a loop that outlived the
    /// previous session's bounded close join.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyOpen`] if the connection is not currently closed.
    /// - A transport error if the port cannot bind; the connection reverts
    ///   to closed.
    pub async fn open(&self) -> Result<()> {
        let epoch = self.state.try_open().map_err(|blocking| {
            debug!(connection = %self.name, state = %blocking, "Open rejected");
            Error::AlreadyOpen
        })?;

        // The previous session's queue is abandoned wholesale rather than
        // drained in place: a loop still holding it cannot reach this one.
        // Installed before the bind so waiters racing the open never pick
        // up the old queue either.
        let queue = Arc::new(FrameQueue::new());
        let stale = mem::replace(&mut *self.queue.lock(), Arc::clone(&queue)).len();
        if stale > 0 {
            debug!(connection = %self.name, count = stale, "Discarded stale frames at open");
        }

        if let Err(err) = self.port.bind().await {
            self.state.revert_open();
            return Err(err);
        }

        let task = tokio::spawn(run_receive_loop(
            self.name.clone(),
            Arc::clone(&self.port),
            queue,
            Arc::clone(&self.state),
            epoch,
            self.poll_timeout,
        ));
        *self.loop_task.lock() = Some(task);

        info!(connection = %self.name, endpoint = %self.port.describe(), "Connection opened");
        Ok(())
    }

    /// Stops the receive loop and releases the port. Idempotent.
    ///
    /// The loop is joined for a bounded grace period (twice the poll
    /// interval) and detached if it has not finished by then; it is never
    /// aborted, and a detached loop cannot affect a later session.
    ///
    /// # Errors
    ///
    /// Returns an error if the port's teardown fails. The connection ends
    /// up closed either way.
    pub async fn close(&self) -> Result<()> {
        if !self.state.begin_close() {
            return Ok(());
        }

        let task = self.loop_task.lock().take();
        if let Some(task) = task {
            let grace = self.poll_timeout.checked_mul(2).unwrap_or(Duration::MAX);
            match time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(connection = %self.name, error = %err, "Receive loop task failed")
                }
                Err(_) => {
                    debug!(connection = %self.name, "Receive loop still stopping, detached")
                }
            }
        }

        let released = self.port.close().await;
        self.state.finish_close();
        info!(connection = %self.name, "Connection closed");
        released
    }
}

// ============================================================================
// Connection - I/O
// ============================================================================

impl<P: TransportPort> Connection<P> {
    /// Queue of the current session. Receive loops hold their own clone,
    /// so the swap at open never redirects a stale producer here.
    fn session_queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue.lock())
    }

    /// Transmits one opaque payload.
    ///
    /// Sends are synchronous with respect to the caller and are not
    /// retried; a transport failure propagates immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the connection is closed or closing.
    /// - [`Error::Faulted`] if the receive loop has died.
    /// - A transport error if the underlying write fails.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        match self.state.get() {
            ConnectionState::Open => {}
            ConnectionState::Faulted => return Err(Error::Faulted),
            ConnectionState::Closed | ConnectionState::Closing => {
                return Err(Error::not_open("send"));
            }
        }

        debug!(
            connection = %self.name,
            len = payload.len(),
            data = %hex::encode(payload),
            "Sending frame"
        );
        self.port.send(payload).await
    }

    /// Waits up to `timeout` for the next frame, in arrival order.
    ///
    /// The wait is a true blocking suspension with a deadline, never a
    /// busy poll. On a faulted connection, frames received before the
    /// fault are still delivered; after that the fault is reported
    /// immediately instead of burning the full timeout. A fault that lands
    /// mid-wait surfaces once the deadline expires.
    pub async fn wait_frame(&self, timeout: Duration) -> WaitOutcome {
        match self.state.get() {
            ConnectionState::Open => {}
            ConnectionState::Faulted => {
                return match self.session_queue().try_pop() {
                    Some(frame) => WaitOutcome::Frame(frame),
                    None => WaitOutcome::Faulted,
                };
            }
            ConnectionState::Closed | ConnectionState::Closing => return WaitOutcome::NotOpen,
        }

        match self.session_queue().pop_within(timeout).await {
            Some(frame) => {
                trace!(
                    connection = %self.name,
                    len = frame.len(),
                    data = %frame.to_hex(),
                    "Frame delivered"
                );
                WaitOutcome::Frame(frame)
            }
            None if self.state.get() == ConnectionState::Faulted => WaitOutcome::Faulted,
            None => WaitOutcome::TimedOut,
        }
    }

    /// Like [`wait_frame`], but any non-frame outcome is an error.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameTimeout`] if no frame arrived within `timeout`.
    /// - [`Error::NotOpen`] if the connection is closed or closing.
    /// - [`Error::Faulted`] if the receive loop has died.
    ///
    /// [`wait_frame`]: Connection::wait_frame
    pub async fn expect_frame(&self, timeout: Duration) -> Result<Frame> {
        match self.wait_frame(timeout).await {
            WaitOutcome::Frame(frame) => Ok(frame),
            WaitOutcome::TimedOut => Err(Error::frame_timeout(timeout.as_millis() as u64)),
            WaitOutcome::NotOpen => Err(Error::not_open("wait_frame")),
            WaitOutcome::Faulted => Err(Error::Faulted),
        }
    }

    /// Discards every queued frame without blocking, returning how many
    /// were dropped. Valid in any state; used to reset between exchanges.
    pub fn drain(&self) -> usize {
        let dropped = self.session_queue().drain();
        if dropped > 0 {
            debug!(connection = %self.name, count = dropped, "Receive queue drained");
        }
        dropped
    }
}

// ============================================================================
// Connection - Observers
// ============================================================================

impl<P: TransportPort> Connection<P> {
    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Returns `true` while the connection is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.get() == ConnectionState::Open
    }

    /// Returns `true` once the receive loop has died on a transport
    /// failure.
    #[inline]
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.state.get() == ConnectionState::Faulted
    }

    /// Returns the connection's log name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the receive-loop poll interval.
    #[inline]
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Returns the underlying transport port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &P {
        &self.port
    }
}

// ============================================================================
// Connection - Wiring Conveniences
// ============================================================================

impl<S> Connection<StreamPort<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps an already-connected byte stream.
    pub fn from_stream(stream: S) -> Self {
        Self::new(StreamPort::new(stream))
    }
}

impl Connection<StreamPort<TcpStream>> {
    /// Connects a TCP stream and wraps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self::new(StreamPort::connect(addr).await?))
    }
}

impl<L: IsoTpSocket> Connection<IsoTpPort<L>> {
    /// Wraps a link socket; `address` is used when [`open`] binds it.
    ///
    /// [`open`]: Connection::open
    pub fn bind_with(link: L, address: IsoTpAddress) -> Self {
        Self::new(IsoTpPort::new(link, address))
    }
}

// ============================================================================
// Connection - Drop
// ============================================================================

impl<P> Drop for Connection<P> {
    fn drop(&mut self) {
        // A forgotten close() must not leave the loop polling forever.
        // Nothing here blocks; the loop notices within one poll interval
        // and releases the port when its Arc drops.
        if self.state.begin_close() {
            self.state.finish_close();
        }
    }
}

impl<P: TransportPort> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("state", &self.state.get())
            .field("endpoint", &self.port.describe())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::Instant;

    use crate::port::{IsoTpSocket, MemoryLink};

    const POLL: Duration = Duration::from_millis(20);

    fn test_address() -> IsoTpAddress {
        IsoTpAddress::new("vcan0", 0x7E0, 0x7E8)
    }

    /// Link connection plus the raw far end to drive it with.
    fn link_pair() -> (IsoTpConnection<MemoryLink>, MemoryLink) {
        let (near, far) = MemoryLink::pair();
        let conn = IsoTpConnection::bind_with(near, test_address()).with_poll_timeout(POLL);
        (conn, far)
    }

    /// Link pair that tolerates close-then-bind, for re-open coverage. A
    /// closed [`MemoryLink`] endpoint stays closed for good.
    struct RevolvingLink {
        tx: mpsc::UnboundedSender<Frame>,
        rx: AsyncMutex<mpsc::UnboundedReceiver<Frame>>,
        bound: AtomicBool,
    }

    impl RevolvingLink {
        fn pair() -> (RevolvingLink, RevolvingLink) {
            let (near_tx, far_rx) = mpsc::unbounded_channel();
            let (far_tx, near_rx) = mpsc::unbounded_channel();
            let link = |tx, rx| RevolvingLink {
                tx,
                rx: AsyncMutex::new(rx),
                bound: AtomicBool::new(false),
            };
            (link(near_tx, near_rx), link(far_tx, far_rx))
        }
    }

    #[async_trait]
    impl IsoTpSocket for RevolvingLink {
        async fn bind(&self, _address: &IsoTpAddress) -> Result<()> {
            self.bound.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, payload: &[u8]) -> Result<()> {
            self.tx
                .send(Frame::copy_from(payload))
                .map_err(|_| Error::TransportClosed)
        }

        async fn recv(&self) -> Result<Frame> {
            match self.rx.lock().await.recv().await {
                Some(frame) => Ok(frame),
                None => Err(Error::TransportClosed),
            }
        }

        async fn close(&self) -> Result<()> {
            self.bound.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_bound(&self) -> bool {
            self.bound.load(Ordering::SeqCst)
        }
    }

    /// Link whose bind always fails, for exercising the open revert path.
    struct DeadLink;

    #[async_trait]
    impl IsoTpSocket for DeadLink {
        async fn bind(&self, _address: &IsoTpAddress) -> Result<()> {
            Err(Error::transport("no such interface: vcan9"))
        }

        async fn send(&self, _payload: &[u8]) -> Result<()> {
            Err(Error::TransportClosed)
        }

        async fn recv(&self) -> Result<Frame> {
            Err(Error::TransportClosed)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn is_bound(&self) -> bool {
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_round_trip_matches_wire_bytes() {
        let (near, mut far) = duplex(256);
        let conn = StreamConnection::from_stream(near).with_poll_timeout(POLL);
        conn.open().await.unwrap();

        conn.send(&[0x10, 0x03]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = far.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x10, 0x03]);

        far.write_all(&[0x50, 0x03, 0x00, 0x32, 0x00, 0x00])
            .await
            .unwrap();
        let outcome = conn.wait_frame(Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            WaitOutcome::Frame(Frame::from(vec![0x50, 0x03, 0x00, 0x32, 0x00, 0x00]))
        );

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_delivered_in_arrival_order() {
        let (conn, far) = link_pair();
        conn.open().await.unwrap();

        for byte in 1u8..=4 {
            far.send(&[byte]).await.unwrap();
        }

        for byte in 1u8..=4 {
            let outcome = conn.wait_frame(Duration::from_secs(1)).await;
            assert_eq!(outcome, WaitOutcome::Frame(Frame::from(vec![byte])));
        }

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_frame_arrival_cuts_the_wait_short() {
        let (conn, far) = link_pair();
        conn.open().await.unwrap();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            far.send(&[0x7E, 0x00]).await.unwrap();
        });

        let started = Instant::now();
        let outcome = conn.wait_frame(Duration::from_secs(1)).await;
        assert_eq!(outcome, WaitOutcome::Frame(Frame::from(vec![0x7E, 0x00])));
        assert!(started.elapsed() < Duration::from_secs(1));

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_frame_timeout_no_earlier_and_bounded() {
        let (conn, _far) = link_pair();
        conn.open().await.unwrap();

        let started = Instant::now();
        let outcome = conn.wait_frame(Duration::from_millis(200)).await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(200) + POLL * 2);

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_frame_unbounded_timeout_delivers() {
        // Duration::MAX is a legal wait: no deadline, ends on arrival.
        let (conn, far) = link_pair();
        conn.open().await.unwrap();

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            far.send(&[0x50, 0x03]).await.unwrap();
        });

        let outcome = conn.wait_frame(Duration::MAX).await;
        assert_eq!(outcome, WaitOutcome::Frame(Frame::from(vec![0x50, 0x03])));

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_frame_timeout_is_an_error() {
        let (conn, _far) = link_pair();
        conn.open().await.unwrap();

        let started = Instant::now();
        let err = conn
            .expect_frame(Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(err.is_timeout());
        assert!(!err.is_fatal());
        assert!(matches!(err, Error::FrameTimeout { timeout_ms: 200 }));

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_opened_rejects_without_touching_transport() {
        let (conn, far) = link_pair();

        assert_eq!(
            conn.wait_frame(Duration::from_millis(50)).await,
            WaitOutcome::NotOpen
        );

        let err = conn.send(&[0x10, 0x03]).await.unwrap_err();
        assert!(matches!(err, Error::NotOpen { operation: "send" }));

        // Nothing reached the wire.
        let untouched = time::timeout(Duration::from_millis(50), far.recv()).await;
        assert!(untouched.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_open_rejected_and_session_survives() {
        let (conn, far) = link_pair();
        conn.open().await.unwrap();

        let err = conn.open().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen));
        assert!(conn.is_open());

        // The original session still works.
        conn.send(&[0x3E, 0x00]).await.unwrap();
        assert_eq!(far.recv().await.unwrap(), Frame::from(vec![0x3E, 0x00]));

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_rejects_followups() {
        let (conn, _far) = link_pair();
        conn.open().await.unwrap();
        assert!(conn.port().is_bound());

        conn.close().await.unwrap();
        conn.close().await.unwrap();

        assert!(!conn.is_open());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.port().is_bound());

        assert_eq!(
            conn.wait_frame(Duration::from_millis(50)).await,
            WaitOutcome::NotOpen
        );
        let err = conn.send(&[0x10, 0x03]).await.unwrap_err();
        assert!(matches!(err, Error::NotOpen { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_starts_fresh_and_stale_pushes_stay_orphaned() {
        let (near, far) = RevolvingLink::pair();
        let conn = IsoTpConnection::bind_with(near, test_address()).with_poll_timeout(POLL);
        conn.open().await.unwrap();

        // What a loop detached by the bounded close join still holds: the
        // first session's queue.
        let first_queue = Arc::clone(&conn.queue.lock());

        conn.close().await.unwrap();
        conn.open().await.unwrap();

        // A straggler's late push lands in the orphaned queue only.
        first_queue.push(Frame::from(vec![0x99]));
        assert_eq!(
            conn.wait_frame(Duration::from_millis(50)).await,
            WaitOutcome::TimedOut
        );
        assert_eq!(first_queue.len(), 1);

        // The reopened session's own traffic still flows.
        far.send(&[0x7E, 0x00]).await.unwrap();
        assert_eq!(
            conn.wait_frame(Duration::from_secs(1)).await,
            WaitOutcome::Frame(Frame::from(vec![0x7E, 0x00]))
        );

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_resets_pending_frames() {
        let (conn, far) = link_pair();
        assert_eq!(conn.drain(), 0);

        conn.open().await.unwrap();
        far.send(&[0xAA]).await.unwrap();

        // Wait until the loop has queued the frame, then discard it.
        let dropped = time::timeout(Duration::from_secs(5), async {
            loop {
                let dropped = conn.drain();
                if dropped > 0 {
                    return dropped;
                }
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frame never reached the queue");
        assert_eq!(dropped, 1);

        // The discarded frame is gone for good.
        assert_eq!(
            conn.wait_frame(Duration::from_millis(50)).await,
            WaitOutcome::TimedOut
        );

        conn.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_is_observable_and_preserves_earlier_frames() {
        let (conn, far) = link_pair();
        conn.open().await.unwrap();

        far.send(&[0x62, 0xF1, 0x90]).await.unwrap();
        far.close().await.unwrap();

        // The frame that arrived before the link died is still delivered.
        let outcome = conn.wait_frame(Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            WaitOutcome::Frame(Frame::from(vec![0x62, 0xF1, 0x90]))
        );

        time::timeout(Duration::from_secs(5), async {
            while !conn.is_faulted() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop never noticed the dead link");

        // Faulted is reported immediately, not after the full timeout.
        let started = Instant::now();
        assert_eq!(
            conn.wait_frame(Duration::from_secs(60)).await,
            WaitOutcome::Faulted
        );
        assert!(started.elapsed() < Duration::from_secs(1));

        let err = conn.send(&[0x3E, 0x00]).await.unwrap_err();
        assert!(matches!(err, Error::Faulted));

        let err = conn.expect_frame(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_fatal());

        // Close recovers the lifecycle.
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_latency_bounded_by_poll_interval() {
        let (conn, far) = link_pair();
        conn.open().await.unwrap();

        let started = Instant::now();
        conn.close().await.unwrap();
        assert!(started.elapsed() <= POLL * 3);

        // A frame arriving during shutdown is never pushed.
        far.send(&[0x99]).await.ok();
        time::sleep(POLL * 4).await;
        assert_eq!(conn.drain(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_without_close_stops_the_loop() {
        let far = {
            let (conn, far) = link_pair();
            conn.open().await.unwrap();
            far
        };

        // Once the dropped connection's loop exits, the port is released
        // and the far end loses its peer.
        time::timeout(Duration::from_secs(5), async {
            while far.send(&[0x01]).await.is_ok() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop did not release the port after drop");
    }

    #[tokio::test]
    async fn test_open_bind_failure_reverts_to_closed() {
        let conn = IsoTpConnection::bind_with(DeadLink, test_address());

        let err = conn.open().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(conn.state(), ConnectionState::Closed);

        // Still closed, so the retry hits the bind again rather than
        // being rejected as already open.
        let err = conn.open().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_builder_name_and_poll_timeout() {
        let (near, _far) = MemoryLink::pair();
        let conn = IsoTpConnection::bind_with(near, test_address())
            .with_name("ecu")
            .with_poll_timeout(Duration::from_millis(50));

        assert_eq!(conn.name(), "Connection[ecu]");
        assert_eq!(conn.poll_timeout(), Duration::from_millis(50));

        let (near, _far) = MemoryLink::pair();
        let unnamed = IsoTpConnection::bind_with(near, test_address());
        assert_eq!(unnamed.name(), "Connection");
        assert_eq!(unnamed.poll_timeout(), DEFAULT_POLL_TIMEOUT);
    }
}
