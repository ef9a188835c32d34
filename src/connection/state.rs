//! Connection lifecycle state machine.
//!
//! Legal transitions:
//!
//! ```text
//!             try_open              begin_close            finish_close
//!   Closed ------------> Open --------------------> Closing ----------> Closed
//!                          |                           ^
//!                          | fault                     | begin_close
//!                          v                           |
//!                        Faulted ----------------------+
//! ```
//!
//! The state shares one atomic word with a session epoch, so every
//! transition is a single compare-and-swap: concurrent open/close/fault
//! attempts race deterministically, and exactly one caller wins each
//! transition.
//!
//! The epoch counts `try_open` wins. A receive loop carries the epoch of
//! the session that spawned it; once a close or reopen moves the cell past
//! that session, the loop's running checks and fault attempts no longer
//! match and fall dead. A loop left behind by a timed-out close join can
//! therefore never feed or fault a later session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No session. The port is unbound and no receive loop is running.
    Closed = 0,
    /// Session established; send and wait are valid.
    Open = 1,
    /// Close in progress; the receive loop is winding down.
    Closing = 2,
    /// The receive loop died on a transport failure. Frames received before
    /// the fault remain available; nothing new will ever arrive. Close and
    /// reopen to recover.
    Faulted = 3,
}

impl ConnectionState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Closed,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Faulted,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

// ============================================================================
// StateCell
// ============================================================================

/// Bits 0-7 of the cell hold the state; bits 8-63 hold the session epoch.
const STATE_MASK: u64 = 0xFF;

fn pack(epoch: u64, state: ConnectionState) -> u64 {
    (epoch << 8) | state as u64
}

fn unpack_state(word: u64) -> ConnectionState {
    ConnectionState::from_raw((word & STATE_MASK) as u8)
}

/// Shared lifecycle cell, written by the connection and the receive loop.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU64);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(pack(0, ConnectionState::Closed)))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        unpack_state(self.0.load(Ordering::SeqCst))
    }

    /// `Closed -> Open`, starting a new session. Returns the session's
    /// epoch, or the state that blocked the transition.
    pub(crate) fn try_open(&self) -> Result<u64, ConnectionState> {
        loop {
            let observed = self.0.load(Ordering::SeqCst);
            if unpack_state(observed) != ConnectionState::Closed {
                return Err(unpack_state(observed));
            }
            let epoch = (observed >> 8) + 1;
            if self
                .0
                .compare_exchange(
                    observed,
                    pack(epoch, ConnectionState::Open),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return Ok(epoch);
            }
        }
    }

    /// `Open -> Closed`, used to back out of an open whose bind failed.
    /// The epoch stays consumed.
    pub(crate) fn revert_open(&self) {
        let observed = self.0.load(Ordering::SeqCst);
        if unpack_state(observed) == ConnectionState::Open {
            let _ = self.0.compare_exchange(
                observed,
                (observed & !STATE_MASK) | ConnectionState::Closed as u64,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// `Open | Faulted -> Closing`. Returns `false` when the connection was
    /// already closed or another close is in progress.
    pub(crate) fn begin_close(&self) -> bool {
        loop {
            let observed = self.0.load(Ordering::SeqCst);
            match unpack_state(observed) {
                ConnectionState::Closed | ConnectionState::Closing => return false,
                ConnectionState::Open | ConnectionState::Faulted => {
                    if self
                        .0
                        .compare_exchange(
                            observed,
                            (observed & !STATE_MASK) | ConnectionState::Closing as u64,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        return true;
                    }
                }
            }
        }
    }

    /// `Closing -> Closed`. Only the caller that won `begin_close` runs
    /// this.
    pub(crate) fn finish_close(&self) {
        let observed = self.0.load(Ordering::SeqCst);
        self.0.store(
            (observed & !STATE_MASK) | ConnectionState::Closed as u64,
            Ordering::SeqCst,
        );
    }

    /// `Open -> Faulted`, valid only while `epoch` is the live session.
    /// Returns `false` when a close won the race or the session has been
    /// superseded.
    pub(crate) fn fault(&self, epoch: u64) -> bool {
        self.0
            .compare_exchange(
                pack(epoch, ConnectionState::Open),
                pack(epoch, ConnectionState::Faulted),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// `true` while the receive loop spawned at `epoch` should keep polling.
    pub(crate) fn is_running_for(&self, epoch: u64) -> bool {
        self.0.load(Ordering::SeqCst) == pack(epoch, ConnectionState::Open)
    }
}

// ============================================================================
// Tests
// ============================================================================
