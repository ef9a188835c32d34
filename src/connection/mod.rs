//! Connection lifecycle and frame delivery.
//!
//! This module owns the moving parts between a transport port and the
//! caller: the [`Connection`] facade, the background receive loop that
//! keeps draining the port, and the atomic lifecycle cell the two
//! coordinate through.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Connection`] | Open/send/wait/close surface over one port |
//! | [`WaitOutcome`] | Distinguishes frame, timeout, not-open, fault |
//! | [`ConnectionState`] | Observable lifecycle: closed, open, closing, faulted |
//!
//! The receive loop and the state cell are implementation details; only
//! their effects (queued frames, state transitions) are visible here.

mod core;
mod receiver;
mod state;

pub use self::core::{
    Connection, IsoTpConnection, StreamConnection, WaitOutcome, DEFAULT_POLL_TIMEOUT,
};
pub use self::state::ConnectionState;
