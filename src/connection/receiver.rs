//! Background receive loop.
//!
//! One loop task runs per open connection. Each iteration polls the port
//! with the connection's short poll timeout, so a close request is noticed
//! within one poll window no matter how long a caller is willing to wait
//! for a frame. Idle polls are the normal quiet-bus condition; any other
//! receive failure faults the connection and ends the task.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::connection::state::StateCell;
use crate::port::TransportPort;
use crate::queue::FrameQueue;

// ============================================================================
// Receive Loop
// ============================================================================

/// Drains `port` into `queue` until the session leaves `Open` or the
/// transport fails.
///
/// `epoch` identifies the session this loop belongs to and `queue` is that
/// session's private sink, replaced wholesale on re-open. A loop that
/// outlives its session's close (the join in `close()` is bounded) keeps
/// pushing into its own orphaned queue, and its fault transition is
/// epoch-qualified; either way it cannot touch a later session.
pub(crate) async fn run_receive_loop<P: TransportPort>(
    name: String,
    port: Arc<P>,
    queue: Arc<FrameQueue>,
    state: Arc<StateCell>,
    epoch: u64,
    poll: Duration,
) {
    debug!(connection = %name, "Receive loop started");

    while state.is_running_for(epoch) {
        match port.receive(poll).await {
            // Idle poll window. Loop back for the shutdown check.
            Ok(None) => {}
            Ok(Some(frame)) => {
                if frame.is_empty() {
                    continue;
                }
                // A frame polled while a close raced us stays out of the
                // queue.
                if !state.is_running_for(epoch) {
                    break;
                }
                debug!(
                    connection = %name,
                    len = frame.len(),
                    data = %frame.to_hex(),
                    "Frame received"
                );
                queue.push(frame);
            }
            Err(err) => {
                if state.fault(epoch) {
                    error!(connection = %name, error = %err, "Receive failed, connection faulted");
                } else {
                    debug!(connection = %name, error = %err, "Receive failed during shutdown");
                }
                break;
            }
        }
    }

    debug!(connection = %name, "Receive loop stopped");
}

// ============================================================================
// Tests
// ============================================================================
