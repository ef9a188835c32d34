//! Two connections wired back-to-back in memory.
//!
//! Demonstrates:
//! - Building an in-memory link pair, no hardware or network
//! - Running tester and ECU as two full connections
//! - Draining a receive queue between exchanges
//! - Fault observation when the peer goes away
//!
//! Usage:
//!   cargo run --example link_pair
//!   cargo run --example link_pair -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use diaglink::{IsoTpAddress, IsoTpConnection, MemoryLink, Result, WaitOutcome};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== link_pair: in-memory tester/ECU ===\n");

    // ========================================================================
    // Wire the Pair
    // ========================================================================

    println!("[1] Wiring link pair...");

    let (tester_link, ecu_link) = MemoryLink::pair();
    let tester = IsoTpConnection::bind_with(tester_link, IsoTpAddress::new("vcan0", 0x7E0, 0x7E8))
        .with_name("tester");
    let ecu = IsoTpConnection::bind_with(ecu_link, IsoTpAddress::new("vcan0", 0x7E8, 0x7E0))
        .with_name("ecu");

    tester.open().await?;
    ecu.open().await?;

    println!("    ✓ {tester:?}");
    println!("    ✓ {ecu:?}\n");

    // ========================================================================
    // Start ECU Responder
    // ========================================================================

    println!("[2] Starting ECU responder...");

    let ecu_task = tokio::spawn(async move {
        loop {
            match ecu.wait_frame(Duration::from_millis(500)).await {
                WaitOutcome::Frame(request) => {
                    let response = respond(&request);
                    if ecu.send(&response).await.is_err() {
                        break;
                    }
                }
                WaitOutcome::TimedOut => continue,
                WaitOutcome::NotOpen | WaitOutcome::Faulted => break,
            }
        }
        ecu.close().await.ok();
        println!("    [ecu] peer gone, responder stopped");
    });

    println!("    ✓ Responder running\n");

    // ========================================================================
    // Conversation
    // ========================================================================

    println!("[3] Running a conversation...");

    for request in [
        vec![0x10, 0x03],
        vec![0x3E, 0x00],
        vec![0x22, 0xF1, 0x90],
        vec![0x27, 0x01],
    ] {
        println!("    > {}", common::hex(&request));
        tester.send(&request).await?;
        let response = tester.expect_frame(Duration::from_secs(2)).await?;
        println!("    < {}", common::hex(&response));
    }
    println!("    ✓ Four round trips\n");

    // ========================================================================
    // Drain Between Exchanges
    // ========================================================================

    println!("[4] Draining unread responses...");

    tester.send(&[0x3E, 0x00]).await?;
    tester.send(&[0x3E, 0x00]).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let dropped = tester.drain();
    println!("    ✓ Dropped {dropped} queued frame(s)\n");

    // ========================================================================
    // Fault on Peer Loss
    // ========================================================================

    println!("[5] Closing tester, ECU should fault...");

    tester.close().await?;
    ecu_task.await.ok();
    println!("    ✓ Fault propagated\n");

    println!("=== Done ===");
    Ok(())
}

// ============================================================================
// ECU Behavior
// ============================================================================

/// Minimal UDS-flavored request handling.
fn respond(request: &[u8]) -> Vec<u8> {
    match request {
        [0x10, session, ..] => vec![0x50, *session, 0x00, 0x32, 0x01, 0xF4],
        [0x3E, 0x00, ..] => vec![0x7E, 0x00],
        [0x22, high, low, ..] => vec![0x62, *high, *low, 0x57, 0x30, 0x4C],
        [service, ..] => vec![0x7F, *service, 0x11],
        [] => vec![],
    }
}
