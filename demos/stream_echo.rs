//! Diagnostic exchange over a local TCP stream.
//!
//! Demonstrates:
//! - Serving a minimal fake ECU on a loopback TCP socket
//! - Connecting a stream connection and opening it
//! - Request/response round trips with bounded waits
//! - Timeout handling when the ECU stays silent
//!
//! Usage:
//!   cargo run --example stream_echo
//!   cargo run --example stream_echo -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::Args;
use diaglink::{Connection, Result, WaitOutcome};

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
    println!("=== stream_echo: TCP diagnostic exchange ===\n");

    // ========================================================================
    // Serve Fake ECU
    // ========================================================================

    println!("[1] Starting fake ECU...");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let ecu = tokio::spawn(serve_ecu(listener));

    println!("    ✓ Listening on {addr}\n");

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[2] Connecting...");

    let conn = Connection::connect(addr).await?.with_name("gateway");
    conn.open().await?;

    println!("    ✓ {conn:?}\n");

    // ========================================================================
    // Session Control Round Trip
    // ========================================================================

    println!("[3] Requesting extended session...");

    let request = [0x10, 0x03];
    println!("    > {}", common::hex(&request));

    conn.send(&request).await?;
    let response = conn.expect_frame(Duration::from_secs(2)).await?;
    println!("    < {}", common::hex(&response));
    println!("    ✓ Session accepted\n");

    // ========================================================================
    // Tester Present Round Trip
    // ========================================================================

    println!("[4] Sending tester present...");

    let request = [0x3E, 0x00];
    println!("    > {}", common::hex(&request));

    conn.send(&request).await?;
    let response = conn.expect_frame(Duration::from_secs(2)).await?;
    println!("    < {}", common::hex(&response));
    println!("    ✓ ECU still there\n");

    // ========================================================================
    // Bounded Wait Without Traffic
    // ========================================================================

    println!("[5] Waiting with nothing on the wire...");

    match conn.wait_frame(Duration::from_millis(300)).await {
        WaitOutcome::TimedOut => println!("    ✓ Timed out cleanly, connection still open"),
        other => println!("    ✗ Unexpected outcome: {other:?}"),
    }
    println!();

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("[Cleanup] Closing connection...");
    conn.close().await?;
    ecu.abort();
    println!("          ✓ Done");

    Ok(())
}

// ============================================================================
// Fake ECU
// ============================================================================

/// Accepts one tester and answers requests by service byte.
async fn serve_ecu(listener: TcpListener) {
    let Ok((mut stream, _)) = listener.accept().await else {
        return;
    };

    let mut buf = [0u8; 4095];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };

        let response = respond(&buf[..n]);
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

/// Minimal UDS-flavored request handling.
fn respond(request: &[u8]) -> Vec<u8> {
    match request {
        [0x10, session, ..] => vec![0x50, *session, 0x00, 0x32, 0x01, 0xF4],
        [0x3E, 0x00, ..] => vec![0x7E, 0x00],
        [service, ..] => vec![0x7F, *service, 0x11],
        [] => vec![],
    }
}
