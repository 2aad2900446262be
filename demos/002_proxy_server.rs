//! Proxy server session with notifications.
//!
//! Demonstrates:
//! - Starting a proxy server on a port
//! - Restricting peers with the allow-list
//! - Watching peer and data notifications
//! - Stopping the session
//!
//! Usage:
//!   cargo run --example 002_proxy_server
//!   cargo run --example 002_proxy_server -- --no-wait
//!   cargo run --example 002_proxy_server -- --debug
//!
//! While it runs, connect with e.g. `nc 127.0.0.1 3442` and type.

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};

use cellsock::{Command, Config, Modem, Reply, Result, ServerParams};
use common::Args;

// ============================================================================
// Constants
// ============================================================================

const PORT: u16 = 3442;
const IDLE_TIMEOUT_MS: u64 = 60_000;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 002: Proxy Server ===\n");

    let (mut modem, mut notifications) = Modem::builder()
        .config(Config::new().with_proxy_idle_timeout_ms(IDLE_TIMEOUT_MS))
        .build()?;

    println!("[1] Restricting peers to loopback...");
    modem
        .execute(Command::SetAllowlist {
            addrs: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        })
        .await?;

    println!("[2] Starting proxy server...");
    let reply = modem
        .execute(Command::ProxyServerStart(ServerParams::new(PORT)))
        .await?;
    if let Reply::ProxyStarted { addr } = reply {
        println!("    Listening on {addr}");
    }

    println!("[3] Watching notifications...");
    common::watch(&mut notifications, args.no_wait).await;

    println!("[4] Stopping proxy server...");
    if let Reply::ProxyStatus {
        status: Some(status),
    } = modem.execute(Command::ProxyStatus).await?
    {
        println!("    Status: {}", serde_json::to_string(&status)?);
    }
    modem.execute(Command::ProxyStop).await?;
    while let Some(notification) = notifications.try_recv() {
        common::print_notification(&notification);
    }

    println!("\n=== Done ===");
    Ok(())
}
