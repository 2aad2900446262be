//! Socket table round trip against a local echo server.
//!
//! Demonstrates:
//! - Opening client and server stream sockets
//! - Accepting a peer and echoing through the server socket
//! - Current-socket reselection on close
//! - Data mode on the client socket
//!
//! Usage:
//!   cargo run --example 001_socket_echo
//!   cargo run --example 001_socket_echo -- --no-wait
//!   cargo run --example 001_socket_echo -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use cellsock::{Command, Modem, Reply, Result};
use common::Args;

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
    println!("=== 001: Socket Echo ===\n");

    let (mut modem, mut notifications) = Modem::builder().build()?;

    // Server socket
    println!("[1] Opening server socket...");
    let server = exec(
        &mut modem,
        r#"{"op":"open","type":"stream","role":"server"}"#,
    )
    .await?;
    exec(&mut modem, r#"{"op":"bind","port":0}"#).await?;
    let Reply::Listening { addr } = exec(&mut modem, r#"{"op":"listen"}"#).await? else {
        unreachable!("listen replies with its address");
    };
    println!("    Listening on {addr}");

    // Client socket
    println!("[2] Connecting client socket...");
    exec(
        &mut modem,
        r#"{"op":"open","type":"stream","role":"client"}"#,
    )
    .await?;
    let connect = format!(r#"{{"op":"connect","host":"127.0.0.1","port":{}}}"#, addr.port());
    exec(&mut modem, &connect).await?;
    exec(&mut modem, r#"{"op":"send","data":"PING"}"#).await?;

    // Echo through the server socket
    println!("[3] Accepting and echoing...");
    let Reply::Opened { id: server } = server else {
        unreachable!("open replies with the identity");
    };
    exec(&mut modem, &format!(r#"{{"op":"select","id":{server}}}"#)).await?;
    exec(&mut modem, r#"{"op":"accept","timeoutMs":2000}"#).await?;
    let Reply::Received { data } =
        exec(&mut modem, r#"{"op":"receive","timeoutMs":2000}"#).await?
    else {
        unreachable!("receive replies with data");
    };
    let echo = format!(
        r#"{{"op":"send","data":"{}"}}"#,
        String::from_utf8_lossy(&data)
    );
    exec(&mut modem, &echo).await?;

    // Close the server; the client becomes current again
    println!("[4] Closing server socket...");
    exec(&mut modem, r#"{"op":"close"}"#).await?;
    exec(&mut modem, r#"{"op":"receive","timeoutMs":2000}"#).await?;

    // Data mode
    println!("[5] Data mode on the client...");
    exec(&mut modem, r#"{"op":"send"}"#).await?;
    let written = modem.forward(b"raw bytes").await?;
    println!("    Forwarded {written} bytes");
    exec(&mut modem, r#"{"op":"dataModeExit"}"#).await?;

    exec(&mut modem, r#"{"op":"list"}"#).await?;
    common::watch(&mut notifications, args.no_wait).await;

    println!("\n=== Done ===");
    Ok(())
}

/// Parses and executes one command, printing the reply.
async fn exec(modem: &mut Modem, json: &str) -> Result<Reply> {
    let command = Command::from_json(json)?;
    let op = command.name();
    let reply = modem.execute(command).await?;
    println!("    {op:<8} -> {}", serde_json::to_string(&reply)?);
    Ok(reply)
}
