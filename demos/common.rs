//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - Notification printing

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use cellsock::{Notification, Notifications};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    pub no_wait: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "cellsock=debug"
    } else {
        "cellsock=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Print a notification as its JSON wire form.
pub fn print_notification(notification: &Notification) {
    match serde_json::to_string(notification) {
        Ok(json) => println!("        [{}] {json}", notification.name()),
        Err(e) => println!("        [{}] <unprintable: {e}>", notification.name()),
    }
}

/// Print notifications until Ctrl+C, or drain what is queued with `--no-wait`.
pub async fn watch(notifications: &mut Notifications, no_wait: bool) {
    if no_wait {
        println!("[--no-wait] Draining queued notifications");
        while let Some(notification) = notifications.try_recv() {
            print_notification(&notification);
        }
        return;
    }

    println!("Press Ctrl+C to exit...");
    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(notification) => print_notification(&notification),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}
