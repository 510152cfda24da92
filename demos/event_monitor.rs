//! Live event monitor.
//!
//! Demonstrates:
//! - Building a session from `HA_URL` / `HA_TOKEN`
//! - Subscribing to bus events, optionally of one type
//! - Collecting events for a fixed window
//! - Clean unsubscribe
//!
//! Usage:
//!   cargo run --example event_monitor
//!   cargo run --example event_monitor -- state_changed
//!   cargo run --example event_monitor -- state_changed --no-wait
//!   cargo run --example event_monitor -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use hass_session::Result;

// ============================================================================
// Constants
// ============================================================================

const COLLECT_WINDOW: Duration = Duration::from_secs(5);

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
    println!("=== Event Monitor ===\n");

    let session = common::session()?;
    let event_type = args.rest.first().map(String::as_str);

    session.connect().await?;
    println!(
        "[Connect] Home Assistant {}",
        session.ha_version().unwrap_or_else(|| "?".into())
    );
    println!("        ✓ Round trip {:?}\n", session.ping().await?);

    // ========================================================================
    // Collect for a fixed window
    // ========================================================================

    println!(
        "[Collect] {} for {COLLECT_WINDOW:?}...",
        event_type.unwrap_or("all events")
    );
    let events = session.collect_events(event_type, COLLECT_WINDOW).await?;
    println!("        ✓ {} events", events.len());
    for event in events.iter().take(10) {
        println!(
            "          {} {}",
            event.event_type,
            event.entity_id().unwrap_or("")
        );
    }
    println!();

    // ========================================================================
    // Stream until Ctrl+C
    // ========================================================================

    println!("[Stream] Printing events as they arrive");
    let handle = session
        .subscribe_events(event_type, |event| match event.new_state() {
            Some(state) => println!("          {} → {}", state.entity_id, state.state),
            None => println!("          {}", event.event_type),
        })
        .await?;

    common::wait_for_exit(args.no_wait).await;

    println!(
        "\n[Unsubscribe] {} events delivered",
        handle.delivered()
    );
    handle.unsubscribe().await?;
    session.close();

    println!("\n=== Done ===");
    Ok(())
}
