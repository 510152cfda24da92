//! Service calls and state queries.
//!
//! Demonstrates:
//! - Reading the core configuration and all entity states
//! - Calling a service against an entity
//! - Reading the entity back
//! - Handling upstream errors
//!
//! Usage:
//!   cargo run --example service_call -- light.kitchen
//!   cargo run --example service_call -- light.kitchen --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use hass_session::{Error, Result, Target};

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
    println!("=== Service Call ===\n");

    let session = common::session()?;

    // ========================================================================
    // Inspect the instance
    // ========================================================================

    let config = session.get_config().await?;
    println!("[Config] {} ({})", config.location_name, config.version);

    let states = session.get_states().await?;
    println!("[States] {} entities", states.len());

    let services = session.get_services().await?;
    println!("[Services] {} domains\n", services.len());

    let Some(entity_id) = args.rest.first() else {
        println!("No entity given; pass one to toggle it.");
        return Ok(());
    };

    // ========================================================================
    // Toggle the entity
    // ========================================================================

    let before = session.get_state(entity_id).await?;
    let Some(before) = before else {
        return Err(Error::invalid_argument(format!("unknown entity {entity_id}")));
    };
    println!("[Before] {entity_id} = {}", before.state);

    match session
        .call_service(
            before.domain(),
            "toggle",
            None,
            Some(Target::entity(entity_id.as_str())),
        )
        .await
    {
        Ok(_) => println!("        ✓ toggled"),
        Err(Error::Remote { code, message }) => println!("        ✗ {code}: {message}"),
        Err(e) => return Err(e),
    }

    if let Some(after) = session.get_state(entity_id).await? {
        println!("[After] {entity_id} = {}", after.state);
    }

    session.close();
    println!("\n=== Done ===");
    Ok(())
}
