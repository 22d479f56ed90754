//! Basic example: Discover nearby lamps
//!
//! Run with: cargo run --example scan_lamps

use lumos_ble::{LampController, Result, ScanEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lumos_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Scanning for Lumos lamps...\n");

    let controller = LampController::new().await?;
    let mut events = controller.subscribe_scan();

    // Print the list every time a new lamp shows up
    let _handle = controller.on_scan_results(|results| {
        println!("\n{} lamp(s):", results.len());
        for result in &results {
            println!(
                "  {} - {} (RSSI: {:?} dBm)",
                result.display_name(),
                result.address,
                result.rssi
            );
        }
    });

    controller.start_scan().await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ScanEvent::Stopped { timed_out }) => {
                    if timed_out {
                        println!("\nScan finished.");
                    }
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted!");
                controller.stop_scan().await?;
                break;
            }
        }
    }

    println!("Total lamps found: {}", controller.scan_results().len());

    controller.shutdown().await?;
    Ok(())
}
