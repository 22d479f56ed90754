//! Lamp control example
//!
//! Scans for lamps, connects to the first one found (or the one given with
//! `--address`), then toggles the LED and follows its reported state.
//!
//! Run with: cargo run --example lamp_control
//!
//! To connect to a specific lamp:
//!   cargo run --example lamp_control -- --address AA:BB:CC:DD:EE:FF

use lumos_ble::{Color, Error, LampController, Result, ScanEvent};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,lumos_ble=info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    let target = args
        .iter()
        .position(|arg| arg == "--address")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let controller = LampController::new().await?;
    let mut scan_events = controller.subscribe_scan();
    controller.start_scan().await?;

    // Wait for the wanted lamp, or the end of the scan
    let address = loop {
        match scan_events.recv().await {
            Ok(ScanEvent::ResultsChanged(results)) => {
                let found = results.iter().find(|r| match &target {
                    Some(address) => r.address.eq_ignore_ascii_case(address),
                    None => true,
                });
                if let Some(result) = found {
                    break result.address.clone();
                }
            }
            Ok(ScanEvent::Stopped { .. }) | Err(_) => {
                return Err(Error::LampNotFound {
                    address: target.unwrap_or_else(|| "any".to_string()),
                });
            }
            Ok(ScanEvent::Started) => {}
        }
    };

    println!("Connecting to {}...", address);
    let lamp = controller.connect(&address).await?;

    let _handle = lamp.on_led_state_changed(|is_on| {
        println!("  Lamp reports LED {}", if is_on { "ON" } else { "OFF" });
    });

    match lamp.read_count().await {
        Ok(count) => println!("Toggle count: {}", count),
        Err(e) => println!("Toggle count unavailable: {}", e),
    }

    for on in [true, false, true] {
        println!("Switching LED {}", if on { "on" } else { "off" });
        controller.set_led(on).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    controller.update_color(Color::new(255, 180, 60));
    controller.update_brightness(75.0)?;
    let settings = controller.light_bulb();
    println!(
        "\nSettings: {} color={} brightness={:.0}% on={}",
        settings.name, settings.color, settings.brightness, settings.is_led_on
    );

    controller.shutdown().await?;
    println!("Done!");

    Ok(())
}
