// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # lumos-ble
//!
//! A cross-platform Rust library for finding and controlling Lumos lamps
//! (ESP32 boards exposing a small custom GATT service) over Bluetooth Low
//! Energy.
//!
//! ## Features
//!
//! - **Lamp Discovery**: Timed scans filtered on the lamp service, with
//!   results deduplicated by device address
//! - **Connection Lifecycle**: Connecting / connected / disconnected tracking
//!   for a single active lamp
//! - **LED Control**: Toggle the LED and follow its reported state
//! - **Lamp Settings**: In-memory color, brightness and on/off state for a UI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lumos_ble::{LampController, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller = LampController::new().await?;
//!     controller.start_scan().await?;
//!
//!     // Wait for lamps to be discovered
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(result) = controller.scan_results().first() {
//!         println!("Connecting to {}", result.display_name());
//!         controller.connect(&result.address).await?;
//!         controller.toggle_led().await?;
//!     }
//!
//!     controller.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. Lamp addresses are CoreBluetooth
//! UUIDs rather than BD addresses.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod data;
pub mod error;
pub mod lamp;
pub mod utils;

// Re-exports for convenience
pub use config::ScanConfig;
pub use controller::{ControllerEvent, LampCentral, LampController};
pub use error::{Error, Result};
pub use lamp::{CallbackHandle, Lamp};
pub use utils::{brightness_to_byte, color_at_wheel_point, hsv_to_rgb};

// Re-export commonly used types from submodules
pub use ble::connection::ConnectionState;
pub use ble::scanner::{LampScanner, ScanEvent, ScanResult};
pub use data::{Color, LightBulb};
