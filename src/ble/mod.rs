//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy plumbing for discovering
//! and talking to lamps.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use characteristics::{CharacteristicHandler, CharacteristicIo, NotificationEvent};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, LampLink};
pub use scanner::{Advertisement, LampScanner, ScanBackend, ScanEvent, ScanResult, ScanResults};
pub use uuids::*;
