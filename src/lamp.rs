//! Lamp struct and methods.
//!
//! Represents the GATT surface of a single connected lamp.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicIo;
use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run `on_value` for every value received on `rx` until the handle is
    /// dropped or the channel closes.
    ///
    /// A slow callback that falls behind skips the values it missed and
    /// keeps receiving.
    pub(crate) fn listen<T, F>(id: u64, mut rx: broadcast::Receiver<T>, mut on_value: F) -> Self
    where
        T: Clone + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => on_value(value),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Callback {} fell behind, skipped {} values", id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self::new(id, move || {
            handle.abort();
        })
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Value written to the toggle characteristic.
const TOGGLE_COMMAND: &[u8] = b"1";

/// Longest device name the firmware accepts, in bytes.
pub const MAX_DEVICE_NAME_LEN: usize = 20;

/// Parse the payload of an LED state notification.
///
/// The lamp sends `"1"` for on and `"0"` for off. Trailing whitespace and
/// NUL padding are ignored.
pub fn parse_led_state(data: &[u8]) -> Result<bool> {
    let text = std::str::from_utf8(data).map_err(|_| Error::InvalidData {
        context: format!("LED state is not UTF-8: {:02X?}", data),
    })?;

    match text.trim_end_matches('\0').trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(Error::InvalidData {
            context: format!("unexpected LED state {:?}", other),
        }),
    }
}

/// A connected lamp.
pub struct Lamp {
    /// BLE identifier.
    identifier: String,
    /// Characteristic access.
    io: Arc<dyn CharacteristicIo>,
    /// Last LED state reported by the lamp.
    led_state: Arc<RwLock<Option<bool>>>,
    /// LED state update channel.
    led_state_tx: broadcast::Sender<bool>,
    /// Notification processing task.
    notify_handle: RwLock<Option<JoinHandle<()>>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl std::fmt::Debug for Lamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lamp")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Lamp {
    /// Create a lamp over its characteristics.
    pub fn new(identifier: impl Into<String>, io: Arc<dyn CharacteristicIo>) -> Self {
        let (led_state_tx, _) = broadcast::channel(16);

        Self {
            identifier: identifier.into(),
            io,
            led_state: Arc::new(RwLock::new(None)),
            led_state_tx,
            notify_handle: RwLock::new(None),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Get the BLE identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    // === LED ===

    /// Toggle the LED.
    ///
    /// # Errors
    ///
    /// Returns `CharacteristicNotFound` if the lamp has no toggle characteristic.
    pub async fn toggle_led(&self) -> Result<()> {
        self.write_utf8(&TOGGLE_LED_UUID, TOGGLE_COMMAND).await
    }

    /// Last LED state reported through notifications.
    pub fn led_state(&self) -> Option<bool> {
        *self.led_state.read()
    }

    /// Subscribe to LED state updates.
    pub fn subscribe_led_state(&self) -> broadcast::Receiver<bool> {
        self.led_state_tx.subscribe()
    }

    /// Register a callback for LED state updates.
    pub fn on_led_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        CallbackHandle::listen(callback_id, self.led_state_tx.subscribe(), callback)
    }

    /// Subscribe to LED state notifications from the lamp.
    ///
    /// # Errors
    ///
    /// Returns `CharacteristicNotFound` if the lamp does not notify its state.
    pub async fn enable_state_notifications(&self) -> Result<()> {
        self.require(&LED_STATE_UUID)?;

        if self.notify_handle.read().is_some() {
            return Ok(());
        }

        // Take the receiver first so the initial notification is not missed
        let mut rx = self.io.subscribe_notifications();
        self.io.subscribe(&LED_STATE_UUID).await?;

        let led_state = self.led_state.clone();
        let led_state_tx = self.led_state_tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Dropped {} notifications", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if event.characteristic_uuid != LED_STATE_UUID {
                    continue;
                }

                match parse_led_state(&event.data) {
                    Ok(is_on) => {
                        debug!("LED state notification: {}", is_on);
                        *led_state.write() = Some(is_on);
                        let _ = led_state_tx.send(is_on);
                    }
                    Err(e) => warn!("Ignoring LED state notification: {}", e),
                }
            }

            debug!("LED state handler stopped");
        });

        *self.notify_handle.write() = Some(handle);

        info!("LED state notifications enabled for {}", self.identifier);

        Ok(())
    }

    // === Device info ===

    /// Read the number of times the LED was toggled.
    pub async fn read_count(&self) -> Result<u32> {
        let text = self.read_string(&GET_COUNT_UUID).await?;
        text.trim_end_matches('\0')
            .trim()
            .parse()
            .map_err(|_| Error::InvalidData {
                context: format!("invalid toggle count {:?}", text),
            })
    }

    /// Change the name the lamp advertises.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an empty name or one longer than
    /// [`MAX_DEVICE_NAME_LEN`] bytes.
    pub async fn set_device_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_DEVICE_NAME_LEN {
            return Err(Error::InvalidParameter {
                name: "device_name".to_string(),
                value: name.to_string(),
            });
        }

        self.write_utf8(&DEVICE_NAME_UUID, name.as_bytes()).await
    }

    /// Read the Wi-Fi configuration stored on the lamp.
    pub async fn read_wifi_config(&self) -> Result<String> {
        self.read_string(&WIFI_CONFIG_UUID).await
    }

    /// Store a Wi-Fi configuration on the lamp.
    pub async fn write_wifi_config(&self, value: &str) -> Result<()> {
        self.write_utf8(&WIFI_CONFIG_UUID, value.as_bytes()).await
    }

    fn require(&self, uuid: &Uuid) -> Result<()> {
        if self.io.has_characteristic(uuid) {
            Ok(())
        } else {
            error!("Characteristic {} not found on {}", uuid, self.identifier);
            Err(Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
        }
    }

    async fn write_utf8(&self, uuid: &Uuid, value: &[u8]) -> Result<()> {
        self.require(uuid)?;

        info!(
            "Writing {:?} to characteristic {}",
            String::from_utf8_lossy(value),
            uuid
        );

        self.io.write(uuid, value, true).await
    }

    async fn read_string(&self, uuid: &Uuid) -> Result<String> {
        self.require(uuid)?;

        let data = self.io.read(uuid).await?;
        String::from_utf8(data).map_err(|_| Error::InvalidData {
            context: format!("Invalid UTF-8 in characteristic {}", uuid),
        })
    }
}

impl Drop for Lamp {
    fn drop(&mut self) {
        if let Some(handle) = self.notify_handle.write().take() {
            handle.abort();
        }
    }
}
