//! GATT characteristic handling.
//!
//! Provides functionality for reading, writing, and subscribing to
//! BLE characteristics on the lamp.

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::ble::uuids::{is_lamp_service, LAMP_SERVICE_UUID};
use crate::error::{Error, Result};

/// Notification event from a characteristic.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

/// Read/write access to the characteristics of a connected lamp.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CharacteristicIo: Send + Sync {
    /// Check if a characteristic exists.
    fn has_characteristic(&self, uuid: &Uuid) -> bool;

    /// Read a characteristic value.
    async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>>;

    /// Write to a characteristic.
    async fn write(&self, uuid: &Uuid, data: &[u8], with_response: bool) -> Result<()>;

    /// Enable notifications for a characteristic.
    async fn subscribe(&self, uuid: &Uuid) -> Result<()>;

    /// Get a receiver for notification events.
    fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent>;
}

/// Handler for the lamp service characteristics on a peripheral.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    /// Channel for notification events.
    notification_tx: broadcast::Sender<NotificationEvent>,
    /// Handle to the notification listener task.
    listener_handle: RwLock<Option<JoinHandle<()>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        let (notification_tx, _) = broadcast::channel(64);

        Self {
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
            notification_tx,
            listener_handle: RwLock::new(None),
        }
    }

    /// Discover and cache the characteristics of the lamp service.
    ///
    /// This should be called after connecting and discovering services.
    ///
    /// # Errors
    ///
    /// Returns `ServiceNotFound` if the peripheral has no lamp service.
    pub fn discover_characteristics(&self) -> Result<()> {
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| is_lamp_service(&s.uuid))
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: LAMP_SERVICE_UUID.to_string(),
            })?;

        let mut chars = self.characteristics.write();
        chars.clear();

        for characteristic in service.characteristics {
            debug!(
                "Found characteristic: {} ({:?})",
                characteristic.uuid, characteristic.properties
            );
            chars.insert(characteristic.uuid, characteristic);
        }

        debug!("Discovered {} lamp characteristics", chars.len());

        Ok(())
    }

    /// Get a characteristic by UUID.
    pub fn get_characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Start forwarding notifications to the broadcast channel.
    pub async fn start_notifications(&self) -> Result<()> {
        if self.listener_handle.read().is_some() {
            return Ok(());
        }

        let mut notifications = self.peripheral.notifications().await?;
        let notification_tx = self.notification_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification received from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );

                let _ = notification_tx.send(NotificationEvent {
                    characteristic_uuid: notification.uuid,
                    data: notification.value,
                });
            }

            debug!("Notification stream ended");
        });

        *self.listener_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop forwarding notifications.
    pub fn stop_notifications(&self) {
        if let Some(handle) = self.listener_handle.write().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl CharacteristicIo for CharacteristicHandler {
    fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
        let characteristic = self.get_characteristic(uuid)?;

        let data = self.peripheral.read(&characteristic).await?;

        trace!("Read {} bytes from characteristic {}", data.len(), uuid);

        Ok(data)
    }

    async fn write(&self, uuid: &Uuid, data: &[u8], with_response: bool) -> Result<()> {
        let characteristic = self.get_characteristic(uuid)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(|e| {
                error!("Write to {} failed: {}", uuid, e);
                Error::Bluetooth(e)
            })?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), uuid);

        Ok(())
    }

    async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.get_characteristic(uuid)?;

        self.peripheral.subscribe(&characteristic).await?;
        self.start_notifications().await?;

        debug!("Subscribed to notifications from {}", uuid);

        Ok(())
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notification_tx.subscribe()
    }
}

impl Drop for CharacteristicHandler {
    fn drop(&mut self) {
        self.stop_notifications();
    }
}
