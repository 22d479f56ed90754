//! BLE connection management.
//!
//! Tracks the connect/disconnect lifecycle of the single lamp peripheral.

use async_trait::async_trait;
use btleplug::api::Peripheral as BlePeripheral;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::ble::characteristics::{CharacteristicHandler, CharacteristicIo};
use crate::ble::uuids::{is_lamp_service, LAMP_SERVICE_UUID};
use crate::error::{Error, Result};

/// Link-level operations on one lamp peripheral.
///
/// Implemented for the platform [`Peripheral`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LampLink: Send + Sync {
    /// Platform identifier of the peripheral.
    fn identifier(&self) -> String;

    /// Open the link.
    async fn connect(&self) -> Result<()>;

    /// Discover the GATT services.
    async fn discover_services(&self) -> Result<()>;

    /// Whether the discovered services include the lamp service.
    fn has_lamp_service(&self) -> bool;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// Characteristic access for the lamp service. Needs discovered services.
    fn open_characteristics(&self) -> Result<Arc<dyn CharacteristicIo>>;
}

#[async_trait]
impl LampLink for Peripheral {
    fn identifier(&self) -> String {
        self.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        BlePeripheral::connect(self).await?;
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        BlePeripheral::discover_services(self).await?;
        Ok(())
    }

    fn has_lamp_service(&self) -> bool {
        self.services().iter().any(|s| is_lamp_service(&s.uuid))
    }

    async fn disconnect(&self) -> Result<()> {
        BlePeripheral::disconnect(self).await?;
        Ok(())
    }

    fn open_characteristics(&self) -> Result<Arc<dyn CharacteristicIo>> {
        let handler = CharacteristicHandler::new(self.clone());
        handler.discover_characteristics()?;
        Ok(Arc::new(handler))
    }
}

/// Connection state for a lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the lamp.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and the lamp service was discovered.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The identifier of the peripheral.
    pub identifier: String,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Shared state machine behind [`ConnectionManager`].
#[derive(Debug)]
pub(crate) struct StateCell {
    identifier: String,
    state: RwLock<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl StateCell {
    pub(crate) fn new(identifier: String) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            identifier,
            state: RwLock::new(ConnectionState::Disconnected),
            event_tx,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Move from `Disconnected` to `Connecting`.
    ///
    /// Returns `Ok(false)` when already connected.
    pub(crate) fn begin_connect(&self) -> Result<bool> {
        let mut state = self.state.write();
        let current = *state;
        match current {
            ConnectionState::Connected => Ok(false),
            s if s.is_transitioning() => Err(Error::ConnectionFailed {
                reason: format!("connection already {}", s.to_string().to_lowercase()),
            }),
            _ => {
                *state = ConnectionState::Connecting;
                drop(state);
                self.notify(current, ConnectionState::Connecting);
                Ok(true)
            }
        }
    }

    /// Update the state and emit an event if it changed.
    pub(crate) fn set(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        self.notify(old_state, new_state);
    }

    fn notify(&self, old_state: ConnectionState, new_state: ConnectionState) {
        if old_state != new_state {
            debug!(
                "{}: connection state changed: {} -> {}",
                self.identifier, old_state, new_state
            );

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: self.identifier.clone(),
                state: new_state,
            });
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }
}

/// Manages the connection to one lamp.
pub struct ConnectionManager {
    /// The link to manage.
    link: Arc<dyn LampLink>,
    /// Connection state machine.
    state: StateCell,
}

impl ConnectionManager {
    /// Create a new connection manager for a peripheral link.
    pub fn new(link: Arc<dyn LampLink>) -> Self {
        let identifier = link.identifier();

        Self {
            link,
            state: StateCell::new(identifier),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.state.subscribe()
    }

    /// Get the underlying link.
    pub fn link(&self) -> &Arc<dyn LampLink> {
        &self.link
    }

    /// Connect to the lamp and discover its services.
    ///
    /// This makes a single attempt. The link ends up `Connected` only if the
    /// lamp service is present.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if a connection is already in progress or
    /// the link cannot be established, and `ServiceNotFound` if the device is
    /// not a lamp.
    pub async fn connect(&self) -> Result<()> {
        if !self.state.begin_connect()? {
            debug!("Already connected");
            return Ok(());
        }

        if let Err(e) = self.link.connect().await {
            warn!("Connection attempt failed: {}", e);
            self.state.set(ConnectionState::Disconnected);
            return Err(Error::ConnectionFailed {
                reason: e.to_string(),
            });
        }

        if let Err(e) = self.link.discover_services().await {
            warn!("Failed to discover services: {}", e);
            self.abandon().await;
            return Err(Error::ConnectionFailed {
                reason: format!("service discovery failed: {}", e),
            });
        }

        if !self.link.has_lamp_service() {
            warn!("Peripheral has no lamp service");
            self.abandon().await;
            return Err(Error::ServiceNotFound {
                uuid: LAMP_SERVICE_UUID.to_string(),
            });
        }

        info!("Successfully connected to lamp");
        self.state.set(ConnectionState::Connected);

        Ok(())
    }

    /// Disconnect from the lamp.
    pub async fn disconnect(&self) -> Result<()> {
        let current_state = self.state();

        if matches!(
            current_state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.state.set(ConnectionState::Disconnecting);

        let result = self.link.disconnect().await;
        self.state.set(ConnectionState::Disconnected);

        match result {
            Ok(_) => {
                info!("Successfully disconnected from lamp");
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(e)
            }
        }
    }

    /// Handle a disconnection reported by the adapter.
    pub fn handle_disconnection(&self) {
        if self.state() != ConnectionState::Disconnected {
            info!("Connection to lamp lost");
        }
        self.state.set(ConnectionState::Disconnected);
    }

    /// Drop a half-open link after a failed setup.
    async fn abandon(&self) {
        if let Err(e) = self.link.disconnect().await {
            debug!("Disconnect after failed setup: {}", e);
        }
        self.state.set(ConnectionState::Disconnected);
    }
}
