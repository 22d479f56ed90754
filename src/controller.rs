//! Lamp controller for scanning, connecting to, and driving one lamp.
//!
//! The controller holds everything a settings screen binds to: the scan
//! list, the connection state of the single active lamp, and the in-memory
//! [`LightBulb`] settings.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::Adapter;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::connection::{ConnectionManager, ConnectionState, LampLink};
use crate::ble::scanner::{default_adapter, LampScanner, ScanEvent, ScanResult};
use crate::config::ScanConfig;
use crate::data::{Color, LightBulb};
use crate::error::{Error, Result};
use crate::lamp::{CallbackHandle, Lamp};

/// Event emitted when the active lamp changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A connection attempt started.
    Connecting {
        /// Lamp address.
        address: String,
    },
    /// The lamp is connected and ready.
    Connected {
        /// Lamp address.
        address: String,
    },
    /// The lamp disconnected.
    Disconnected {
        /// Lamp address.
        address: String,
    },
    /// The connection attempt failed.
    ConnectFailed {
        /// Lamp address.
        address: String,
        /// Why it failed.
        reason: String,
    },
}

impl ControllerEvent {
    /// The lamp the event is about.
    pub fn address(&self) -> &str {
        match self {
            Self::Connecting { address }
            | Self::Connected { address }
            | Self::Disconnected { address }
            | Self::ConnectFailed { address, .. } => address,
        }
    }
}

/// Adapter-level lookups the controller needs.
///
/// Implemented for the platform [`Adapter`].
#[async_trait]
pub trait LampCentral: Send + Sync {
    /// Find a peripheral the adapter has seen by its address.
    async fn find_lamp(&self, address: &str) -> Result<Arc<dyn LampLink>>;

    /// Stream of addresses reported as disconnected.
    async fn disconnections(&self) -> Result<BoxStream<'static, String>>;
}

#[async_trait]
impl LampCentral for Adapter {
    async fn find_lamp(&self, address: &str) -> Result<Arc<dyn LampLink>> {
        let peripheral = self
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == address)
            .ok_or_else(|| Error::LampNotFound {
                address: address.to_string(),
            })?;

        Ok(Arc::new(peripheral))
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, String>> {
        let events = self.events().await?;

        let stream = events.filter_map(|event| async move {
            match event {
                CentralEvent::DeviceDisconnected(id) => Some(id.to_string()),
                _ => None,
            }
        });

        Ok(stream.boxed())
    }
}

/// The lamp currently selected by the controller.
struct ActiveLamp {
    address: String,
    connection: Arc<ConnectionManager>,
    lamp: Option<Arc<Lamp>>,
    watcher: Option<JoinHandle<()>>,
}

/// Central controller for a single lamp.
pub struct LampController {
    /// Peripheral lookup and disconnect reports.
    central: Arc<dyn LampCentral>,
    /// Timed scanner.
    scanner: Arc<LampScanner>,
    /// The active lamp, if any.
    active: Arc<RwLock<Option<ActiveLamp>>>,
    /// Held for the whole of a connect or disconnect.
    link_lock: Mutex<()>,
    /// Settings shown on the lamp screen.
    light_bulb: RwLock<LightBulb>,
    /// Controller event channel.
    event_tx: broadcast::Sender<ControllerEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl LampController {
    /// Create a controller on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let adapter = default_adapter().await?;
        Self::with_adapter(adapter, ScanConfig::default())
    }

    /// Create a controller with a specific adapter and scan settings.
    pub fn with_adapter(adapter: Adapter, config: ScanConfig) -> Result<Self> {
        let scanner = LampScanner::with_adapter(adapter.clone(), config)?;
        Ok(Self::with_parts(Arc::new(adapter), scanner))
    }

    /// Create a controller from a peripheral source and a scanner.
    pub fn with_parts(central: Arc<dyn LampCentral>, scanner: LampScanner) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            central,
            scanner: Arc::new(scanner),
            active: Arc::new(RwLock::new(None)),
            link_lock: Mutex::new(()),
            light_bulb: RwLock::new(LightBulb::default()),
            event_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Scanning ===

    /// Start a timed scan for lamps. Does nothing if one is running.
    pub async fn start_scan(&self) -> Result<()> {
        self.scanner.start_scan().await
    }

    /// Cancel the running scan.
    pub async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop_scan().await
    }

    /// Empty the scan list.
    pub fn clear_results(&self) {
        self.scanner.clear_results();
    }

    /// Get the scan list in discovery order.
    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.scanner.results()
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Subscribe to scan events.
    pub fn subscribe_scan(&self) -> broadcast::Receiver<ScanEvent> {
        self.scanner.subscribe()
    }

    /// Register a callback for scan list changes.
    pub fn on_scan_results<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Vec<ScanResult>) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);

        CallbackHandle::listen(callback_id, self.scanner.subscribe(), move |event| {
            if let ScanEvent::ResultsChanged(results) = event {
                callback(results);
            }
        })
    }

    // === Connection ===

    /// Connect to the lamp with the given address.
    ///
    /// Any running scan is stopped and any previously active lamp is
    /// disconnected first. Connects and disconnects run one at a time.
    ///
    /// # Errors
    ///
    /// Returns `LampNotFound` if the adapter has never seen the address, or
    /// the error from the connection attempt.
    pub async fn connect(&self, address: &str) -> Result<Arc<Lamp>> {
        let _guard = self.link_lock.lock().await;

        if let Err(e) = self.scanner.stop_scan().await {
            warn!("Failed to stop scan before connecting: {}", e);
        }

        self.disconnect_active().await?;

        let link = self.central.find_lamp(address).await?;
        let connection = Arc::new(ConnectionManager::new(link.clone()));

        // Watch before connecting so an early drop is not missed
        let disconnections = match self.central.disconnections().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Cannot watch for disconnects: {}", e);
                None
            }
        };

        *self.active.write() = Some(ActiveLamp {
            address: address.to_string(),
            connection: connection.clone(),
            lamp: None,
            watcher: None,
        });

        info!("Connecting to lamp {}", address);
        let _ = self.event_tx.send(ControllerEvent::Connecting {
            address: address.to_string(),
        });

        let lamp = match self.establish(address, link.as_ref(), &connection).await {
            Ok(lamp) => lamp,
            Err(e) => {
                warn!("Failed to connect to lamp {}: {}", address, e);
                self.release_slot(&connection);

                let _ = self.event_tx.send(ControllerEvent::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                });

                return Err(e);
            }
        };

        let stored = match self.active.write().as_mut() {
            Some(active) if Arc::ptr_eq(&active.connection, &connection) => {
                active.lamp = Some(lamp.clone());
                true
            }
            _ => false,
        };

        if !stored {
            warn!("Lamp {} was replaced while connecting", address);
            let _ = connection.disconnect().await;
            return Err(Error::ConnectionFailed {
                reason: "connection was superseded".to_string(),
            });
        }

        info!("Connected to lamp {}", address);
        let _ = self.event_tx.send(ControllerEvent::Connected {
            address: address.to_string(),
        });

        if let Some(disconnections) = disconnections {
            let watcher =
                self.spawn_disconnect_watcher(address.to_string(), connection, disconnections);
            if let Some(active) = self.active.write().as_mut() {
                active.watcher = Some(watcher);
            }
        }

        Ok(lamp)
    }

    /// Disconnect the active lamp, if any.
    ///
    /// Waits for an in-flight connect to finish first.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.link_lock.lock().await;
        self.disconnect_active().await
    }

    /// Get the connection state of the active lamp.
    pub fn connection_state(&self) -> ConnectionState {
        self.active
            .read()
            .as_ref()
            .map(|a| a.connection.state())
            .unwrap_or_default()
    }

    /// Check if a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        self.connection_state().is_connecting()
    }

    /// Check if a lamp is connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Get the connected lamp.
    pub fn lamp(&self) -> Option<Arc<Lamp>> {
        self.active
            .read()
            .as_ref()
            .filter(|a| a.connection.is_connected())
            .and_then(|a| a.lamp.clone())
    }

    /// Get the address of the active lamp.
    pub fn active_address(&self) -> Option<String> {
        self.active.read().as_ref().map(|a| a.address.clone())
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for controller events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ControllerEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        CallbackHandle::listen(callback_id, self.event_tx.subscribe(), callback)
    }

    // === Lamp control ===

    /// Toggle the LED of the connected lamp.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if no lamp is connected.
    pub async fn toggle_led(&self) -> Result<()> {
        let lamp = self.lamp().ok_or(Error::NotConnected)?;
        lamp.toggle_led().await
    }

    /// Switch the LED to the requested state.
    ///
    /// The lamp only exposes a toggle, so a write happens only when the
    /// recorded state differs.
    pub async fn set_led(&self, on: bool) -> Result<()> {
        if needs_toggle(self.light_bulb.read().is_led_on, on) {
            self.toggle_led().await?;
        }
        self.update_led_state(on);
        Ok(())
    }

    // === Settings ===

    /// Get a copy of the lamp settings.
    pub fn light_bulb(&self) -> LightBulb {
        self.light_bulb.read().clone()
    }

    /// Record the brightness slider position.
    pub fn update_brightness(&self, position: f32) -> Result<()> {
        self.light_bulb.write().update_brightness(position)
    }

    /// Record the selected color.
    pub fn update_color(&self, color: Color) {
        self.light_bulb.write().update_color(color);
    }

    /// Record the LED state.
    pub fn update_led_state(&self, is_on: bool) {
        self.light_bulb.write().update_led_state(is_on);
    }

    /// Stop scanning and disconnect.
    ///
    /// The lamp is disconnected even if stopping the scan fails.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down lamp controller");

        if let Err(e) = self.scanner.stop_scan().await {
            warn!("Failed to stop scan during shutdown: {}", e);
        }

        self.disconnect().await
    }

    /// Disconnect the active lamp. Callers hold `link_lock`.
    async fn disconnect_active(&self) -> Result<()> {
        let active = self.active.write().take();
        let Some(active) = active else {
            return Ok(());
        };

        if let Some(watcher) = active.watcher {
            watcher.abort();
        }

        let was_connected = active.connection.is_connected();
        let result = active.connection.disconnect().await;

        if was_connected {
            info!("Disconnected from lamp {}", active.address);
            let _ = self.event_tx.send(ControllerEvent::Disconnected {
                address: active.address,
            });
        }

        result
    }

    /// Clear the active slot if it still belongs to `connection`.
    fn release_slot(&self, connection: &Arc<ConnectionManager>) {
        let mut active = self.active.write();
        if active
            .as_ref()
            .is_some_and(|a| Arc::ptr_eq(&a.connection, connection))
        {
            active.take();
        }
    }

    async fn establish(
        &self,
        address: &str,
        link: &dyn LampLink,
        connection: &ConnectionManager,
    ) -> Result<Arc<Lamp>> {
        connection.connect().await?;

        let io = match link.open_characteristics() {
            Ok(io) => io,
            Err(e) => {
                let _ = connection.disconnect().await;
                return Err(e);
            }
        };

        let lamp = Arc::new(Lamp::new(address, io));

        if let Err(e) = lamp.enable_state_notifications().await {
            debug!("LED state notifications unavailable: {}", e);
        }

        Ok(lamp)
    }

    fn spawn_disconnect_watcher(
        &self,
        address: String,
        connection: Arc<ConnectionManager>,
        mut disconnections: BoxStream<'static, String>,
    ) -> JoinHandle<()> {
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            while let Some(id) = disconnections.next().await {
                if id == address {
                    connection.handle_disconnection();
                    let _ = event_tx.send(ControllerEvent::Disconnected { address });
                    break;
                }
            }
        })
    }
}

impl Drop for LampController {
    fn drop(&mut self) {
        if let Some(watcher) = self.active.write().as_mut().and_then(|a| a.watcher.take()) {
            watcher.abort();
        }
    }
}

/// Whether moving from `current` to `requested` needs a toggle write.
fn needs_toggle(current: bool, requested: bool) -> bool {
    current != requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::characteristics::{CharacteristicIo, MockCharacteristicIo};
    use crate::ble::scanner::test_support::FakeBackend;
    use crate::ble::uuids::TOGGLE_LED_UUID;
    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Peripheral that records link operations and LED writes.
    struct FakeLink {
        address: String,
        has_service: bool,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        writes: Arc<AtomicUsize>,
    }

    impl FakeLink {
        fn new(address: &str, has_service: bool) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_string(),
                has_service,
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                writes: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl LampLink for FakeLink {
        fn identifier(&self) -> String {
            self.address.clone()
        }

        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn discover_services(&self) -> Result<()> {
            Ok(())
        }

        fn has_lamp_service(&self) -> bool {
            self.has_service
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn open_characteristics(&self) -> Result<Arc<dyn CharacteristicIo>> {
            let writes = self.writes.clone();
            let mut io = MockCharacteristicIo::new();
            io.expect_has_characteristic()
                .returning(|uuid| *uuid == TOGGLE_LED_UUID);
            io.expect_write().returning(move |_, _, _| {
                writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(Arc::new(io))
        }
    }

    #[derive(Default)]
    struct FakeCentral {
        links: parking_lot::Mutex<HashMap<String, Arc<FakeLink>>>,
        watchers: parking_lot::Mutex<Vec<mpsc::UnboundedSender<String>>>,
    }

    impl FakeCentral {
        fn report_disconnect(&self, address: &str) {
            for tx in self.watchers.lock().iter() {
                let _ = tx.unbounded_send(address.to_string());
            }
        }
    }

    #[async_trait]
    impl LampCentral for FakeCentral {
        async fn find_lamp(&self, address: &str) -> Result<Arc<dyn LampLink>> {
            match self.links.lock().get(address) {
                Some(link) => Ok(link.clone() as Arc<dyn LampLink>),
                None => Err(Error::LampNotFound {
                    address: address.to_string(),
                }),
            }
        }

        async fn disconnections(&self) -> Result<BoxStream<'static, String>> {
            let (tx, rx) = mpsc::unbounded();
            self.watchers.lock().push(tx);
            Ok(rx.boxed())
        }
    }

    fn controller_with(
        links: &[&Arc<FakeLink>],
    ) -> (LampController, Arc<FakeCentral>, Arc<FakeBackend>) {
        let central = Arc::new(FakeCentral::default());
        for link in links {
            central
                .links
                .lock()
                .insert(link.address.clone(), Arc::clone(link));
        }

        let (backend, _tx) = FakeBackend::new();
        let scanner = LampScanner::with_backend(backend.clone(), ScanConfig::default()).unwrap();
        let controller = LampController::with_parts(central.clone(), scanner);

        (controller, central, backend)
    }

    fn drain(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn connecting(address: &str) -> ControllerEvent {
        ControllerEvent::Connecting {
            address: address.to_string(),
        }
    }

    fn connected(address: &str) -> ControllerEvent {
        ControllerEvent::Connected {
            address: address.to_string(),
        }
    }

    fn disconnected(address: &str) -> ControllerEvent {
        ControllerEvent::Disconnected {
            address: address.to_string(),
        }
    }

    #[test]
    fn test_event_address() {
        let event = ControllerEvent::ConnectFailed {
            address: "AA:BB".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(event.address(), "AA:BB");
        assert_eq!(connected("CC").address(), "CC");
    }

    #[test]
    fn test_needs_toggle() {
        assert!(needs_toggle(false, true));
        assert!(needs_toggle(true, false));
        assert!(!needs_toggle(true, true));
        assert!(!needs_toggle(false, false));
    }

    #[tokio::test]
    async fn test_connect_stops_running_scan() {
        let lamp_a = FakeLink::new("AA", true);
        let (controller, _central, backend) = controller_with(&[&lamp_a]);

        controller.start_scan().await.unwrap();
        assert!(controller.is_scanning());

        let lamp = controller.connect("AA").await.unwrap();

        assert!(!controller.is_scanning());
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
        assert!(controller.is_connected());
        assert_eq!(controller.active_address().as_deref(), Some("AA"));
        assert_eq!(lamp.identifier(), "AA");
        assert_eq!(lamp_a.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_replaces_previous_lamp() {
        let lamp_a = FakeLink::new("AA", true);
        let lamp_b = FakeLink::new("BB", true);
        let (controller, _central, _backend) = controller_with(&[&lamp_a, &lamp_b]);
        let mut events = controller.subscribe();

        controller.connect("AA").await.unwrap();
        controller.connect("BB").await.unwrap();

        assert_eq!(lamp_a.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(lamp_b.disconnects.load(Ordering::SeqCst), 0);
        assert_eq!(controller.lamp().unwrap().identifier(), "BB");
        assert_eq!(
            drain(&mut events),
            vec![
                connecting("AA"),
                connected("AA"),
                disconnected("AA"),
                connecting("BB"),
                connected("BB"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_service_fails_connect() {
        let not_a_lamp = FakeLink::new("AA", false);
        let (controller, _central, _backend) = controller_with(&[&not_a_lamp]);
        let mut events = controller.subscribe();

        let err = controller.connect("AA").await.unwrap_err();

        assert!(matches!(err, Error::ServiceNotFound { .. }));
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert!(controller.active_address().is_none());
        assert!(controller.lamp().is_none());
        // The half-open link is closed again
        assert_eq!(not_a_lamp.disconnects.load(Ordering::SeqCst), 1);

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], connecting("AA"));
        assert!(matches!(
            &events[1],
            ControllerEvent::ConnectFailed { address, .. } if address == "AA"
        ));
    }

    #[tokio::test]
    async fn test_unknown_address_is_not_found() {
        let (controller, _central, _backend) = controller_with(&[]);
        let mut events = controller.subscribe();

        let err = controller.connect("ZZ").await.unwrap_err();

        assert!(matches!(err, Error::LampNotFound { address } if address == "ZZ"));
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_led_control_requires_connection() {
        let (controller, _central, _backend) = controller_with(&[]);

        assert!(matches!(
            controller.toggle_led().await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            controller.set_led(true).await,
            Err(Error::NotConnected)
        ));
        assert!(!controller.light_bulb().is_led_on);
    }

    #[tokio::test]
    async fn test_set_led_only_writes_on_change() {
        let lamp_a = FakeLink::new("AA", true);
        let (controller, _central, _backend) = controller_with(&[&lamp_a]);
        controller.connect("AA").await.unwrap();

        controller.set_led(true).await.unwrap();
        assert_eq!(lamp_a.writes.load(Ordering::SeqCst), 1);
        assert!(controller.light_bulb().is_led_on);

        controller.set_led(true).await.unwrap();
        assert_eq!(lamp_a.writes.load(Ordering::SeqCst), 1);

        controller.set_led(false).await.unwrap();
        assert_eq!(lamp_a.writes.load(Ordering::SeqCst), 2);
        assert!(!controller.light_bulb().is_led_on);

        tokio_test::assert_ok!(controller.toggle_led().await);
        assert_eq!(lamp_a.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reported_disconnect_clears_connection() {
        let lamp_a = FakeLink::new("AA", true);
        let (controller, central, _backend) = controller_with(&[&lamp_a]);
        controller.connect("AA").await.unwrap();
        let mut events = controller.subscribe();

        central.report_disconnect("BB");
        central.report_disconnect("AA");

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, disconnected("AA"));
        assert!(!controller.is_connected());
        assert!(controller.lamp().is_none());
        assert!(matches!(
            controller.toggle_led().await,
            Err(Error::NotConnected)
        ));

        // The link is already gone, so no second event
        controller.disconnect().await.unwrap();
        assert_eq!(lamp_a.disconnects.load(Ordering::SeqCst), 0);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_connects_keep_one_lamp() {
        let lamp_a = FakeLink::new("AA", true);
        let lamp_b = FakeLink::new("BB", true);
        let (controller, _central, _backend) = controller_with(&[&lamp_a, &lamp_b]);

        let (a, b) = tokio::join!(controller.connect("AA"), controller.connect("BB"));
        tokio_test::assert_ok!(a);
        tokio_test::assert_ok!(b);

        assert_eq!(controller.active_address().as_deref(), Some("BB"));
        assert_eq!(controller.lamp().unwrap().identifier(), "BB");
        // The first lamp was closed, not leaked
        assert_eq!(lamp_a.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(lamp_b.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_connect() {
        let lamp_a = FakeLink::new("AA", true);
        let (controller, _central, _backend) = controller_with(&[&lamp_a]);

        let (connect, disconnect) = tokio::join!(controller.connect("AA"), controller.disconnect());
        tokio_test::assert_ok!(connect);
        tokio_test::assert_ok!(disconnect);

        assert!(controller.active_address().is_none());
        assert_eq!(lamp_a.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_when_scan_stop_fails() {
        let lamp_a = FakeLink::new("AA", true);
        let (controller, _central, backend) = controller_with(&[&lamp_a]);
        controller.connect("AA").await.unwrap();

        controller.start_scan().await.unwrap();
        backend.fail_stop.store(true, Ordering::SeqCst);

        tokio_test::assert_ok!(controller.shutdown().await);
        assert!(!controller.is_connected());
        assert_eq!(lamp_a.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_event_callback() {
        let lamp_a = FakeLink::new("AA", true);
        let (controller, _central, _backend) = controller_with(&[&lamp_a]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let _handle = controller.on_event(move |event| {
            let _ = tx.send(event);
        });
        controller.connect("AA").await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(connecting("AA")));
        assert_eq!(second, Some(connected("AA")));
    }
}
