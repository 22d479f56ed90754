//! BLE scanning functionality.
//!
//! Provides the timed, cancellable scanner used to discover lamps and the
//! deduplicated list of scan results it maintains.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::error::{Error, Result};

/// A single advertisement report from the BLE stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Peripheral identifier (the BD address on most platforms).
    pub address: String,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

/// One entry in the deduplicated scan result list.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanResult {
    /// Peripheral identifier.
    pub address: String,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Most recent signal strength in dBm.
    pub rssi: Option<i16>,
    /// When the device was first seen in this scan list.
    pub first_seen: DateTime<Utc>,
    /// When the device last advertised.
    pub last_seen: DateTime<Utc>,
}

impl ScanResult {
    /// Name to show in a device list.
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.address)
    }
}

/// Scan results keyed by address, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ScanResults {
    entries: Vec<ScanResult>,
    index: HashMap<String, usize>,
}

impl ScanResults {
    /// Create an empty result list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement.
    ///
    /// Returns `true` only when the address was not in the list yet. Known
    /// addresses are refreshed in place.
    pub fn insert(&mut self, advertisement: &Advertisement, now: DateTime<Utc>) -> bool {
        if let Some(&i) = self.index.get(&advertisement.address) {
            let entry = &mut self.entries[i];
            if advertisement.local_name.is_some() {
                entry.local_name = advertisement.local_name.clone();
            }
            if advertisement.rssi.is_some() {
                entry.rssi = advertisement.rssi;
            }
            entry.last_seen = now;
            return false;
        }

        self.index
            .insert(advertisement.address.clone(), self.entries.len());
        self.entries.push(ScanResult {
            address: advertisement.address.clone(),
            local_name: advertisement.local_name.clone(),
            rssi: advertisement.rssi,
            first_seen: now,
            last_seen: now,
        });
        true
    }

    /// Look up an entry by address.
    pub fn get(&self, address: &str) -> Option<&ScanResult> {
        self.index.get(address).map(|&i| &self.entries[i])
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Number of distinct devices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy out the entries in discovery order.
    pub fn to_vec(&self) -> Vec<ScanResult> {
        self.entries.clone()
    }
}

/// Event emitted by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A scan started.
    Started,
    /// A new device was added (or the list was cleared). Carries the full list.
    ResultsChanged(Vec<ScanResult>),
    /// The scan ended.
    Stopped {
        /// `true` when the scan ran for its full duration.
        timed_out: bool,
    },
}

/// Source of advertisements.
///
/// Implemented for the platform [`Adapter`].
#[async_trait]
pub trait ScanBackend: Send + Sync + 'static {
    /// Start scanning for devices advertising `service_uuid`.
    async fn start_scan(&self, service_uuid: Uuid) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Stream of advertisement reports.
    async fn advertisements(&self) -> Result<BoxStream<'static, Advertisement>>;
}

#[async_trait]
impl ScanBackend for Adapter {
    async fn start_scan(&self, service_uuid: Uuid) -> Result<()> {
        let filter = ScanFilter {
            services: vec![service_uuid],
        };
        Central::start_scan(self, filter).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        Central::stop_scan(self).await?;
        Ok(())
    }

    async fn advertisements(&self) -> Result<BoxStream<'static, Advertisement>> {
        let events = self.events().await?;
        let adapter = self.clone();

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => return None,
                };

                let peripheral = adapter.peripheral(&id).await.ok()?;
                let properties = peripheral.properties().await.ok()??;

                trace!("Advertisement from {:?}: {:?}", id, properties.local_name);

                Some(Advertisement {
                    address: id.to_string(),
                    local_name: properties.local_name,
                    rssi: properties.rssi,
                    services: properties.services,
                })
            }
        });

        Ok(stream.boxed())
    }
}

/// Get the first Bluetooth adapter on this system.
///
/// # Errors
///
/// Returns `BluetoothUnavailable` if there is no adapter.
pub async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|_e| Error::BluetoothUnavailable)?;

    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::BluetoothUnavailable)?;

    info!(
        "Using Bluetooth adapter: {:?}",
        adapter.adapter_info().await.ok()
    );

    Ok(adapter)
}

/// Ownership of the current scan.
#[derive(Default)]
struct ScanState {
    /// Bumped on every start so a finishing task can tell whether it is stale.
    generation: u64,
    /// Whether a scan is running, including while its backend is stopping.
    active: bool,
    /// Handle to the scanning task.
    handle: Option<JoinHandle<()>>,
}

impl ScanState {
    fn owns(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }
}

/// Timed BLE scanner for discovering lamps.
pub struct LampScanner {
    /// Where advertisements come from.
    backend: Arc<dyn ScanBackend>,
    /// Scan settings.
    config: ScanConfig,
    /// Current scan ownership.
    state: Arc<Mutex<ScanState>>,
    /// Deduplicated results.
    results: Arc<RwLock<ScanResults>>,
    /// Channel for scan events.
    event_tx: broadcast::Sender<ScanEvent>,
}

impl LampScanner {
    /// Create a scanner on the first available adapter with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let adapter = default_adapter().await?;
        Self::with_backend(Arc::new(adapter), ScanConfig::default())
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter, config: ScanConfig) -> Result<Self> {
        Self::with_backend(Arc::new(adapter), config)
    }

    /// Create a scanner over any advertisement source.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the configuration is invalid.
    pub fn with_backend(backend: Arc<dyn ScanBackend>, config: ScanConfig) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            backend,
            config,
            state: Arc::new(Mutex::new(ScanState::default())),
            results: Arc::new(RwLock::new(ScanResults::new())),
            event_tx,
        })
    }

    /// Start a timed scan.
    ///
    /// Does nothing if a scan is already running, including one that has
    /// timed out but whose backend is still stopping. The scan stops by
    /// itself after the configured duration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start scanning.
    pub async fn start_scan(&self) -> Result<()> {
        let generation = {
            let mut state = self.state.lock();
            if state.active {
                debug!("Already scanning, ignoring start request");
                return Ok(());
            }
            state.active = true;
            state.generation += 1;
            state.generation
        };

        info!(
            "Starting lamp scan for {:?} (service {})",
            self.config.duration, self.config.service_uuid
        );

        // Subscribe before starting so early reports are not lost
        let started = async {
            let advertisements = self.backend.advertisements().await?;
            self.backend.start_scan(self.config.service_uuid).await?;
            Ok::<_, Error>(advertisements)
        }
        .await;

        let advertisements = match started {
            Ok(advertisements) => advertisements,
            Err(e) => {
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.active = false;
                }
                return Err(e);
            }
        };

        let owned = {
            let mut state = self.state.lock();
            if state.owns(generation) {
                let _ = self.event_tx.send(ScanEvent::Started);
                state.handle = Some(self.spawn_scan_task(generation, advertisements));
                true
            } else {
                false
            }
        };

        if !owned {
            debug!("Scan was stopped while starting");
            return self.backend.stop_scan().await;
        }

        Ok(())
    }

    fn spawn_scan_task(
        &self,
        generation: u64,
        mut advertisements: BoxStream<'static, Advertisement>,
    ) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let state = self.state.clone();
        let results = self.results.clone();
        let event_tx = self.event_tx.clone();
        let service_uuid = self.config.service_uuid;
        let duration = self.config.duration;

        tokio::spawn(async move {
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    advertisement = advertisements.next() => match advertisement {
                        Some(advertisement) => {
                            Self::handle_advertisement(
                                &advertisement,
                                service_uuid,
                                &results,
                                &event_tx,
                            );
                        }
                        None => {
                            debug!("Advertisement stream ended before scan timeout");
                            (&mut deadline).await;
                            break;
                        }
                    }
                }
            }

            if !state.lock().owns(generation) {
                return;
            }

            // The scan stays active until the backend has actually stopped
            if let Err(e) = backend.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }

            let finished = {
                let mut state = state.lock();
                if state.owns(generation) {
                    state.active = false;
                    state.handle = None;
                    let _ = event_tx.send(ScanEvent::Stopped { timed_out: true });
                    true
                } else {
                    false
                }
            };

            if finished {
                info!("Lamp scan finished after {:?}", duration);
            }
        })
    }

    /// Cancel the running scan.
    ///
    /// Does nothing if no scan is running.
    pub async fn stop_scan(&self) -> Result<()> {
        let handle = {
            let mut state = self.state.lock();
            if !state.active {
                debug!("Not scanning, ignoring stop request");
                return Ok(());
            }
            state.active = false;
            state.handle.take()
        };

        if let Some(handle) = handle {
            handle.abort();
        }

        info!("Stopping lamp scan");
        let _ = self.event_tx.send(ScanEvent::Stopped { timed_out: false });

        self.backend.stop_scan().await
    }

    /// Empty the scan result list.
    pub fn clear_results(&self) {
        self.results.write().clear();
        let _ = self.event_tx.send(ScanEvent::ResultsChanged(Vec::new()));
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.state.lock().active
    }

    /// Get the deduplicated scan results in discovery order.
    pub fn results(&self) -> Vec<ScanResult> {
        self.results.read().to_vec()
    }

    /// Look up a scan result by address.
    pub fn result(&self, address: &str) -> Option<ScanResult> {
        self.results.read().get(address).cloned()
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Get the scan settings.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn handle_advertisement(
        advertisement: &Advertisement,
        service_uuid: Uuid,
        results: &RwLock<ScanResults>,
        event_tx: &broadcast::Sender<ScanEvent>,
    ) {
        if !advertisement.services.contains(&service_uuid) {
            trace!("Ignoring {}: no lamp service", advertisement.address);
            return;
        }

        let snapshot = {
            let mut results = results.write();
            if !results.insert(advertisement, Utc::now()) {
                return;
            }
            results.to_vec()
        };

        debug!(
            "Discovered lamp {} ({:?}, RSSI {:?})",
            advertisement.address, advertisement.local_name, advertisement.rssi
        );

        let _ = event_tx.send(ScanEvent::ResultsChanged(snapshot));
    }
}

impl Drop for LampScanner {
    fn drop(&mut self) {
        if let Some(handle) = self.state.lock().handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ble::uuids::LAMP_SERVICE_UUID;
    use futures::channel::mpsc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory advertisement source that records start/stop calls.
    pub(crate) struct FakeBackend {
        advertisements: Mutex<Option<mpsc::UnboundedReceiver<Advertisement>>>,
        stop_delay: Duration,
        pub(crate) starts: AtomicUsize,
        pub(crate) stops: AtomicUsize,
        /// Whether the platform scan is running.
        pub(crate) scanning: AtomicBool,
        pub(crate) fail_stop: AtomicBool,
    }

    impl FakeBackend {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedSender<Advertisement>) {
            Self::with_stop_delay(Duration::ZERO)
        }

        /// A backend whose `stop_scan` takes `stop_delay` to complete.
        pub(crate) fn with_stop_delay(
            stop_delay: Duration,
        ) -> (Arc<Self>, mpsc::UnboundedSender<Advertisement>) {
            let (tx, rx) = mpsc::unbounded();
            let backend = Arc::new(Self {
                advertisements: Mutex::new(Some(rx)),
                stop_delay,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                scanning: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
            });
            (backend, tx)
        }
    }

    #[async_trait]
    impl ScanBackend for FakeBackend {
        async fn start_scan(&self, service_uuid: Uuid) -> Result<()> {
            assert_eq!(service_uuid, LAMP_SERVICE_UUID);
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.scanning.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<()> {
            if !self.stop_delay.is_zero() {
                tokio::time::sleep(self.stop_delay).await;
            }
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(Error::Internal("adapter went away".to_string()));
            }
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.scanning.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn advertisements(&self) -> Result<BoxStream<'static, Advertisement>> {
            match self.advertisements.lock().take() {
                Some(rx) => Ok(rx.boxed()),
                None => Ok(futures::stream::pending().boxed()),
            }
        }
    }
}
