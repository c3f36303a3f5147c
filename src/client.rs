use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{
    encode_line, DEFAULT_NAME_FILTER, DEFAULT_SCAN_TIMEOUT_SECS, NUS_RX_CHARACTERISTIC,
    NUS_SERVICE_UUID, NUS_TX_CHARACTERISTIC, UNKNOWN_DEVICE_NAME,
};
use crate::types::LiqEvent;

// ── LiqDevice ─────────────────────────────────────────────────────────────────

/// A peripheral found by [`LiqClient::scan_all`].
#[derive(Clone, Debug)]
pub struct LiqDevice {
    /// Advertised local name, or `"<unknown>"`.
    pub name: String,
    /// Platform BLE identifier.
    /// • macOS / Windows — a UUID string
    /// • Linux — a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    pub id: String,
    /// Signal strength at scan time, when the platform reports it.
    pub rssi: Option<i16>,
    pub(crate) peripheral: Peripheral,
    /// The adapter that discovered this device; the disconnect watcher
    /// listens on it.
    pub(crate) adapter: Adapter,
}

// ── LiqClientConfig ───────────────────────────────────────────────────────────

/// Configuration for [`LiqClient`].
#[derive(Debug, Clone)]
pub struct LiqClientConfig {
    /// Keep devices whose advertised name contains this string, ignoring
    /// case.  An empty filter keeps every device, including unnamed ones.
    /// Default: `"LIQ"`.
    pub name_filter: String,
    /// BLE scan duration in seconds. Default: `2`.
    pub scan_timeout_secs: u64,
}

impl Default for LiqClientConfig {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.into(),
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
        }
    }
}

// ── Name matching ─────────────────────────────────────────────────────────────

/// `true` when an advertised `name` passes `filter`.
///
/// | filter | name | result |
/// |---|---|---|
/// | `""` | anything, or none | keep |
/// | `"liq"` | `"LIQ-01"` | keep |
/// | `"LIQ"` | none | drop |
pub fn name_matches(name: Option<&str>, filter: &str) -> bool {
    let filter = filter.trim();
    if filter.is_empty() {
        return true;
    }
    name.is_some_and(|n| n.to_lowercase().contains(&filter.to_lowercase()))
}

/// Sort key for scan results: named devices first, then strongest signal.
fn scan_order(name: &str, rssi: Option<i16>) -> (bool, Reverse<i16>) {
    (name == UNKNOWN_DEVICE_NAME, Reverse(rssi.unwrap_or(i16::MIN)))
}

// ── LiqClient ─────────────────────────────────────────────────────────────────

/// BLE client for LaundryIQ sensors.
///
/// Scans by advertised name, connects, checks for the Nordic UART Service,
/// subscribes to its TX characteristic and forwards every notification as a
/// [`LiqEvent::Data`].  Decoding the text lines is left to the consumer.
pub struct LiqClient {
    config: LiqClientConfig,
}

impl LiqClient {
    pub fn new(config: LiqClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LiqClientConfig {
        &self.config
    }

    // ── Public: scan ─────────────────────────────────────────────────────────

    /// Scan for `config.scan_timeout_secs` and return every matching device,
    /// named devices first and strongest signal first.
    pub async fn scan_all(&self) -> Result<Vec<LiqDevice>> {
        let adapter = open_adapter().await?;

        info!(
            "scan_all: scanning for {} s (filter {:?}) …",
            self.config.scan_timeout_secs, self.config.name_filter
        );
        adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let mut found = vec![];
        for p in adapter.peripherals().await? {
            let Ok(Some(props)) = p.properties().await else {
                continue;
            };
            if !name_matches(props.local_name.as_deref(), &self.config.name_filter) {
                continue;
            }
            let name = props
                .local_name
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.into());
            let id = p.id().to_string();
            debug!("scan_all: found {name}  id={id}  rssi={:?}", props.rssi);
            found.push(LiqDevice {
                name,
                id,
                rssi: props.rssi,
                peripheral: p,
                adapter: adapter.clone(),
            });
        }
        found.sort_by_key(|d| scan_order(&d.name, d.rssi));
        info!("scan_all: {} device(s) found", found.len());
        Ok(found)
    }

    // ── Public: connect_to ────────────────────────────────────────────────────

    /// Connect to a device returned by [`LiqClient::scan_all`] and start
    /// forwarding its notifications.
    pub async fn connect_to(
        &self,
        device: LiqDevice,
    ) -> Result<(mpsc::Receiver<LiqEvent>, LiqHandle)> {
        setup_peripheral(device.peripheral, device.name, device.adapter).await
    }

    // ── Public: connect (convenience) ────────────────────────────────────────

    /// Connect to the first device whose name passes the filter.
    pub async fn connect(&self) -> Result<(mpsc::Receiver<LiqEvent>, LiqHandle)> {
        let adapter = open_adapter().await?;

        info!(
            "Scanning for LaundryIQ devices (timeout: {} s) …",
            self.config.scan_timeout_secs
        );
        adapter.start_scan(ScanFilter::default()).await?;
        let found = self.find_first(&adapter).await;
        adapter.stop_scan().await.ok();
        let peripheral = found?;

        let props = peripheral.properties().await?.unwrap_or_default();
        let device_name = props
            .local_name
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.into());
        info!("Found device: {device_name}");

        setup_peripheral(peripheral, device_name, adapter).await
    }

    // ── Private: find_first ───────────────────────────────────────────────────

    /// Poll until the first matching peripheral appears or the timeout expires.
    async fn find_first(&self, adapter: &Adapter) -> Result<Peripheral> {
        use tokio::time::{sleep, timeout};

        let filter = self.config.name_filter.as_str();
        let timeout_secs = self.config.scan_timeout_secs;
        let result = timeout(Duration::from_secs(timeout_secs), async {
            loop {
                let peripherals = adapter.peripherals().await.unwrap_or_default();
                for p in peripherals {
                    if let Ok(Some(props)) = p.properties().await {
                        if name_matches(props.local_name.as_deref(), filter) {
                            return p;
                        }
                    }
                }
                sleep(Duration::from_millis(250)).await;
            }
        })
        .await;

        result.map_err(|_| {
            anyhow!("No device matching {filter:?} found after {timeout_secs} s")
        })
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// First Bluetooth adapter, ready to scan.
///
/// On macOS, `CBCentralManager` starts in an "unknown" state and silently
/// ignores scans until it reports PoweredOn; wait up to 3 s for that.
async fn open_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;

    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => {
                    info!("macOS: adapter is PoweredOn");
                    break;
                }
                Ok(state) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                        break;
                    }
                    debug!("macOS: adapter state = {state:?}, waiting…");
                }
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    Ok(adapter)
}

// ── Connection setup ──────────────────────────────────────────────────────────

/// Connect, verify NUS, subscribe to TX, and spawn the notification and
/// disconnect-watcher tasks.
async fn setup_peripheral(
    peripheral: Peripheral,
    device_name: String,
    adapter: Adapter,
) -> Result<(mpsc::Receiver<LiqEvent>, LiqHandle)> {
    // BlueZ's Device1.Connect can block forever on an out-of-range device.
    tokio::time::timeout(Duration::from_secs(10), peripheral.connect())
        .await
        .map_err(|_| anyhow!("BLE connect() timed out after 10 s"))?
        .with_context(|| format!("connecting to {device_name}"))?;

    // BlueZ reports the link up before its GATT cache is filled.
    #[cfg(target_os = "linux")]
    tokio::time::sleep(Duration::from_millis(600)).await;

    tokio::time::timeout(Duration::from_secs(15), peripheral.discover_services())
        .await
        .map_err(|_| anyhow!("discover_services() timed out after 15 s"))??;
    info!("Connected and services discovered: {device_name}");

    if !peripheral.services().iter().any(|s| s.uuid == NUS_SERVICE_UUID) {
        peripheral.disconnect().await.ok();
        return Err(anyhow!(
            "{device_name} does not expose the Nordic UART Service ({NUS_SERVICE_UUID})"
        ));
    }

    let chars: BTreeSet<Characteristic> = peripheral.characteristics();
    let find_char = |uuid: Uuid| -> Result<Characteristic> {
        chars
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {uuid} not found"))
    };

    let tx_char = find_char(NUS_TX_CHARACTERISTIC)?;
    let rx_char = find_char(NUS_RX_CHARACTERISTIC)?;
    peripheral
        .subscribe(&tx_char)
        .await
        .context("subscribing to NUS TX notifications")?;

    // ── Event channel ─────────────────────────────────────────────────────
    let (tx, rx) = mpsc::channel::<LiqEvent>(256);
    let _ = tx.send(LiqEvent::Connected(device_name.clone())).await;

    // ── Disconnect watcher ──────────────────────────────────────────────
    // DeviceDisconnected usually arrives before the notification stream
    // closes.
    let disconnect_tx = tx.clone();
    let peripheral_id = peripheral.id();
    tokio::spawn(async move {
        match adapter.events().await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        if id == peripheral_id {
                            info!("Disconnect watcher: device {id:?} disconnected.");
                            let _ = disconnect_tx.send(LiqEvent::Disconnected).await;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Disconnect watcher: could not subscribe to adapter events: {e}");
            }
        }
    });

    // ── Notification forwarder ──────────────────────────────────────────
    let peripheral_clone = peripheral.clone();
    tokio::spawn(async move {
        let mut notifications = match peripheral_clone.notifications().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Could not get notifications stream: {e}");
                let _ = tx.send(LiqEvent::Disconnected).await;
                return;
            }
        };

        while let Some(notif) = notifications.next().await {
            if notif.uuid != NUS_TX_CHARACTERISTIC {
                debug!("Unexpected notification from {}", notif.uuid);
                continue;
            }
            if tx.send(LiqEvent::Data(notif.value)).await.is_err() {
                debug!("Event receiver dropped; stopping notification forwarder.");
                return;
            }
        }

        info!("Notification stream ended – device disconnected.");
        let _ = tx.send(LiqEvent::Disconnected).await;
    });

    Ok((
        rx,
        LiqHandle {
            peripheral,
            rx_char,
            name: device_name,
        },
    ))
}

// ── LiqHandle ─────────────────────────────────────────────────────────────────

/// A handle to an active LaundryIQ connection.
pub struct LiqHandle {
    peripheral: Peripheral,
    rx_char: Characteristic,
    name: String,
}

impl LiqHandle {
    /// Advertised name of the connected device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one text command to the NUS RX characteristic.
    pub async fn send_line(&self, cmd: &str) -> Result<()> {
        let payload = encode_line(cmd);
        self.peripheral
            .write(&self.rx_char, &payload, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    /// Check if the peripheral is still connected at the BLE adapter level.
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Gracefully disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_case_insensitive_substring() {
        assert!(name_matches(Some("LIQ-0042"), "liq"));
        assert!(name_matches(Some("my-liq-board"), "LIQ"));
        assert!(!name_matches(Some("HRM-Pro 4F21"), "LIQ"));
        assert!(!name_matches(None, "LIQ"));
    }

    #[test]
    fn empty_filter_keeps_everything() {
        assert!(name_matches(None, ""));
        assert!(name_matches(None, "   "));
        assert!(name_matches(Some("anything"), ""));
    }

    #[test]
    fn scan_order_puts_named_and_strong_first() {
        let mut devices = vec![
            (UNKNOWN_DEVICE_NAME, Some(-30)),
            ("LIQ-A", Some(-80)),
            ("LIQ-B", None),
            ("LIQ-C", Some(-45)),
        ];
        devices.sort_by_key(|&(n, r)| scan_order(n, r));
        let names: Vec<&str> = devices.iter().map(|d| d.0).collect();
        assert_eq!(names, ["LIQ-C", "LIQ-A", "LIQ-B", UNKNOWN_DEVICE_NAME]);
    }

    #[test]
    fn default_config() {
        let c = LiqClientConfig::default();
        assert_eq!(c.name_filter, "LIQ");
        assert_eq!(c.scan_timeout_secs, 2);
    }
}
