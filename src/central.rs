//! The BLE side of the listener: find the Notification Source, connect, and
//! hand back its trigger notifications as a stream.
//!
//! [`NotificationCentral`] is the seam the reconnect loop in
//! [`crate::listener`] is written against.  [`BtleCentral`] is the real
//! implementation on top of `btleplug`; [`crate::simulator::SimulatedCentral`]
//! stands in for it when no hardware is around.

use std::time::Duration;

use anyhow::{anyhow, Result};
use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{name_matches, TRIGGER_CHARACTERISTIC, TRIGGER_SERVICE_UUID};

/// Raw characteristic values, in receipt order.  Ends when the link drops.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// A peripheral that matched the target name during a scan.
#[derive(Clone, Debug)]
pub struct Discovered<P> {
    /// Advertised local name.
    pub name: String,
    /// Platform identifier (UUID on macOS / Windows, MAC address on Linux).
    pub id: String,
    pub peripheral: P,
}

/// Which GATT characteristic to subscribe to, and how long to wait for it.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub service: Uuid,
    pub characteristic: Uuid,
    /// Hard limit on link establishment and on GATT discovery (each).
    pub connect_timeout: Duration,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            service: TRIGGER_SERVICE_UUID,
            characteristic: TRIGGER_CHARACTERISTIC,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Scan, subscribe and release: the operations the reconnect loop needs.
///
/// Implementations report failures as errors and never retry internally;
/// retry policy lives in the listener.
#[allow(async_fn_in_trait)]
pub trait NotificationCentral {
    type Peripheral;

    /// Scan for up to `timeout` and return the first peripheral whose
    /// advertised name matches `target_name`, or `None` if none showed up.
    async fn find(
        &mut self,
        target_name: &str,
        timeout: Duration,
    ) -> Result<Option<Discovered<Self::Peripheral>>>;

    /// Connect to `device`, subscribe to `subscription.characteristic`, and
    /// return its notification values.
    ///
    /// A link that is up when this fails is torn down before returning.
    async fn subscribe(
        &mut self,
        device: &Discovered<Self::Peripheral>,
        subscription: &Subscription,
    ) -> Result<NotificationStream>;

    /// Drop whatever link to `device` may still be up.  Called after every
    /// connect attempt once the subscription is over, however it ended.
    /// Must be harmless when the device is already disconnected.
    async fn release(&mut self, device: &Discovered<Self::Peripheral>) -> Result<()>;
}

// ── btleplug ──────────────────────────────────────────────────────────────────

/// `btleplug`-backed central using the first Bluetooth adapter.
///
/// The adapter is opened lazily on the first scan and cached, so a machine
/// whose Bluetooth is off at startup is simply retried by the listener.
#[derive(Default)]
pub struct BtleCentral {
    adapter: Option<Adapter>,
}

impl BtleCentral {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&mut self) -> Result<Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;

        // CoreBluetooth starts in an "unknown" state and silently ignores
        // scans until it reports PoweredOn.
        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
            loop {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => break,
                    Ok(state) if tokio::time::Instant::now() >= deadline => {
                        warn!("macOS: adapter still {state:?} after 3 s, proceeding anyway");
                        break;
                    }
                    Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
                    Err(e) => {
                        warn!("macOS: adapter_state() error: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Everything after `connect()`: GATT discovery, subscription, and the
    /// disconnect-aware notification stream.
    async fn open_notifications(
        &mut self,
        device: &Discovered<Peripheral>,
        subscription: &Subscription,
    ) -> Result<NotificationStream> {
        let peripheral = &device.peripheral;
        let limit = subscription.connect_timeout;

        // BlueZ reports the link up before the remote GATT cache is filled.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(limit, peripheral.discover_services())
            .await
            .map_err(|_| anyhow!("discover_services() timed out after {limit:?}"))??;
        info!("Connected and services discovered: {}", device.name);

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == subscription.characteristic && c.service_uuid == subscription.service
            })
            .ok_or_else(|| {
                anyhow!(
                    "Characteristic {} (service {}) not found on {}",
                    subscription.characteristic,
                    subscription.service,
                    device.name
                )
            })?;
        peripheral.subscribe(&characteristic).await?;
        let notifications = peripheral.notifications().await?;

        // The notification stream is not guaranteed to end on link loss on
        // every platform; the adapter's DeviceDisconnected event is.
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;
        let peripheral_id = peripheral.id();
        let disconnected = async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        info!("Disconnect watcher: device {id:?} disconnected.");
                        return;
                    }
                }
            }
        };

        let wanted = subscription.characteristic;
        Ok(notifications
            .filter_map(move |n| futures::future::ready((n.uuid == wanted).then_some(n.value)))
            .take_until(disconnected)
            .boxed())
    }
}

impl NotificationCentral for BtleCentral {
    type Peripheral = Peripheral;

    async fn find(
        &mut self,
        target_name: &str,
        timeout: Duration,
    ) -> Result<Option<Discovered<Peripheral>>> {
        let adapter = self.adapter().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        let result = tokio::time::timeout(timeout, async {
            loop {
                for p in adapter.peripherals().await.unwrap_or_default() {
                    if let Ok(Some(props)) = p.properties().await {
                        if let Some(name) = props.local_name {
                            if name_matches(&name, target_name) {
                                return (name, p);
                            }
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await;
        adapter.stop_scan().await.ok();

        Ok(result.ok().map(|(name, peripheral)| {
            let id = peripheral.id().to_string();
            debug!("find: {name} id={id}");
            Discovered {
                name,
                id,
                peripheral,
            }
        }))
    }

    async fn subscribe(
        &mut self,
        device: &Discovered<Peripheral>,
        subscription: &Subscription,
    ) -> Result<NotificationStream> {
        let peripheral = &device.peripheral;
        let limit = subscription.connect_timeout;

        // BlueZ's Device1.Connect can block forever on a bad link.
        tokio::time::timeout(limit, peripheral.connect())
            .await
            .map_err(|_| anyhow!("BLE connect() timed out after {limit:?}"))??;

        match self.open_notifications(device, subscription).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                // Disconnect so BlueZ doesn't keep the link half-open; a
                // half-open peripheral stops advertising and is never found.
                peripheral.disconnect().await.ok();
                Err(e)
            }
        }
    }

    async fn release(&mut self, device: &Discovered<Peripheral>) -> Result<()> {
        let peripheral = &device.peripheral;
        if peripheral.is_connected().await.unwrap_or(true) {
            info!("Disconnecting {}", device.name);
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}
