//! USB device manager
//!
//! Handles enumeration and hot-plug for devices matching the id table, and
//! turns arrivals and removals into registry attaches and detaches. Runs
//! on the USB thread.

use crate::registry::DeviceRegistry;
use crate::usb::device::{OpenOptions, UsbTransport, describe_open_error};
use async_channel::{Receiver, Sender, unbounded};
use common::{DeviceKey, SessionSummary, UsbEvent};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// VID:PID of the discovery board firmware
pub const DEFAULT_ID_TABLE: &[&str] = &["0x0477:0x5620"];

/// What the manager matches and how it opens matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbSettings {
    /// `0xVID:0xPID` patterns, `*` allowed on either side
    pub id_table: Vec<String>,
    pub open: OpenOptions,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            id_table: DEFAULT_ID_TABLE.iter().map(|s| s.to_string()).collect(),
            open: OpenOptions::default(),
        }
    }
}

/// Hot-plug notification forwarded from the libusb callback
enum HotplugNotice {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// USB device manager
pub struct DeviceManager {
    context: Context,
    registry: Arc<DeviceRegistry>,
    settings: UsbSettings,
    /// (bus, address) -> attached key
    attached: HashMap<(u8, u8), DeviceKey>,
    _hotplug_registration: Option<Registration<Context>>,
    notice_tx: Sender<HotplugNotice>,
    notice_rx: Receiver<HotplugNotice>,
    event_sender: Sender<UsbEvent>,
}

impl DeviceManager {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        settings: UsbSettings,
        event_sender: Sender<UsbEvent>,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (notice_tx, notice_rx) = unbounded();

        Ok(Self {
            context,
            registry,
            settings,
            attached: HashMap::new(),
            _hotplug_registration: None,
            notice_tx,
            notice_rx,
            event_sender,
        })
    }

    /// Attach devices already present and register hot-plug callbacks
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        self.enumerate_devices()?;

        if rusb::has_hotplug() {
            self.register_hotplug()?;
        } else {
            warn!("libusb has no hot-plug support; only devices present at startup are attached");
        }

        info!(
            "Device manager initialized with {} attached devices",
            self.attached.len()
        );
        Ok(())
    }

    fn enumerate_devices(&mut self) -> Result<(), rusb::Error> {
        let devices = self.context.devices()?;

        for device in devices.iter() {
            self.handle_device_arrived(device);
        }

        debug!("Enumeration done, {} matching devices", self.attached.len());
        Ok(())
    }

    fn register_hotplug(&mut self) -> Result<(), rusb::Error> {
        let callback = HotplugCallback {
            notices: self.notice_tx.clone(),
        };

        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    /// Drain hot-plug notifications queued by the callback
    pub fn process_hotplug(&mut self) {
        while let Ok(notice) = self.notice_rx.try_recv() {
            match notice {
                HotplugNotice::Arrived(device) => self.handle_device_arrived(device),
                HotplugNotice::Left { bus, address } => self.handle_device_left(bus, address),
            }
        }
    }

    /// Open, claim and attach a device if it is in the id table
    pub fn handle_device_arrived(&mut self, device: Device<Context>) {
        let bus = device.bus_number();
        let address = device.address();

        if !self.is_device_allowed(&device) {
            return;
        }
        if self.attached.contains_key(&(bus, address)) {
            debug!("Device at {}-{} already attached", bus, address);
            return;
        }

        let key = DeviceKey::new(bus, address, self.settings.open.interface);
        let transport = match UsbTransport::open(&device, self.settings.open) {
            Ok(transport) => transport,
            Err(e) => {
                let reason = describe_open_error(e);
                warn!("Failed to open {}: {}", key, reason);
                self.send_event(UsbEvent::AttachFailed { key, reason });
                return;
            }
        };

        let interface = transport.interface().clone();
        match self.registry.attach(key, &interface, transport) {
            Ok(node) => {
                self.attached.insert((bus, address), key);
                self.send_event(UsbEvent::DeviceAttached {
                    key,
                    node: node.name,
                });
            }
            Err(e) => {
                self.send_event(UsbEvent::AttachFailed {
                    key,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Detach whatever was attached at (bus, address)
    pub fn handle_device_left(&mut self, bus: u8, address: u8) {
        let Some(key) = self.attached.remove(&(bus, address)) else {
            debug!("Unmatched device left: bus={}, addr={}", bus, address);
            return;
        };

        self.registry.detach(key);
        self.send_event(UsbEvent::DeviceDetached { key });
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry.sessions()
    }

    /// Detach every device this manager attached
    pub fn shutdown(&mut self) {
        for (_, key) in self.attached.drain() {
            self.registry.detach(key);
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    fn send_event(&self, event: UsbEvent) {
        if let Err(e) = self.event_sender.try_send(event) {
            error!("Failed to send USB event: {}", e);
        }
    }

    fn is_device_allowed(&self, device: &Device<Context>) -> bool {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => return false,
        };

        let allowed = Self::check_filter(desc.vendor_id(), desc.product_id(), &self.settings.id_table);
        if !allowed {
            debug!(
                "Device ignored by id table: bus={}, addr={}, vid={:#06x}, pid={:#06x}",
                device.bus_number(),
                device.address(),
                desc.vendor_id(),
                desc.product_id()
            );
        }
        allowed
    }

    /// Check a VID/PID pair against `0xVID:0xPID` patterns
    ///
    /// An empty table matches nothing: the driver only binds to boards it
    /// was told about.
    pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
        filters.iter().any(|filter| {
            let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
                return false;
            };
            matches_id(filter_vid, vid) && matches_id(filter_pid, pid)
        })
    }
}

fn matches_id(pattern: &str, id: u16) -> bool {
    pattern == "*"
        || u16::from_str_radix(pattern.trim_start_matches("0x"), 16)
            .map(|value| value == id)
            .unwrap_or(false)
}

/// Forwards libusb hot-plug callbacks to the manager
///
/// The callback runs inside `handle_events` and cannot reach the manager,
/// so it only queues a notice.
struct HotplugCallback {
    notices: Sender<HotplugNotice>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.notices.try_send(HotplugNotice::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.notices.try_send(HotplugNotice::Left {
            bus: device.bus_number(),
            address: device.address(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_logic() {
        let filters = vec!["0x0477:0x5620".to_string(), "0xABCD:*".to_string()];

        assert!(DeviceManager::check_filter(0x0477, 0x5620, &filters));
        assert!(DeviceManager::check_filter(0xABCD, 0x1111, &filters));

        assert!(!DeviceManager::check_filter(0x0477, 0x9999, &filters));
        assert!(!DeviceManager::check_filter(0x9999, 0x5620, &filters));
        assert!(!DeviceManager::check_filter(0x0477, 0x5620, &[]));
    }

    #[test]
    fn test_malformed_filter_never_matches() {
        let filters = vec!["04775620".to_string(), "0xZZZZ:*".to_string()];
        assert!(!DeviceManager::check_filter(0x0477, 0x5620, &filters));
    }

    #[test]
    fn test_default_settings() {
        let settings = UsbSettings::default();
        assert_eq!(settings.id_table, vec!["0x0477:0x5620".to_string()]);
        assert_eq!(settings.open.interface, 0);
    }
}
