//! Lifecycle registry
//!
//! Maps device keys to sessions. Each entry holds the attachment's own
//! session reference (until detach) and a weak lookup reference that
//! opens upgrade from. An open therefore succeeds only while something
//! still keeps the session alive, and never resurrects a destroyed one.

use crate::endpoints::resolve_endpoints;
use crate::error::{DriverError, Result};
use crate::file::DeviceFile;
use crate::session::{Session, SessionShared, TransferTimeouts};
use common::{DeviceKey, InterfaceDescriptor, LifecycleState, SessionSummary, Transport};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, info, warn};

/// Default prefix of device node names
pub const DEFAULT_NODE_PREFIX: &str = "stm32leds";

/// Node handed out for a successful attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    pub key: DeviceKey,
    pub minor: u32,
    /// e.g. `stm32leds0`
    pub name: String,
}

/// Node name behind a device path
///
/// Accepts `stm32leds0`, `/dev/stm32leds0` and `/dev/usb/stm32leds0`.
pub fn node_name(path: &str) -> &str {
    let name = path.strip_prefix("/dev/").unwrap_or(path);
    name.strip_prefix("usb/").unwrap_or(name)
}

struct Slot {
    minor: u32,
    node: String,
    /// Attachment's reference; taken at detach
    owner: Option<Session>,
    lookup: Weak<SessionShared>,
}

impl Slot {
    /// Still reachable by an owner or a consumer
    fn is_live(&self) -> bool {
        self.owner.is_some() || self.lookup.strong_count() > 0
    }
}

/// Registry of attached devices
pub struct DeviceRegistry {
    slots: RwLock<HashMap<DeviceKey, Slot>>,
    node_prefix: String,
    timeouts: TransferTimeouts,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_PREFIX, TransferTimeouts::default())
    }
}

impl DeviceRegistry {
    pub fn new(node_prefix: impl Into<String>, timeouts: TransferTimeouts) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            node_prefix: node_prefix.into(),
            timeouts,
        }
    }

    pub fn node_prefix(&self) -> &str {
        &self.node_prefix
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<DeviceKey, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<DeviceKey, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a newly claimed interface
    ///
    /// Resolves the interrupt endpoints first. If either is missing the
    /// transport is released and nothing is published. On success the
    /// session becomes `Active` and is then registered under the lowest
    /// free minor.
    pub fn attach(
        &self,
        key: DeviceKey,
        interface: &InterfaceDescriptor,
        transport: Arc<dyn Transport>,
    ) -> Result<DeviceNode> {
        let endpoints = match resolve_endpoints(interface) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("Cannot attach {}: {}", key, e);
                transport.release();
                return Err(e);
            }
        };

        if self.is_attached(key) {
            warn!("{} attached twice, detaching the previous session", key);
            self.detach(key);
        }

        let node = {
            let mut slots = self.write_slots();
            slots.retain(|_, slot| slot.is_live());
            slots.remove(&key);

            let used: BTreeSet<u32> = slots.values().map(|slot| slot.minor).collect();
            let minor = (0u32..).find(|m| !used.contains(m)).unwrap_or_default();
            let name = format!("{}{}", self.node_prefix, minor);

            // Active before any open or detach can see it
            let session = Session::new(key, name.clone(), endpoints, self.timeouts, transport);
            if !session.mark_active() {
                warn!("Cannot attach {}: session left Attaching early", key);
                return Err(DriverError::DeviceGone);
            }

            slots.insert(
                key,
                Slot {
                    minor,
                    node: name.clone(),
                    lookup: session.downgrade(),
                    owner: Some(session),
                },
            );

            DeviceNode { key, minor, name }
        };

        info!(
            "Attached {} as {} (IN {:#04x}, OUT {:#04x})",
            key, node.name, endpoints.inbound.address, endpoints.outbound.address
        );

        Ok(node)
    }

    /// Open a consumer handle on an attached device
    ///
    /// Succeeds for `Active` and `Detaching` sessions. Unknown keys and
    /// sessions still attaching or already destroyed are `DeviceNotFound`.
    pub fn open(&self, key: DeviceKey) -> Result<DeviceFile> {
        let session = {
            let slots = self.read_slots();
            slots
                .get(&key)
                .and_then(|slot| Session::upgrade(&slot.lookup))
        };
        let Some(session) = session else {
            debug!("Open of {} failed: no session", key);
            return Err(DriverError::DeviceNotFound(key.to_string()));
        };

        match session.state() {
            LifecycleState::Active | LifecycleState::Detaching => {
                debug!(
                    "Opened {} ({}, {} refs)",
                    session.node(),
                    session.state(),
                    session.references()
                );
                Ok(DeviceFile::new(session))
            }
            state => {
                debug!("Open of {} refused while {}", key, state);
                session.release();
                Err(DriverError::DeviceNotFound(key.to_string()))
            }
        }
    }

    /// Open by node name, with or without a `/dev/` or `/dev/usb/` prefix
    pub fn open_node(&self, path: &str) -> Result<DeviceFile> {
        let name = node_name(path);

        let key = {
            let slots = self.read_slots();
            slots
                .iter()
                .find(|(_, slot)| slot.node == name && slot.is_live())
                .map(|(key, _)| *key)
        };

        match key {
            Some(key) => self.open(key),
            None => Err(DriverError::DeviceNotFound(path.to_string())),
        }
    }

    /// Physical detach of `key`
    ///
    /// Moves the session to `Detaching` and drops the attachment's
    /// reference. Handles already open keep working until closed. Returns
    /// false when nothing was attached under `key`.
    pub fn detach(&self, key: DeviceKey) -> bool {
        let owner = {
            let mut slots = self.write_slots();
            slots.get_mut(&key).and_then(|slot| slot.owner.take())
        };

        let Some(session) = owner else {
            debug!("Detach of {} ignored: not attached", key);
            return false;
        };

        session.mark_detaching();
        let remaining = session.references() - 1;
        info!(
            "Detached {} ({}), {} consumer references remain",
            session.node(),
            key,
            remaining
        );
        session.release();
        self.prune();
        true
    }

    /// Whether `key` has an attachment reference
    pub fn is_attached(&self, key: DeviceKey) -> bool {
        self.read_slots()
            .get(&key)
            .is_some_and(|slot| slot.owner.is_some())
    }

    /// Snapshot of every reachable session, ordered by minor
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let live: Vec<(u32, Session)> = {
            let slots = self.read_slots();
            slots
                .values()
                .filter_map(|slot| Session::upgrade(&slot.lookup).map(|s| (slot.minor, s)))
                .collect()
        };

        let mut summaries: Vec<(u32, SessionSummary)> = live
            .into_iter()
            .map(|(minor, session)| {
                let mut summary = session.summary();
                // not counting the snapshot's own reference
                summary.references -= 1;
                session.release();
                (minor, summary)
            })
            .collect();
        summaries.sort_by_key(|(minor, _)| *minor);
        summaries.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Forget entries whose session has been destroyed
    pub fn prune(&self) -> usize {
        let mut slots = self.write_slots();
        let before = slots.len();
        slots.retain(|_, slot| slot.is_live());
        let removed = before - slots.len();
        if removed > 0 {
            debug!("Pruned {} destroyed sessions", removed);
        }
        removed
    }

    /// Detach everything; used at shutdown
    pub fn detach_all(&self) {
        let keys: Vec<DeviceKey> = self
            .read_slots()
            .iter()
            .filter(|(_, slot)| slot.owner.is_some())
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.detach(key);
        }
    }
}
