//! USB type abstractions shared by the driver core and the hardware layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque key identifying one attached interface of one physical device
///
/// Bus number and device address are reassigned by the host on every
/// plug-in, so a key never outlives the attachment it was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
    pub interface: u8,
}

impl DeviceKey {
    pub fn new(bus: u8, address: u8, interface: u8) -> Self {
        Self {
            bus,
            address,
            interface,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}-{:03}:{}", self.bus, self.address, self.interface)
    }
}

/// Endpoint transfer type (bits 0-1 of bmAttributes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint direction (bit 7 of bEndpointAddress)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Endpoint descriptor fields the driver cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// bEndpointAddress, direction in bit 7
    pub address: u8,
    pub transfer_type: TransferType,
    /// wMaxPacketSize
    pub max_packet_size: u16,
    /// bInterval, in frames for interrupt endpoints
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn direction(&self) -> Direction {
        Direction::from_address(self.address)
    }

    pub fn is_interrupt_in(&self) -> bool {
        self.transfer_type == TransferType::Interrupt && self.direction() == Direction::In
    }

    pub fn is_interrupt_out(&self) -> bool {
        self.transfer_type == TransferType::Interrupt && self.direction() == Direction::Out
    }
}

/// Interface descriptor: endpoints in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Lifecycle of a session object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LifecycleState {
    /// Endpoints resolved, not yet published
    Attaching = 0,
    /// Published and usable
    Active = 1,
    /// Physically gone; consumer references stay valid until closed
    Detaching = 2,
    /// Last reference released, finalizer ran
    Destroyed = 3,
}

impl LifecycleState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Attaching,
            1 => LifecycleState::Active,
            2 => LifecycleState::Detaching,
            _ => LifecycleState::Destroyed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Attaching => "attaching",
            LifecycleState::Active => "active",
            LifecycleState::Detaching => "detaching",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a registered session, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: DeviceKey,
    /// Device node name, e.g. `stm32leds0`
    pub node: String,
    pub state: LifecycleState,
    /// Live references, including the attachment's own
    pub references: usize,
    pub press_count: u8,
}
