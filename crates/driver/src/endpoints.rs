//! Endpoint resolution at attach time

use crate::error::{DriverError, Result};
use common::{Direction, InterfaceDescriptor};
use tracing::debug;

/// Interrupt IN endpoint the status reports arrive on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundEndpoint {
    pub address: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// Interrupt OUT endpoint command frames are sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundEndpoint {
    pub address: u8,
    pub interval: u8,
}

/// Endpoints of one session; fixed once the session exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub inbound: InboundEndpoint,
    pub outbound: OutboundEndpoint,
}

/// Pick the first interrupt IN and the first interrupt OUT endpoint
///
/// Endpoints are scanned in declaration order; later matches are ignored.
pub fn resolve_endpoints(interface: &InterfaceDescriptor) -> Result<EndpointPair> {
    let mut inbound = None;
    let mut outbound = None;

    for endpoint in &interface.endpoints {
        if inbound.is_none() && endpoint.is_interrupt_in() {
            debug!(
                "Interface {}: interrupt IN endpoint {:#04x} (max packet {}, interval {})",
                interface.number, endpoint.address, endpoint.max_packet_size, endpoint.interval
            );
            inbound = Some(InboundEndpoint {
                address: endpoint.address,
                max_packet_size: endpoint.max_packet_size,
                interval: endpoint.interval,
            });
        }

        if outbound.is_none() && endpoint.is_interrupt_out() {
            debug!(
                "Interface {}: interrupt OUT endpoint {:#04x} (interval {})",
                interface.number, endpoint.address, endpoint.interval
            );
            outbound = Some(OutboundEndpoint {
                address: endpoint.address,
                interval: endpoint.interval,
            });
        }
    }

    let inbound = inbound.ok_or(DriverError::EndpointNotFound(Direction::In))?;
    let outbound = outbound.ok_or(DriverError::EndpointNotFound(Direction::Out))?;

    Ok(EndpointPair { inbound, outbound })
}
