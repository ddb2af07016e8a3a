//! Common utilities for the STM32 LED driver
//!
//! This crate provides functionality shared between the driver core and its
//! hardware layer: the transport collaborator interface, USB descriptor and
//! lifecycle types, error handling, logging setup, the async channel bridge
//! for USB thread communication, and test doubles.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod transport;
pub mod usb_types;

pub use channel::{UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use transport::{
    Completion, CompletionFn, TransferBuffer, TransferError, TransferId, TransferStatus, Transport,
};
pub use usb_types::{
    DeviceKey, Direction, EndpointDescriptor, InterfaceDescriptor, LifecycleState, SessionSummary,
    TransferType,
};
