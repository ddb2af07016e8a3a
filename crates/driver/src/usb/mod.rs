//! USB subsystem
//!
//! The hardware side of the driver: an rusb-backed [`Transport`] per
//! claimed interface, hot-plug detection, and the dedicated thread that
//! pumps libusb events without blocking the Tokio runtime.
//!
//! [`Transport`]: common::Transport

pub mod device;
pub mod manager;
pub mod transfers;
pub mod worker;

pub use device::{OpenOptions, UsbTransport};
pub use manager::{DEFAULT_ID_TABLE, DeviceManager, UsbSettings};
pub use worker::{UsbWorkerThread, spawn_usb_worker};
