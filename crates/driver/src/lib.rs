//! STM32 LED board driver
//!
//! Mediates concurrent access to an STM32F4 Discovery board running the
//! LED/button firmware, over its interrupt endpoints, while the board can
//! be unplugged at any moment.
//!
//! - [`registry::DeviceRegistry`] attaches, opens and detaches devices
//! - [`session::Session`] is the counted per-device record behind every
//!   open handle, with a serialized read path and an asynchronous write
//!   pipeline
//! - [`file::DeviceFile`] is the consumer handle with a byte-exact
//!   read/write contract
//! - [`usb`] provides the rusb transport and hot-plug worker
//!
//! # Example
//!
//! ```
//! use common::DeviceKey;
//! use common::test_utils::{MockTransport, stm32leds_interface};
//! use driver::DeviceRegistry;
//! use protocol::{CommandFrame, LedMask};
//!
//! let registry = DeviceRegistry::default();
//! let key = DeviceKey::new(1, 4, 0);
//! let node = registry
//!     .attach(key, &stm32leds_interface(), MockTransport::new())
//!     .unwrap();
//! assert_eq!(node.name, "stm32leds0");
//!
//! let file = registry.open_node("/dev/stm32leds0").unwrap();
//! file.send(&CommandFrame::set_leds(LedMask::RED | LedMask::BLUE)).unwrap();
//! file.close();
//! ```

pub mod config;
pub mod endpoints;
pub mod error;
pub mod file;
pub mod registry;
pub mod session;
pub mod usb;

pub use endpoints::{EndpointPair, InboundEndpoint, OutboundEndpoint, resolve_endpoints};
pub use error::{DriverError, Result};
pub use file::DeviceFile;
pub use registry::{DeviceNode, DeviceRegistry};
pub use session::{CachedState, Session, TransferTimeouts};
