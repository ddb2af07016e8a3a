//! rusb-backed transport for one claimed interface
//!
//! Reads run on the caller's thread. Writes are handed to a per-device
//! writer thread through a bounded queue, and their completion callbacks
//! run on that thread, never on the submitter's.

use super::transfers::{map_rusb_error, read_interrupt, write_interrupt};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use common::{
    Completion, CompletionFn, DeviceKey, EndpointDescriptor, InterfaceDescriptor, TransferBuffer,
    TransferError, TransferId, TransferStatus, TransferType, Transport,
};
use rusb::{Context, Device, DeviceHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How an interface is opened and driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub interface: u8,
    pub detach_kernel_driver: bool,
    /// Capacity of the write queue
    pub max_pending_writes: usize,
    pub write_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            interface: 0,
            detach_kernel_driver: true,
            max_pending_writes: 16,
            write_timeout: Duration::from_secs(1),
        }
    }
}

struct WriteJob {
    id: TransferId,
    endpoint: u8,
    buffer: TransferBuffer,
    on_complete: CompletionFn,
}

/// Transport over a claimed rusb interface
pub struct UsbTransport {
    handle: Arc<DeviceHandle<Context>>,
    key: DeviceKey,
    vendor_id: u16,
    product_id: u16,
    descriptor: InterfaceDescriptor,
    kernel_driver_detached: bool,
    /// Device unplugged or reported gone; shared with the writer
    gone: Arc<AtomicBool>,
    released: AtomicBool,
    queue: Sender<WriteJob>,
    next_id: AtomicU64,
}

impl UsbTransport {
    /// Open `device`, claim the configured interface and start its writer
    pub fn open(device: &Device<Context>, options: OpenOptions) -> Result<Arc<Self>, rusb::Error> {
        let number = options.interface;
        let device_descriptor = device.device_descriptor()?;
        let key = DeviceKey::new(device.bus_number(), device.address(), number);
        let descriptor = interface_descriptor(device, number)?;

        let handle = device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", key, e);
            e
        })?;
        debug!("Opened device {}", key);

        let mut kernel_driver_detached = false;
        if options.detach_kernel_driver {
            match handle.kernel_driver_active(number) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {} on {}", number, key);
                    match handle.detach_kernel_driver(number) {
                        Ok(()) => kernel_driver_detached = true,
                        Err(e) => warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            number, e
                        ),
                    }
                }
                Ok(false) => debug!("No kernel driver active on interface {}", number),
                Err(e) => debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    number, e
                ),
            }
        }

        if let Err(e) = handle.claim_interface(number) {
            warn!("Failed to claim interface {} on {}: {}", number, key, e);
            if kernel_driver_detached {
                let _ = handle.attach_kernel_driver(number);
            }
            return Err(e);
        }
        debug!("Claimed interface {} on {}", number, key);

        let handle = Arc::new(handle);
        let gone = Arc::new(AtomicBool::new(false));
        let (queue, jobs) = bounded(options.max_pending_writes.max(1));

        let writer = Writer {
            handle: Arc::clone(&handle),
            gone: Arc::clone(&gone),
            jobs,
            timeout: options.write_timeout,
        };
        thread::Builder::new()
            .name(format!("usb-writer-{}", key))
            .spawn(move || writer.run())
            .map_err(|e| {
                warn!("Failed to spawn writer thread for {}: {}", key, e);
                let _ = handle.release_interface(number);
                rusb::Error::Other
            })?;

        Ok(Arc::new(Self {
            handle,
            key,
            vendor_id: device_descriptor.vendor_id(),
            product_id: device_descriptor.product_id(),
            descriptor,
            kernel_driver_detached,
            gone,
            released: AtomicBool::new(false),
            queue,
            next_id: AtomicU64::new(1),
        }))
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// Endpoints of the claimed interface, alternate setting 0
    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }
}

impl Transport for UsbTransport {
    fn transfer_sync(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        if self.gone.load(Ordering::Acquire) {
            return Err(TransferError::NoDevice);
        }

        let result = read_interrupt(&self.handle, endpoint, buf, timeout);
        if result == Err(TransferError::NoDevice) {
            self.gone.store(true, Ordering::Release);
        }
        result
    }

    fn submit_async(
        &self,
        endpoint: u8,
        buffer: TransferBuffer,
        interval: u8,
        on_complete: CompletionFn,
    ) -> Result<TransferId, TransferError> {
        if self.gone.load(Ordering::Acquire) {
            return Err(TransferError::NoDevice);
        }

        let id = TransferId(self.next_id.fetch_add(1, Ordering::AcqRel));
        debug!(
            "Queueing transfer {:?} to {:#x} on {} (interval {})",
            id, endpoint, self.key, interval
        );

        let job = WriteJob {
            id,
            endpoint,
            buffer,
            on_complete,
        };
        match self.queue.try_send(job) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => Err(TransferError::Busy),
            Err(TrySendError::Closed(_)) => Err(TransferError::NoDevice),
        }
    }

    fn invalidate(&self) {
        self.gone.store(true, Ordering::Release);
        debug!("Invalidated transport for {}", self.key);
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        // Every queued job holds a session reference, so the queue is
        // already empty when the finalizer gets here. Closing it stops the
        // writer.
        self.queue.close();

        let number = self.descriptor.number;
        if let Err(e) = self.handle.release_interface(number) {
            debug!("Failed to release interface {} on {}: {}", number, self.key, e);
        }
        if self.kernel_driver_detached {
            match self.handle.attach_kernel_driver(number) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", number),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    number, e
                ),
            }
        }
        info!("Released {} ({})", self.key, self.describe());
    }

    fn describe(&self) -> String {
        format!(
            "{:04x}:{:04x} at {}",
            self.vendor_id, self.product_id, self.key
        )
    }
}

/// Write queue consumer
struct Writer {
    handle: Arc<DeviceHandle<Context>>,
    gone: Arc<AtomicBool>,
    jobs: Receiver<WriteJob>,
    timeout: Duration,
}

impl Writer {
    fn run(self) {
        debug!("Writer thread started");

        while let Ok(job) = self.jobs.recv_blocking() {
            let status = self.execute(&job);
            let WriteJob {
                id,
                buffer,
                on_complete,
                ..
            } = job;
            on_complete(Completion { id, status, buffer });
        }

        debug!("Writer thread exiting");
    }

    fn execute(&self, job: &WriteJob) -> TransferStatus {
        if self.gone.load(Ordering::Acquire) {
            return TransferStatus::Shutdown;
        }

        match write_interrupt(
            &self.handle,
            job.endpoint,
            job.buffer.as_slice(),
            self.timeout,
        ) {
            Ok(actual_length) => TransferStatus::Completed { actual_length },
            Err(TransferError::NoDevice) => {
                self.gone.store(true, Ordering::Release);
                TransferStatus::Shutdown
            }
            Err(TransferError::Cancelled) => TransferStatus::Cancelled,
            Err(e) => TransferStatus::Failed(e),
        }
    }
}

/// Read the endpoint layout of interface `number` from the active configuration
pub fn interface_descriptor(
    device: &Device<Context>,
    number: u8,
) -> Result<InterfaceDescriptor, rusb::Error> {
    let config = device.active_config_descriptor()?;
    let interface = config
        .interfaces()
        .find(|interface| interface.number() == number)
        .ok_or(rusb::Error::NotFound)?;
    let setting = interface
        .descriptors()
        .next()
        .ok_or(rusb::Error::NotFound)?;

    let endpoints = setting
        .endpoint_descriptors()
        .map(|endpoint| EndpointDescriptor {
            address: endpoint.address(),
            transfer_type: map_transfer_type(endpoint.transfer_type()),
            max_packet_size: endpoint.max_packet_size(),
            interval: endpoint.interval(),
        })
        .collect();

    Ok(InterfaceDescriptor { number, endpoints })
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferType {
    match transfer_type {
        rusb::TransferType::Control => TransferType::Control,
        rusb::TransferType::Isochronous => TransferType::Isochronous,
        rusb::TransferType::Bulk => TransferType::Bulk,
        rusb::TransferType::Interrupt => TransferType::Interrupt,
    }
}

/// Map a claim failure to something worth showing a user
pub fn describe_open_error(err: rusb::Error) -> String {
    match err {
        rusb::Error::Access => "permission denied (check udev rules)".to_string(),
        rusb::Error::Busy => "interface claimed by another driver".to_string(),
        rusb::Error::NotFound => "interface not found".to_string(),
        other => map_rusb_error(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferType::Interrupt
        );
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), TransferType::Bulk);
    }

    #[test]
    fn test_default_options() {
        let options = OpenOptions::default();
        assert_eq!(options.interface, 0);
        assert!(options.detach_kernel_driver);
        assert!(options.max_pending_writes > 0);
    }

    #[test]
    fn test_describe_open_error() {
        assert!(describe_open_error(rusb::Error::Access).contains("permission"));
        assert_eq!(describe_open_error(rusb::Error::Pipe), "endpoint stalled");
    }
}
