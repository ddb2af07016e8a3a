//! Session lifecycle integration tests
//!
//! Drives the registry and file handles against the mock transport:
//! attach, open, concurrent I/O, detach while handles are open, and the
//! final release.
//!
//! Run with: `cargo test -p driver --test lifecycle_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockTransport, interrupt_in, stm32leds_interface};
use common::{DeviceKey, Direction, InterfaceDescriptor, LifecycleState, TransferError, TransferStatus};
use driver::{DeviceRegistry, DriverError};
use protocol::{CommandFrame, LedMask};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const KEY: DeviceKey = DeviceKey {
    bus: 1,
    address: 7,
    interface: 0,
};

fn attached(transport: &Arc<MockTransport>) -> DeviceRegistry {
    let registry = DeviceRegistry::default();
    registry
        .attach(KEY, &stm32leds_interface(), transport.clone())
        .expect("attach");
    registry
}

// ============================================================================
// Frame validation
// ============================================================================

#[test]
fn test_short_frame_rejected_without_side_effects() {
    let transport = MockTransport::new();
    transport.set_press_count(3);
    let registry = attached(&transport);
    let file = registry.open(KEY).unwrap();

    file.read(&mut [0u8; 10]).unwrap();
    let before = file.session().cached_state();

    let frame = [1u8, 0, 0, 0, 0, 0, 0, 0, 1];
    assert_eq!(
        file.write(&frame),
        Err(DriverError::InvalidFrameLength { actual: 9 })
    );

    assert_eq!(file.session().cached_state(), before);
    assert_eq!(transport.submissions(), 0);
    assert_eq!(file.session().pending_writes(), 0);
    assert_eq!(file.session().references(), 2);
    file.close();
}

#[test]
fn test_oversized_frame_rejected() {
    let transport = MockTransport::new();
    let registry = attached(&transport);
    let file = registry.open(KEY).unwrap();

    assert_eq!(
        file.write(&[0u8; 64]),
        Err(DriverError::InvalidFrameLength { actual: 64 })
    );
    assert!(transport.written().is_empty());
}

// ============================================================================
// Request / response
// ============================================================================

#[test]
fn test_query_then_read_press_count() {
    let transport = MockTransport::new();
    transport.set_press_count(41);
    let registry = attached(&transport);
    let file = registry.open_node("/dev/stm32leds0").unwrap();

    let query = [1u8, 0, 0, 0, 0, 0, 0, 0, 1, 0xFF];
    assert_eq!(file.write(&query).unwrap(), 10);

    let mut buf = [0u8; 10];
    assert_eq!(file.read(&mut buf).unwrap(), 10);
    assert_eq!(buf[1], 41);

    transport.press_button();
    assert_eq!(file.read_report().unwrap().press_count(), 42);

    transport.wait_for_completions();
    assert_eq!(transport.written(), vec![query.to_vec()]);
    assert_eq!(file.session().cached_state().leds, None);
    file.close();
}

// ============================================================================
// Completion bookkeeping
// ============================================================================

#[test]
fn test_every_completion_status_releases_buffer() {
    let statuses = [
        TransferStatus::Completed { actual_length: 10 },
        TransferStatus::Cancelled,
        TransferStatus::Shutdown,
        TransferStatus::Failed(TransferError::Stall),
        TransferStatus::Failed(TransferError::Io),
    ];

    for status in statuses {
        let transport = MockTransport::new();
        transport.set_completion_status(Some(status.clone()));
        let registry = attached(&transport);
        let file = registry.open(KEY).unwrap();

        for _ in 0..3 {
            file.send(&CommandFrame::set_leds(LedMask::GREEN)).unwrap();
        }
        transport.wait_for_completions();

        let session = file.session();
        assert_eq!(session.pending_writes(), 0, "status {:?}", status);
        assert_eq!(transport.completions(), 3);
        assert_eq!(session.references(), 2);

        let cached = session.cached_state();
        let total = cached.writes_completed + cached.writes_cancelled + cached.writes_failed;
        assert_eq!(total, 3);
        if status.is_cancellation() {
            assert_eq!(cached.writes_cancelled, 3);
            assert_eq!(cached.last_write_error, None);
        }
        file.close();
    }
}

#[test]
fn test_in_flight_write_survives_detach_and_close() {
    let transport = MockTransport::new();
    transport.set_completion_delay(Duration::from_millis(100));
    let registry = attached(&transport);
    let file = registry.open(KEY).unwrap();

    file.send(&CommandFrame::set_leds(LedMask::RED)).unwrap();
    registry.detach(KEY);
    file.close();

    // The completion still holds a reference
    assert_eq!(transport.releases(), 0);

    transport.wait_for_completions();
    assert_eq!(transport.releases(), 1);
    assert!(registry.sessions().is_empty());
}

#[test]
fn test_handle_released_only_after_queued_writes_complete() {
    let transport = MockTransport::new();
    transport.set_completion_delay(Duration::from_millis(30));
    let registry = attached(&transport);
    let file = registry.open(KEY).unwrap();

    for mask in [LedMask::RED, LedMask::GREEN, LedMask::BLUE, LedMask::ORANGE] {
        file.send(&CommandFrame::set_leds(mask)).unwrap();
    }
    registry.detach(KEY);
    file.close();

    transport.wait_for_completions();
    assert_eq!(transport.releases(), 1);
    assert_eq!(transport.queued_at_release(), 0);
    assert_eq!(transport.completions(), 4);
}

// ============================================================================
// Detach
// ============================================================================

#[test]
fn test_open_while_detaching() {
    let transport = MockTransport::new();
    let registry = attached(&transport);
    let holder = registry.open(KEY).unwrap();

    assert!(registry.detach(KEY));
    assert_eq!(holder.session().state(), LifecycleState::Detaching);

    let late = registry.open(KEY).expect("open while detaching");
    assert_eq!(late.session().state(), LifecycleState::Detaching);
    assert_eq!(late.write(&[0u8; 10]), Err(DriverError::DeviceGone));
    assert_eq!(late.read(&mut [0u8; 10]), Err(DriverError::DeviceGone));
    assert_eq!(transport.submissions(), 0);

    late.close();
    holder.close();
    assert_eq!(transport.releases(), 1);
    assert!(matches!(
        registry.open(KEY),
        Err(DriverError::DeviceNotFound(_))
    ));
}

#[test]
fn test_drained_read_after_detach() {
    let transport = MockTransport::new();
    transport.set_drain_after_invalidate(true);
    transport.set_press_count(5);
    let registry = attached(&transport);
    let file = registry.open(KEY).unwrap();

    registry.detach(KEY);

    let mut buf = [0u8; 10];
    assert_eq!(file.read(&mut buf).unwrap(), 10);
    assert_eq!(buf[1], 5);
    assert_eq!(file.write(&[0u8; 10]), Err(DriverError::DeviceGone));
    file.close();
}

#[test]
fn test_attach_without_outbound_endpoint() {
    let transport = MockTransport::new();
    let registry = DeviceRegistry::default();
    let interface = InterfaceDescriptor {
        number: 0,
        endpoints: vec![interrupt_in(0x81, 64, 1)],
    };

    assert_eq!(
        registry.attach(KEY, &interface, transport.clone()).unwrap_err(),
        DriverError::EndpointNotFound(Direction::Out)
    );
    assert!(registry.sessions().is_empty());
    assert!(matches!(
        registry.open(KEY),
        Err(DriverError::DeviceNotFound(_))
    ));
    assert!(registry.open_node("stm32leds0").is_err());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_hardware_round_trips_never_overlap() {
    let transport = MockTransport::new();
    transport.set_latency(Duration::from_millis(5));
    let registry = attached(&transport);

    let reader = registry.open(KEY).unwrap();
    let writer = registry.open(KEY).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let read_barrier = barrier.clone();
    let reads = thread::spawn(move || {
        read_barrier.wait();
        for _ in 0..10 {
            reader.read(&mut [0u8; 10]).unwrap();
        }
        reader.close();
    });

    let write_barrier = barrier.clone();
    let writes = thread::spawn(move || {
        write_barrier.wait();
        for i in 0..10u8 {
            writer
                .send(&CommandFrame::set_leds(LedMask(i & 0x0F)))
                .unwrap();
        }
        writer.close();
    });

    reads.join().unwrap();
    writes.join().unwrap();
    transport.wait_for_completions();

    assert_eq!(transport.reads(), 10);
    assert_eq!(transport.submissions(), 10);
    assert_eq!(transport.overlaps(), 0);
}

#[test]
fn test_concurrent_close_and_detach() {
    for _ in 0..20 {
        let transport = MockTransport::new();
        let registry = Arc::new(attached(&transport));
        let files: Vec<_> = (0..4).map(|_| registry.open(KEY).unwrap()).collect();
        let barrier = Arc::new(Barrier::new(files.len() + 1));

        let mut handles = Vec::new();
        for file in files {
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                let _ = file.write(&[1u8; 10]);
                file.close();
            }));
        }

        let detacher = {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.detach(KEY);
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        detacher.join().unwrap();
        transport.wait_for_completions();

        assert_eq!(transport.releases(), 1);
        assert!(registry.sessions().is_empty());
    }
}

#[test]
fn test_completion_runs_off_caller_thread() {
    let transport = MockTransport::new();
    transport.set_completion_delay(Duration::from_millis(20));
    let registry = attached(&transport);
    let file = registry.open(KEY).unwrap();

    let started = std::time::Instant::now();
    file.send(&CommandFrame::set_leds(LedMask::ALL)).unwrap();
    assert!(started.elapsed() < DEFAULT_TEST_TIMEOUT);
    assert_eq!(file.session().pending_writes(), 1);

    transport.wait_for_completions();
    assert_eq!(file.session().pending_writes(), 0);
    assert_eq!(file.session().cached_state().leds, Some(LedMask::ALL));
    file.close();
}
