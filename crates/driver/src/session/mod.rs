//! Session object
//!
//! One [`Session`] per attached interface. A `Session` value is a counted
//! reference to the shared record: [`Session::acquire`] hands out another
//! reference and [`Session::release`] (or dropping the value) gives one
//! back. The record is finalized by whichever release takes the count from
//! one to zero; the finalizer releases the device handle and marks the
//! session destroyed.
//!
//! The registry keeps a weak lookup reference next to the attachment's own
//! reference. Upgrading the weak reference only succeeds while the count is
//! non-zero, so a destroyed session can never be handed out again.
//!
//! # Locking
//!
//! Two independent mutexes, never held at the same time:
//!
//! - the request lock serializes hardware round trips (a blocking read, or
//!   the submission of a write)
//! - the state guard protects [`CachedState`], which both reads and write
//!   completions update

mod read;
mod state;
mod write;

pub use state::CachedState;

use crate::endpoints::EndpointPair;
use common::{DeviceKey, LifecycleState, SessionSummary, Transport};
use state::{AtomicLifecycle, lock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Read timeout derived from the IN endpoint's polling interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTimeouts {
    /// Timeout granted per unit of bInterval
    pub per_interval: Duration,
    /// Lower bound, so a zero interval never means "wait forever"
    pub min_read: Duration,
}

impl TransferTimeouts {
    pub fn read_timeout(&self, interval: u8) -> Duration {
        (self.per_interval * u32::from(interval)).max(self.min_read)
    }
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            per_interval: Duration::from_secs(1),
            min_read: Duration::from_millis(100),
        }
    }
}

/// Shared record behind every [`Session`] reference
pub(crate) struct SessionShared {
    key: DeviceKey,
    node: String,
    endpoints: EndpointPair,
    timeouts: TransferTimeouts,
    transport: Arc<dyn Transport>,
    state: AtomicLifecycle,
    request_lock: Mutex<()>,
    cached: Mutex<CachedState>,
    /// Write buffers allocated and not yet released
    outstanding_buffers: Arc<AtomicUsize>,
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        self.state.store(LifecycleState::Destroyed);
        self.transport.release();
        info!(
            "Session {} ({}) destroyed, device handle released",
            self.node, self.key
        );
    }
}

/// Counted reference to a session
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Create the attachment's reference; the session starts out `Attaching`
    pub(crate) fn new(
        key: DeviceKey,
        node: String,
        endpoints: EndpointPair,
        timeouts: TransferTimeouts,
        transport: Arc<dyn Transport>,
    ) -> Self {
        debug!(
            "Creating session {} for {} over {}",
            node,
            key,
            transport.describe()
        );
        Self {
            shared: Arc::new(SessionShared {
                key,
                node,
                endpoints,
                timeouts,
                transport,
                state: AtomicLifecycle::new(LifecycleState::Attaching),
                request_lock: Mutex::new(()),
                cached: Mutex::new(CachedState::default()),
                outstanding_buffers: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Acquire a reference through a weak lookup, if the session is still alive
    pub(crate) fn upgrade(weak: &Weak<SessionShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionShared> {
        Arc::downgrade(&self.shared)
    }

    /// Take another reference to the same session
    pub fn acquire(&self) -> Session {
        let shared = Arc::clone(&self.shared);
        trace!(
            "Session {} acquired ({} refs)",
            shared.node,
            Arc::strong_count(&shared)
        );
        Session { shared }
    }

    /// Give this reference back, finalizing the session if it was the last
    pub fn release(self) {
        let node = self.shared.node.clone();
        match Arc::into_inner(self.shared) {
            Some(last) => {
                debug!("Session {} released its last reference", node);
                drop(last);
            }
            None => trace!("Session {} released", node),
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.shared.key
    }

    /// Device node name, e.g. `stm32leds0`
    pub fn node(&self) -> &str {
        &self.shared.node
    }

    pub fn endpoints(&self) -> EndpointPair {
        self.shared.endpoints
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state.load()
    }

    /// Live references, this one included
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Write buffers still owned by the transport
    pub fn pending_writes(&self) -> usize {
        self.shared.outstanding_buffers.load(Ordering::Acquire)
    }

    /// Copy of the cached state, taken under the state guard
    pub fn cached_state(&self) -> CachedState {
        lock(&self.shared.cached).clone()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key(),
            node: self.node().to_string(),
            state: self.state(),
            references: self.references(),
            press_count: lock(&self.shared.cached).press_count,
        }
    }

    /// `Attaching -> Active`, once endpoints are resolved and before lookup
    pub(crate) fn mark_active(&self) -> bool {
        self.shared
            .state
            .transition(LifecycleState::Attaching, LifecycleState::Active)
    }

    /// `Active -> Detaching` on physical detach
    ///
    /// The device handle is invalidated for new work. References already
    /// handed out stay valid until their holders release them.
    pub(crate) fn mark_detaching(&self) -> bool {
        let moved = self
            .shared
            .state
            .transition(LifecycleState::Active, LifecycleState::Detaching)
            || self
                .shared
                .state
                .transition(LifecycleState::Attaching, LifecycleState::Detaching);
        if moved {
            self.shared.transport.invalidate();
        }
        moved
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.shared.key)
            .field("node", &self.shared.node)
            .field("state", &self.state())
            .field("references", &self.references())
            .finish()
    }
}
