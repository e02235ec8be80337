//! Demultiplexing of inbound `(handle, payload)` notifications.
//!
//! Runs on the backend's delivery task.  Work done inline is bounded: strip
//! framing, hand the bytes to the engine or to the raw listeners, return.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::engine::BoardHandle;
use crate::handle_cache::HandleCache;
use crate::protocol::hex_bytes;
use crate::transport::NotificationFraming;

/// Listener for raw notifications on one handle.
pub type RawCallback = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Identity of one raw listener, returned when it is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listener {
    id: SubscriptionId,
    handle: u16,
    callback: RawCallback,
}

// ── SubscriptionRegistry ─────────────────────────────────────────────────────

/// Raw listeners keyed by notification handle.
///
/// Callbacks are cloned out under the read lock and invoked after it is
/// released, so a callback may add or remove listeners without deadlocking.
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: u16, callback: RawCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Listener {
            id,
            handle,
            callback,
        });
        id
    }

    /// Drop every listener on `handle` and install `callback` alone.
    pub fn replace(&self, handle: u16, callback: RawCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.handle != handle);
        listeners.push(Listener {
            id,
            handle,
            callback,
        });
        id
    }

    /// Remove one listener.  Returns `false` if it was not registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Remove every listener on `handle`, returning how many were dropped.
    pub fn clear(&self, handle: u16) -> usize {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.handle != handle);
        before - listeners.len()
    }

    pub fn clear_all(&self) {
        self.listeners.write().clear();
    }

    pub fn callbacks_for(&self, handle: u16) -> Vec<RawCallback> {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.handle == handle)
            .map(|l| Arc::clone(&l.callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

// ── NotificationRouter ───────────────────────────────────────────────────────

pub struct NotificationRouter {
    control_handle: u16,
    framing: NotificationFraming,
    board: Arc<BoardHandle>,
    handles: Arc<HandleCache>,
    registry: Arc<SubscriptionRegistry>,
}

impl NotificationRouter {
    /// `control_handle` is the value handle of the multiplexed notification
    /// characteristic.
    pub fn new(
        control_handle: u16,
        framing: NotificationFraming,
        board: Arc<BoardHandle>,
        handles: Arc<HandleCache>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            control_handle,
            framing,
            board,
            handles,
            registry,
        }
    }

    /// Dispatch one notification, in delivery order, on the calling task.
    pub fn route(&self, handle: u16, payload: &[u8]) {
        if handle == self.control_handle {
            let value = self.framing.unwrap(payload);
            debug!("Notify 0x{handle:04x}: {}", hex_bytes(value));
            if let Err(e) = self.board.notify_char_changed(value) {
                debug!("dropping control notification: {e}");
            }
            return;
        }

        let callbacks = self.registry.callbacks_for(handle);
        if callbacks.is_empty() {
            match self.handles.uuid_for_handle(handle) {
                Some(uuid) => debug!("no listener on {uuid}, dropping {} byte(s)", payload.len()),
                None => debug!("no listener on 0x{handle:04x}, dropping {} byte(s)", payload.len()),
            }
            return;
        }
        for callback in &callbacks {
            callback(handle, payload);
        }
    }

    pub fn control_handle(&self) -> u16 {
        self.control_handle
    }
}
