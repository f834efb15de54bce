//! # Change Tracking
//!
//! The engine-wide "last changed" marker, the handle sources use to report
//! external changes, and explicit subscriptions for accessor change listeners.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

/// Monotonic marker advanced on every reported change.
///
/// The marker is a nanosecond offset from the engine's creation. Every call to
/// [`ChangeMarker::advance`] yields a value strictly greater than any value
/// observed before it, even when the clock has not moved.
#[derive(Debug)]
pub(crate) struct ChangeMarker {
    epoch: Instant,
    last: AtomicU64,
}

impl ChangeMarker {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    pub(crate) fn advance(&self) -> u64 {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let step = |previous: u64| {
            if now > previous {
                now
            } else {
                previous.saturating_add(1)
            }
        };
        // The closure never returns None, so both arms carry the previous value.
        let previous = match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |previous| {
                Some(step(previous))
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        step(previous)
    }
}

/// Handle given to a source so it can report that its data changed.
///
/// Holds only a weak reference: reports arriving after the engine is dropped
/// are ignored.
#[derive(Clone)]
pub struct ChangeReporter {
    marker: Weak<ChangeMarker>,
}

impl ChangeReporter {
    pub(crate) fn new(marker: &Arc<ChangeMarker>) -> Self {
        Self {
            marker: Arc::downgrade(marker),
        }
    }

    /// Report an external change. Returns false when the engine is gone.
    pub fn report(&self) -> bool {
        match self.marker.upgrade() {
            Some(marker) => {
                let value = marker.advance();
                debug!(marker = value, "Config source reported a change");
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ChangeReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeReporter")
            .field("attached", &(self.marker.strong_count() > 0))
            .finish()
    }
}

/// Callback invoked with `(key, old, new)` when a resolved value changes.
pub type ChangeListener<V> = Arc<dyn Fn(&str, Option<&V>, Option<&V>) + Send + Sync>;

pub(crate) struct Listeners<V> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, ChangeListener<V>)>>,
}

impl<V> Listeners<V> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: ChangeListener<V>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, listener));
        id
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn notify(&self, key: &str, old: Option<&V>, new: Option<&V>) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let snapshot: Vec<ChangeListener<V>> = self
            .entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(key, old, new);
        }
    }
}

pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: u64);
}

impl<V: Send + Sync> Unsubscribe for Listeners<V> {
    fn unsubscribe(&self, id: u64) {
        self.entries.write().retain(|(entry, _)| *entry != id);
    }
}

/// Subscription to an accessor's change notifications.
///
/// The listener stays registered until [`ChangeSubscription::unsubscribe`] is
/// called or the subscription is dropped.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct ChangeSubscription {
    listeners: Weak<dyn Unsubscribe>,
    id: u64,
}

impl ChangeSubscription {
    pub(crate) fn new(listeners: Weak<dyn Unsubscribe>, id: u64) -> Self {
        Self { listeners, id }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("id", &self.id)
            .finish()
    }
}
