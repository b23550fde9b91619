//! Live scalar signals.
//!
//! A [`Signal`] is a named process value with synchronous read/write access
//! and callback-based change notification, the unit of data flow between the
//! device layer and the widget-binding core. Unlike a watch channel, `set`
//! delivers the new value to every subscriber before it returns, so a caller
//! that binds and then writes observes a fully consistent downstream state.
//!
//! Signals may carry a channel *address* (an EPICS-style process-variable
//! name). Addresses are opaque to the core; passthrough widgets hand them to
//! the UI layer via `Sink::set_channel`, and the [`SignalHub`] resolves them
//! back to signals for display.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Token returned by [`Signal::subscribe`], used to unsubscribe exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

struct SignalShared<T> {
    name: String,
    address: Option<String>,
    value: Mutex<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

/// A named live value with synchronous subscriber notification.
///
/// Cloning a `Signal` clones a handle to the same underlying channel.
pub struct Signal<T> {
    shared: Arc<SignalShared<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.shared.name)
            .field("address", &self.shared.address)
            .field("value", &*self.shared.value.lock())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a new signal with an initial value and no address.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            shared: Arc::new(SignalShared {
                name: name.into(),
                address: None,
                value: Mutex::new(initial),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a channel address (builder style).
    pub fn with_address(self, address: impl Into<String>) -> Self {
        // The shared state is not yet aliased during construction.
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                shared.address = Some(address.into());
                Self {
                    shared: Arc::new(shared),
                }
            }
            Err(shared) => Self { shared },
        }
    }

    /// Signal name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Channel address, if one was assigned.
    pub fn address(&self) -> Option<String> {
        self.shared.address.clone()
    }

    /// Current value (clone).
    pub fn get(&self) -> T {
        self.shared.value.lock().clone()
    }

    /// Store a new value and notify all subscribers synchronously.
    ///
    /// The subscriber list is snapshotted before dispatch, so callbacks may
    /// subscribe or unsubscribe without deadlocking.
    pub fn set(&self, value: T) {
        *self.shared.value.lock() = value.clone();
        let snapshot: Vec<Callback<T>> = self
            .shared
            .subscribers
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in snapshot {
            cb(&value);
        }
    }

    /// Register a change callback. The callback is *not* invoked with the
    /// current value; callers needing an immediate tick synthesize one.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    /// Remove a subscription. Returns false if the handle was already
    /// released; double release is a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subs = self.shared.subscribers.lock();
        let before = subs.len();
        subs.retain(|(id, _)| *id != handle.0);
        subs.len() != before
    }

    /// Number of live subscriptions, for diagnostics and tests.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

/// Address-to-signal directory for passthrough display widgets.
///
/// Devices register their addressed signals here at construction; the UI
/// layer resolves a widget's channel address back to a live value each frame.
#[derive(Clone, Default)]
pub struct SignalHub {
    map: Arc<RwLock<HashMap<String, Signal<f64>>>>,
}

impl SignalHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal under its address. Signals without an address are
    /// ignored (they are not externally routable).
    pub fn register(&self, signal: &Signal<f64>) {
        if let Some(addr) = signal.address() {
            self.map.write().insert(addr, signal.clone());
        }
    }

    /// Look up a signal by address.
    pub fn get(&self, address: &str) -> Option<Signal<f64>> {
        self.map.read().get(address).cloned()
    }

    /// Current value behind an address, if registered.
    pub fn value(&self, address: &str) -> Option<f64> {
        self.map.read().get(address).map(Signal::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn set_notifies_subscribers_in_order() {
        let sig = Signal::new("pitch", 0.0_f64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        sig.subscribe(move |v| a.lock().push(("a", *v)));
        let b = seen.clone();
        sig.subscribe(move |v| b.lock().push(("b", *v)));

        sig.set(1.5);
        assert_eq!(*seen.lock(), vec![("a", 1.5), ("b", 1.5)]);
        assert_eq!(sig.get(), 1.5);
    }

    #[test]
    fn unsubscribe_is_exact_and_idempotent() {
        let sig = Signal::new("cent_x", 0.0_f64);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = sig.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        sig.set(1.0);
        assert!(sig.unsubscribe(handle));
        assert!(!sig.unsubscribe(SubscriptionHandle(0)));
        sig.set(2.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn callbacks_may_unsubscribe_reentrantly() {
        let sig = Signal::new("done", 0.0_f64);
        let sig2 = sig.clone();
        let handle = Arc::new(Mutex::new(None));
        let slot = handle.clone();
        let h = sig.subscribe(move |_| {
            if let Some(h) = slot.lock().take() {
                sig2.unsubscribe(h);
            }
        });
        *handle.lock() = Some(h);
        sig.set(1.0);
        assert_eq!(sig.subscriber_count(), 0);
    }

    #[test]
    fn hub_resolves_addressed_signals() {
        let hub = SignalHub::new();
        let sig = Signal::new("pitch", 3.25_f64).with_address("SIM:M1H:PITCH.RBV");
        hub.register(&sig);
        hub.register(&Signal::new("anon", 0.0_f64));
        assert_eq!(hub.value("SIM:M1H:PITCH.RBV"), Some(3.25));
        assert_eq!(hub.value("SIM:NOPE"), None);
        sig.set(4.0);
        assert_eq!(hub.value("SIM:M1H:PITCH.RBV"), Some(4.0));
    }
}
