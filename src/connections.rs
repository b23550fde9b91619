//! Channel connection accounting.
//!
//! Passthrough widgets hold live connections to channel addresses. Rebinding
//! a widget group tears down the old connections and establishes the new
//! ones; for widgets whose address does not actually change across a rebind
//! (long-lived status displays in the preserve-set), a naive
//! teardown-then-rebuild cycles the connection through zero listeners and
//! the display flickers through a disconnected state.
//!
//! [`ConnectionRegistry`] tracks a listener count per address. The
//! [`ConnectionRegistry::swap`] helper holds a temporary reference across
//! the teardown when old and new address coincide for a preserved widget, so
//! the count never reaches zero and the connection object survives. The
//! registry is an explicit collaborator handed to each widget group, not
//! application-global state.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::sink::Sink;

#[derive(Debug, Default, Clone, Copy)]
struct ConnectionStats {
    listeners: usize,
    /// Times the listener count rose from zero (connection established).
    opened: u64,
    /// Times the listener count fell to zero (connection torn down).
    closed: u64,
}

/// Listener refcounts per channel address.
#[derive(Default)]
pub struct ConnectionRegistry {
    stats: Mutex<HashMap<String, ConnectionStats>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener to `address`.
    pub fn acquire(&self, address: &str) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(address.to_string()).or_default();
        if entry.listeners == 0 {
            entry.opened += 1;
        }
        entry.listeners += 1;
    }

    /// Drop a listener from `address`. Releasing an address with no
    /// listeners is a bookkeeping bug in the caller and is logged, not
    /// panicked on.
    pub fn release(&self, address: &str) {
        let mut stats = self.stats.lock();
        match stats.get_mut(address) {
            Some(entry) if entry.listeners > 0 => {
                entry.listeners -= 1;
                if entry.listeners == 0 {
                    entry.closed += 1;
                }
            }
            _ => warn!(address, "release of channel with no listeners"),
        }
    }

    /// Current listener count for an address.
    pub fn listener_count(&self, address: &str) -> usize {
        self.stats
            .lock()
            .get(address)
            .map_or(0, |entry| entry.listeners)
    }

    /// How many times the connection behind `address` has been torn down.
    /// A preserved widget's address should report zero across any number of
    /// rebinds.
    pub fn times_closed(&self, address: &str) -> u64 {
        self.stats
            .lock()
            .get(address)
            .map_or(0, |entry| entry.closed)
    }

    /// Re-point one widget from `old` to `new`, releasing and acquiring in
    /// the required order. With `preserve` set and an unchanged address, a
    /// temporary reference keeps the connection alive across the swap.
    pub fn swap(&self, sink: &dyn Sink, old: Option<&str>, new: Option<&str>, preserve: bool) {
        let retained = preserve && old.is_some() && old == new;
        if retained {
            if let Some(addr) = old {
                self.acquire(addr);
            }
        }
        if let Some(addr) = old {
            self.release(addr);
        }
        match new {
            Some(addr) => {
                sink.set_channel(addr);
                self.acquire(addr);
            }
            None => sink.set_channel(""),
        }
        if retained {
            if let Some(addr) = new {
                self.release(addr);
            }
        }
    }

    /// Dump listener counts at debug level, for chasing connection leaks.
    pub fn debug_log_counts(&self) {
        let stats = self.stats.lock();
        let counts: HashMap<&str, usize> = stats
            .iter()
            .map(|(addr, entry)| (addr.as_str(), entry.listeners))
            .collect();
        debug!(?counts, "channel listener counts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::TextCell;

    #[test]
    fn acquire_release_round_trip() {
        let reg = ConnectionRegistry::new();
        reg.acquire("A");
        reg.acquire("A");
        assert_eq!(reg.listener_count("A"), 2);
        reg.release("A");
        assert_eq!(reg.listener_count("A"), 1);
        assert_eq!(reg.times_closed("A"), 0);
        reg.release("A");
        assert_eq!(reg.listener_count("A"), 0);
        assert_eq!(reg.times_closed("A"), 1);
    }

    #[test]
    fn over_release_is_tolerated() {
        let reg = ConnectionRegistry::new();
        reg.release("never-acquired");
        assert_eq!(reg.listener_count("never-acquired"), 0);
    }

    #[test]
    fn swap_to_new_address_closes_old() {
        let reg = ConnectionRegistry::new();
        let cell = TextCell::new();
        reg.swap(&cell, None, Some("A"), false);
        assert_eq!(cell.channel().as_deref(), Some("A"));
        assert_eq!(reg.listener_count("A"), 1);

        reg.swap(&cell, Some("A"), Some("B"), false);
        assert_eq!(cell.channel().as_deref(), Some("B"));
        assert_eq!(reg.listener_count("A"), 0);
        assert_eq!(reg.times_closed("A"), 1);
        assert_eq!(reg.listener_count("B"), 1);
    }

    #[test]
    fn preserved_same_address_never_drops_to_zero() {
        let reg = ConnectionRegistry::new();
        let cell = TextCell::new();
        reg.swap(&cell, None, Some("A"), true);
        for _ in 0..5 {
            reg.swap(&cell, Some("A"), Some("A"), true);
        }
        assert_eq!(reg.listener_count("A"), 1);
        assert_eq!(reg.times_closed("A"), 0);
    }

    #[test]
    fn unpreserved_same_address_cycles_connection() {
        let reg = ConnectionRegistry::new();
        let cell = TextCell::new();
        reg.swap(&cell, None, Some("A"), false);
        reg.swap(&cell, Some("A"), Some("A"), false);
        assert_eq!(reg.listener_count("A"), 1);
        assert_eq!(reg.times_closed("A"), 1);
    }

    #[test]
    fn swap_to_none_disconnects() {
        let reg = ConnectionRegistry::new();
        let cell = TextCell::new();
        reg.swap(&cell, None, Some("A"), false);
        reg.swap(&cell, Some("A"), None, false);
        assert_eq!(cell.channel(), None);
        assert_eq!(reg.listener_count("A"), 0);
    }
}
