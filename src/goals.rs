//! Shared named-value cache for goals and nominal positions.
//!
//! One [`GoalStore`] is shared by every widget group on a screen: goal entry
//! fields save into it, the imager group reads it on every centroid tick to
//! compute the goal delta, and saved mirror nominal positions live alongside
//! (keyed by mirror name, so the two namespaces cannot collide with imager
//! names on a sane beamline). Entries are only ever overwritten, never
//! evicted; persistence is handled by the config layer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Name → value cache shared across one screen's widget groups.
#[derive(Clone, Default)]
pub struct GoalStore {
    map: Arc<RwLock<HashMap<String, f64>>>,
}

impl GoalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last saved value for `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.map.read().get(name).copied()
    }

    /// Save a value, overwriting any previous entry.
    pub fn set(&self, name: &str, value: f64) {
        self.map.write().insert(name.to_string(), value);
    }

    /// Merge a batch of entries (e.g. a freshly loaded nominal config).
    pub fn merge(&self, entries: &HashMap<String, f64>) {
        let mut map = self.map.write();
        for (name, value) in entries {
            map.insert(name.clone(), *value);
        }
    }

    /// Copy of the full cache, for persistence.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.map.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites() {
        let store = GoalStore::new();
        assert_eq!(store.get("sim_hx2"), None);
        store.set("sim_hx2", 480.0);
        store.set("sim_hx2", 470.5);
        assert_eq!(store.get("sim_hx2"), Some(470.5));
    }

    #[test]
    fn merge_keeps_unrelated_entries() {
        let store = GoalStore::new();
        store.set("sim_m1h", 0.001);
        store.merge(&HashMap::from([("sim_hx2".to_string(), 480.0)]));
        assert_eq!(store.get("sim_m1h"), Some(0.001));
        assert_eq!(store.get("sim_hx2"), Some(480.0));
    }

    #[test]
    fn clones_share_state() {
        let store = GoalStore::new();
        let alias = store.clone();
        alias.set("sim_dg3", 12.5);
        assert_eq!(store.get("sim_dg3"), Some(12.5));
    }
}
