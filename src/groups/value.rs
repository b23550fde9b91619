//! Goal entry groups.

use crate::goals::GoalStore;
use crate::sink::{Sink, TextCell, ToggleCell};

/// Accepted goal range in display pixels.
const GOAL_RANGE: std::ops::RangeInclusive<f64> = 0.0..=5000.0;

/// A user-editable goal field with an optional slit checkbox, keyed by the
/// name in its label and backed by the shared [`GoalStore`].
pub struct ValueGroup {
    label: TextCell,
    edit: TextCell,
    checkbox: Option<ToggleCell>,
    store: GoalStore,
}

impl ValueGroup {
    /// Create a group over concrete cells. The store is shared with the
    /// rest of the screen.
    pub fn new(
        edit: TextCell,
        label: TextCell,
        checkbox: Option<ToggleCell>,
        store: GoalStore,
    ) -> Self {
        Self {
            label,
            edit,
            checkbox,
            store,
        }
    }

    /// Re-key the group: set label (and checkbox) text, untick the box, and
    /// reload the saved value for the new name.
    pub fn setup(&self, name: Option<&str>) {
        match name {
            Some(name) => self.label.set_text(name),
            None => self.label.clear(),
        }
        if let Some(checkbox) = &self.checkbox {
            if let Some(name) = name {
                checkbox.set_text(name);
            }
            checkbox.set_checked(false);
        }
        if let Some(name) = name {
            self.load_value(name);
        }
    }

    /// Stash the current field value in the store under the current name.
    pub fn save_value(&self) {
        let name = self.label.text();
        if let (false, Some(value)) = (name.is_empty(), self.value()) {
            self.store.set(&name, value);
        }
    }

    /// Load the saved value for `name` into the field, if one exists.
    pub fn load_value(&self, name: &str) {
        if let Some(value) = self.store.get(name) {
            self.edit.set_text(&format!("{value}"));
        }
    }

    /// Blank the entry field.
    pub fn clear(&self) {
        self.edit.clear();
    }

    /// Parsed field value, or None when empty, unparsable, or out of range.
    pub fn value(&self) -> Option<f64> {
        self.edit.value().filter(|v| GOAL_RANGE.contains(v))
    }

    /// Write a value into the field (slit-check autofill).
    pub fn set_value(&self, value: f64) {
        self.edit.set_text(&format!("{value}"));
    }

    /// Name in the label, or None when blank.
    pub fn name(&self) -> Option<String> {
        let text = self.label.text();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Whether the slit checkbox is ticked (false when absent).
    pub fn is_checked(&self) -> bool {
        self.checkbox.as_ref().is_some_and(ToggleCell::is_checked)
    }

    /// Enable or disable the slit checkbox.
    pub fn set_check_enabled(&self, enabled: bool) {
        if let Some(checkbox) = &self.checkbox {
            checkbox.set_enabled(enabled);
        }
    }

    /// Hide the row.
    pub fn hide(&self) {
        self.label.hide();
        self.edit.hide();
        if let Some(checkbox) = &self.checkbox {
            checkbox.hide();
        }
    }

    /// Show the row.
    pub fn show(&self) {
        self.label.show();
        self.edit.show();
        if let Some(checkbox) = &self.checkbox {
            checkbox.show();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> (ValueGroup, TextCell, ToggleCell, GoalStore) {
        let edit = TextCell::new();
        let label = TextCell::new();
        let check = ToggleCell::new();
        let store = GoalStore::new();
        let g = ValueGroup::new(edit.clone(), label.clone(), Some(check.clone()), store.clone());
        (g, edit, check, store)
    }

    #[test]
    fn setup_names_and_reloads() {
        let (g, edit, check, store) = group();
        store.set("sim_hx2", 480.0);
        check.set_checked(true);
        g.setup(Some("sim_hx2"));
        assert_eq!(edit.text(), "480");
        assert!(!check.is_checked());
        assert_eq!(check.label(), "sim_hx2");
    }

    #[test]
    fn save_value_requires_name_and_valid_value() {
        let (g, edit, _check, store) = group();
        edit.set_text("470.5");
        g.save_value(); // no name yet
        assert_eq!(store.get("sim_hx2"), None);

        g.setup(Some("sim_hx2"));
        edit.set_text("470.5");
        g.save_value();
        assert_eq!(store.get("sim_hx2"), Some(470.5));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let (g, edit, _check, _store) = group();
        g.setup(Some("sim_hx2"));
        edit.set_text("5001");
        assert_eq!(g.value(), None);
        edit.set_text("-3");
        assert_eq!(g.value(), None);
        edit.set_text("garbage");
        assert_eq!(g.value(), None);
        edit.set_text("4999.5");
        assert_eq!(g.value(), Some(4999.5));
    }
}
