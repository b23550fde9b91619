//! Output sinks for bound widget groups.
//!
//! The binding core never talks to a UI toolkit. It writes through the
//! [`Sink`] capability interface, and the toolkit side supplies adapters.
//! This repo ships shared-state cells ([`TextCell`], [`ToggleCell`]) that the
//! egui frontend renders each frame and tests inspect directly, so the whole
//! controller runs headless.
//!
//! `set_channel` is the one passthrough hook: widgets that display a live
//! channel directly (slit readbacks, image data) receive an address string
//! and resolve it themselves. An empty address disconnects.

use std::sync::Arc;

use parking_lot::RwLock;

/// Write-only contract a widget group needs from each of its widgets.
pub trait Sink: Send + Sync {
    /// Display formatted text.
    fn set_text(&self, text: &str);
    /// Blank the display (distinct from showing "0").
    fn clear(&self);
    /// Enable or disable user interaction.
    fn set_enabled(&self, enabled: bool);
    /// Point a passthrough widget at a channel address; `""` disconnects.
    fn set_channel(&self, address: &str);
    /// Make the widget visible.
    fn show(&self);
    /// Hide the widget.
    fn hide(&self);
}

#[derive(Debug)]
struct TextState {
    text: String,
    channel: Option<String>,
    enabled: bool,
    visible: bool,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            text: String::new(),
            channel: None,
            enabled: true,
            visible: true,
        }
    }
}

/// A text-bearing widget cell shared between the core and the frontend.
#[derive(Clone, Debug, Default)]
pub struct TextCell {
    state: Arc<RwLock<TextState>>,
}

impl TextCell {
    /// Create an empty, visible, enabled cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current text.
    pub fn text(&self) -> String {
        self.state.read().text.clone()
    }

    /// Current text parsed as a float, or None when empty/invalid.
    pub fn value(&self) -> Option<f64> {
        let text = self.text();
        if text.is_empty() {
            None
        } else {
            text.trim().parse().ok()
        }
    }

    /// Bound channel address, if any.
    pub fn channel(&self) -> Option<String> {
        self.state.read().channel.clone()
    }

    /// Whether the widget accepts input.
    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    /// Whether the widget is visible.
    pub fn is_visible(&self) -> bool {
        self.state.read().visible
    }
}

impl Sink for TextCell {
    fn set_text(&self, text: &str) {
        self.state.write().text = text.to_string();
    }

    fn clear(&self) {
        self.state.write().text.clear();
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.write().enabled = enabled;
    }

    fn set_channel(&self, address: &str) {
        self.state.write().channel = if address.is_empty() {
            None
        } else {
            Some(address.to_string())
        };
    }

    fn show(&self) {
        self.state.write().visible = true;
    }

    fn hide(&self) {
        self.state.write().visible = false;
    }
}

#[derive(Debug)]
struct ToggleState {
    label: String,
    checked: bool,
    enabled: bool,
    visible: bool,
}

impl Default for ToggleState {
    fn default() -> Self {
        Self {
            label: String::new(),
            checked: false,
            enabled: true,
            visible: true,
        }
    }
}

/// A checkbox widget cell. `set_text` names it, `clear` unchecks it.
#[derive(Clone, Debug, Default)]
pub struct ToggleCell {
    state: Arc<RwLock<ToggleState>>,
}

impl ToggleCell {
    /// Create an unchecked, visible, enabled cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkbox label.
    pub fn label(&self) -> String {
        self.state.read().label.clone()
    }

    /// Whether the box is ticked.
    pub fn is_checked(&self) -> bool {
        self.state.read().checked
    }

    /// Tick or untick the box (frontend input path).
    pub fn set_checked(&self, checked: bool) {
        self.state.write().checked = checked;
    }

    /// Whether the widget accepts input.
    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    /// Whether the widget is visible.
    pub fn is_visible(&self) -> bool {
        self.state.read().visible
    }
}

impl Sink for ToggleCell {
    fn set_text(&self, text: &str) {
        self.state.write().label = text.to_string();
    }

    fn clear(&self) {
        self.state.write().checked = false;
    }

    fn set_enabled(&self, enabled: bool) {
        self.state.write().enabled = enabled;
    }

    fn set_channel(&self, _address: &str) {
        // Checkboxes are never passthrough widgets.
    }

    fn show(&self) {
        self.state.write().visible = true;
    }

    fn hide(&self) {
        self.state.write().visible = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_cell_round_trip() {
        let cell = TextCell::new();
        cell.set_text("468.0");
        assert_eq!(cell.text(), "468.0");
        assert_eq!(cell.value(), Some(468.0));
        cell.clear();
        assert_eq!(cell.text(), "");
        assert_eq!(cell.value(), None);
    }

    #[test]
    fn empty_channel_disconnects() {
        let cell = TextCell::new();
        cell.set_channel("SIM:HX2:XWIDTH.RBV");
        assert_eq!(cell.channel().as_deref(), Some("SIM:HX2:XWIDTH.RBV"));
        cell.set_channel("");
        assert_eq!(cell.channel(), None);
    }

    #[test]
    fn toggle_clear_unchecks() {
        let cell = ToggleCell::new();
        cell.set_text("sim_hx2");
        cell.set_checked(true);
        cell.clear();
        assert!(!cell.is_checked());
        assert_eq!(cell.label(), "sim_hx2");
    }

    #[test]
    fn visibility_toggles() {
        let cell = TextCell::new();
        assert!(cell.is_visible());
        cell.hide();
        assert!(!cell.is_visible());
        cell.show();
        assert!(cell.is_visible());
    }
}
