//! Bound widget groups.
//!
//! A widget group is a fixed set of on-screen output sinks under a single
//! label, bound to one hardware object at a time. Selecting a different
//! imager or alignment procedure *rebinds* the groups: each one drops its
//! connection to the old device, recomputes its per-binding parameters, and
//! points the same widgets at the new device.
//!
//! Three flavors cover the screen:
//!
//! - [`ChannelGroup`]: passthrough readback widgets fed by channel
//!   addresses (mirror pitch rows, slit width rows)
//! - [`ValueGroup`]: a user-editable goal field backed by the shared
//!   [`crate::goals::GoalStore`]
//! - [`ImagerGroup`]: the live centroid pipeline: rotation-aware transform,
//!   goal deltas, and the epoch guard that discards callbacks from a
//!   superseded binding

pub mod channel;
pub mod imager;
pub mod value;

pub use channel::ChannelGroup;
pub use imager::{ImagerGroup, ImagerSinks};
pub use value::ValueGroup;

use std::sync::Arc;

use crate::sink::Sink;

/// Label + widget handles shared by every group flavor.
pub struct GroupCommon {
    label: Option<Arc<dyn Sink>>,
    widgets: Vec<Arc<dyn Sink>>,
}

impl GroupCommon {
    /// Create from widget handles and an optional label widget.
    pub fn new(widgets: Vec<Arc<dyn Sink>>, label: Option<Arc<dyn Sink>>) -> Self {
        Self { label, widgets }
    }

    /// Widgets in this group, in construction order.
    pub fn widgets(&self) -> &[Arc<dyn Sink>] {
        &self.widgets
    }

    /// Set or clear the label text.
    pub fn set_label(&self, name: Option<&str>) {
        if let Some(label) = &self.label {
            match name {
                Some(name) => label.set_text(name),
                None => label.clear(),
            }
        }
    }

    /// Hide all widgets in the group, label included.
    pub fn hide(&self) {
        for widget in &self.widgets {
            widget.hide();
        }
        if let Some(label) = &self.label {
            label.hide();
        }
    }

    /// Show all widgets in the group, label included.
    pub fn show(&self) {
        for widget in &self.widgets {
            widget.show();
        }
        if let Some(label) = &self.label {
            label.show();
        }
    }
}
