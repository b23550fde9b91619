//! Passthrough channel groups.

use std::sync::Arc;

use tracing::info;

use crate::connections::ConnectionRegistry;
use crate::hardware::ChannelSource;
use crate::sink::Sink;

use super::GroupCommon;

/// A row of passthrough widgets whose channel addresses come from one
/// device, swappable as a unit.
///
/// By default every widget is in the preserve-set: rebinding to a device
/// that exposes the same address for a slot keeps that slot's connection
/// alive instead of cycling it (see [`ConnectionRegistry::swap`]).
pub struct ChannelGroup {
    common: GroupCommon,
    registry: Arc<ConnectionRegistry>,
    preserve: Vec<bool>,
    bound_name: Option<String>,
    addresses: Vec<Option<String>>,
}

impl ChannelGroup {
    /// Create an unbound group over `widgets` with all widgets preserved.
    pub fn new(
        widgets: Vec<Arc<dyn Sink>>,
        label: Option<Arc<dyn Sink>>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let n = widgets.len();
        Self {
            common: GroupCommon::new(widgets, label),
            registry,
            preserve: vec![true; n],
            bound_name: None,
            addresses: vec![None; n],
        }
    }

    /// Override the preserve-set mask (one flag per widget).
    pub fn with_preserve(mut self, preserve: Vec<bool>) -> Self {
        debug_assert_eq!(preserve.len(), self.common.widgets().len());
        self.preserve = preserve;
        self
    }

    /// Swap the bound device. `None` unbinds: every widget is disconnected
    /// and the label cleared.
    pub fn rebind(&mut self, source: Option<ChannelSource>) {
        let n = self.common.widgets().len();
        let (name, mut new_addresses) = match source {
            Some(source) => (Some(source.name), source.addresses),
            None => (None, Vec::new()),
        };
        new_addresses.resize(n, None);

        info!(
            from = self.bound_name.as_deref().unwrap_or("-"),
            to = name.as_deref().unwrap_or("-"),
            "rebinding channel group"
        );
        for (i, widget) in self.common.widgets().iter().enumerate() {
            self.registry.swap(
                widget.as_ref(),
                self.addresses[i].as_deref(),
                new_addresses[i].as_deref(),
                self.preserve[i],
            );
        }
        self.common.set_label(name.as_deref());
        self.addresses = new_addresses;
        self.bound_name = name;
    }

    /// Name of the bound device, if any.
    pub fn bound_name(&self) -> Option<&str> {
        self.bound_name.as_deref()
    }

    /// Currently applied addresses, one per widget.
    pub fn addresses(&self) -> &[Option<String>] {
        &self.addresses
    }

    /// Hide the whole row.
    pub fn hide(&self) {
        self.common.hide();
    }

    /// Show the whole row.
    pub fn show(&self) {
        self.common.show();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::TextCell;

    fn source(name: &str, addrs: &[&str]) -> ChannelSource {
        ChannelSource {
            name: name.to_string(),
            addresses: addrs.iter().map(|a| Some((*a).to_string())).collect(),
        }
    }

    fn group(n: usize) -> (ChannelGroup, Vec<TextCell>, TextCell, Arc<ConnectionRegistry>) {
        let cells: Vec<TextCell> = (0..n).map(|_| TextCell::new()).collect();
        let label = TextCell::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let widgets = cells
            .iter()
            .map(|c| Arc::new(c.clone()) as Arc<dyn Sink>)
            .collect();
        let g = ChannelGroup::new(
            widgets,
            Some(Arc::new(label.clone()) as Arc<dyn Sink>),
            registry.clone(),
        );
        (g, cells, label, registry)
    }

    #[test]
    fn rebind_applies_addresses_and_label() {
        let (mut g, cells, label, registry) = group(2);
        g.rebind(Some(source("sim_m1h", &["M1H:RBV", "M1H:VAL"])));
        assert_eq!(cells[0].channel().as_deref(), Some("M1H:RBV"));
        assert_eq!(cells[1].channel().as_deref(), Some("M1H:VAL"));
        assert_eq!(label.text(), "sim_m1h");
        assert_eq!(registry.listener_count("M1H:RBV"), 1);
    }

    #[test]
    fn rebind_none_disconnects_everything() {
        let (mut g, cells, label, registry) = group(2);
        g.rebind(Some(source("sim_m1h", &["M1H:RBV", "M1H:VAL"])));
        g.rebind(None);
        assert_eq!(cells[0].channel(), None);
        assert_eq!(label.text(), "");
        assert_eq!(registry.listener_count("M1H:RBV"), 0);
        assert_eq!(g.bound_name(), None);
    }

    #[test]
    fn same_device_rebind_preserves_connections() {
        let (mut g, _cells, _label, registry) = group(2);
        g.rebind(Some(source("sim_m1h", &["M1H:RBV", "M1H:VAL"])));
        g.rebind(Some(source("sim_m1h", &["M1H:RBV", "M1H:VAL"])));
        assert_eq!(registry.times_closed("M1H:RBV"), 0);
        assert_eq!(registry.listener_count("M1H:RBV"), 1);
    }

    #[test]
    fn short_address_list_pads_with_disconnects() {
        let (mut g, cells, _label, _registry) = group(3);
        g.rebind(Some(source("sim_m2h", &["M2H:RBV"])));
        assert_eq!(cells[0].channel().as_deref(), Some("M2H:RBV"));
        assert_eq!(cells[1].channel(), None);
        assert_eq!(cells[2].channel(), None);
    }
}
