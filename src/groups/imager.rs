//! The imager group: live centroid feedback with goal deltas.
//!
//! Binds the beam-image widget set to one imager at a time. A bind fixes the
//! rotation transform from the imager's live array geometry, subscribes to
//! both centroid signals, and replays the current values once so the display
//! is never stale. Every subsequent tick maps the raw centroid into display
//! coordinates and refreshes the position and goal-delta readouts.
//!
//! Rebinding is guarded by an epoch counter: callbacks registered under a
//! previous binding may still be in flight when the group moves to a new
//! imager, and any tick tagged with a superseded epoch is discarded instead
//! of being applied to the wrong device.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::connections::ConnectionRegistry;
use crate::error::AppResult;
use crate::goals::GoalStore;
use crate::hardware::{Imager, Signal, SubscriptionHandle};
use crate::rotation::{resolve, RotationBinding};
use crate::sink::Sink;

/// The widget set owned by an imager group.
#[derive(Clone)]
pub struct ImagerSinks {
    /// Title label showing the bound imager's name.
    pub label: Arc<dyn Sink>,
    /// Canonical beam x position readout.
    pub beam_x: Arc<dyn Sink>,
    /// Canonical beam y position readout.
    pub beam_y: Arc<dyn Sink>,
    /// Goal delta readout for x.
    pub delta_x: Arc<dyn Sink>,
    /// Goal delta readout for y (always cleared; no y goal exists).
    pub delta_y: Arc<dyn Sink>,
    /// Screen-state readback passthrough (preserve-set).
    pub state_read: Arc<dyn Sink>,
    /// Screen-state command passthrough (preserve-set).
    pub state_write: Arc<dyn Sink>,
    /// Image width passthrough for the live image widget.
    pub image_width: Arc<dyn Sink>,
    /// Image data passthrough for the live image widget.
    pub image_data: Arc<dyn Sink>,
}

impl ImagerSinks {
    fn all(&self) -> [&Arc<dyn Sink>; 9] {
        [
            &self.label,
            &self.beam_x,
            &self.beam_y,
            &self.delta_x,
            &self.delta_y,
            &self.state_read,
            &self.state_write,
            &self.image_width,
            &self.image_data,
        ]
    }
}

struct BoundState {
    epoch: u64,
    imager: Option<Arc<dyn Imager>>,
    binding: Option<RotationBinding>,
    rotation: f64,
    last: (f64, f64),
    subscriptions: Vec<(Signal<f64>, SubscriptionHandle)>,
    state_channels: [Option<String>; 2],
    image_channels: [Option<String>; 2],
}

/// Centroid display group, bindable to one [`Imager`] at a time.
pub struct ImagerGroup {
    state: Arc<Mutex<BoundState>>,
    sinks: ImagerSinks,
    goals: GoalStore,
    registry: Arc<ConnectionRegistry>,
}

impl ImagerGroup {
    /// Create an unbound group.
    pub fn new(sinks: ImagerSinks, goals: GoalStore, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoundState {
                epoch: 0,
                imager: None,
                binding: None,
                rotation: 0.0,
                last: (0.0, 0.0),
                subscriptions: Vec::new(),
                state_channels: [None, None],
                image_channels: [None, None],
            })),
            sinks,
            goals,
            registry,
        }
    }

    /// Bind to `imager` (or unbind with `None`).
    ///
    /// The old binding's subscriptions are dropped strictly before the new
    /// ones are created; the state widgets keep their connection when the
    /// new imager exposes the same state channels. On failure (detector not
    /// connected, degenerate geometry) the group is left unbound and the
    /// error returned for the caller to log as a recoverable condition.
    ///
    /// Completes one synthetic tick before returning, so the position and
    /// delta readouts reflect the new device immediately.
    pub fn bind(&self, imager: Option<Arc<dyn Imager>>, rotation: f64) -> AppResult<()> {
        // Retire the old binding first: bump the epoch so in-flight ticks
        // become stale, then drop the subscriptions.
        let epoch = {
            let mut st = self.state.lock();
            st.epoch += 1;
            st.imager = None;
            st.binding = None;
            let old = std::mem::take(&mut st.subscriptions);
            for (signal, handle) in old {
                signal.unsubscribe(handle);
            }
            st.epoch
        };

        let target = match imager {
            Some(target) => target,
            None => {
                self.apply_channels(None);
                self.sinks.label.clear();
                return Ok(());
            }
        };

        let binding = target
            .array_size()
            .and_then(|(sx, sy)| resolve(rotation, sx, sy));
        let binding = match binding {
            Ok(binding) => binding,
            Err(err) => {
                warn!(
                    device = target.name(),
                    rotation,
                    error = %err,
                    "bind failed; imager group left unbound"
                );
                self.apply_channels(None);
                self.sinks.label.clear();
                return Err(err);
            }
        };

        self.apply_channels(Some(&target));
        {
            let mut st = self.state.lock();
            st.imager = Some(target.clone());
            st.binding = Some(binding);
            st.rotation = rotation;
        }
        self.sinks.label.set_text(target.name());

        // Subscribe both centroid axes under the new epoch.
        let make_callback = || {
            let state = Arc::downgrade(&self.state);
            let sinks = self.sinks.clone();
            let goals = self.goals.clone();
            move |_: &f64| process_tick(&state, &sinks, &goals, epoch)
        };
        let sub_x = target.centroid_x().subscribe(make_callback());
        let sub_y = target.centroid_y().subscribe(make_callback());
        {
            let mut st = self.state.lock();
            st.subscriptions = vec![
                (target.centroid_x().clone(), sub_x),
                (target.centroid_y().clone(), sub_y),
            ];
        }

        // Synthetic tick: replay the current centroid so sinks aren't stale.
        process_tick(&Arc::downgrade(&self.state), &self.sinks, &self.goals, epoch);
        Ok(())
    }

    /// Unbind, equivalent to `bind(None, 0)`.
    pub fn unbind(&self) {
        // bind(None, ..) cannot fail.
        let _ = self.bind(None, 0.0);
    }

    /// Swap the passthrough channels over to `target` (or disconnect all).
    /// The state widgets are the preserve-set; the image widgets are not.
    fn apply_channels(&self, target: Option<&Arc<dyn Imager>>) {
        let new_state = match target {
            Some(t) => [t.state_read_channel(), t.state_write_channel()],
            None => [None, None],
        };
        let new_image = match target {
            Some(t) => [t.width_channel(), t.image_channel()],
            None => [None, None],
        };
        let mut st = self.state.lock();
        for (sink, old, new, preserve) in [
            (&self.sinks.state_read, &st.state_channels[0], &new_state[0], true),
            (&self.sinks.state_write, &st.state_channels[1], &new_state[1], true),
            (&self.sinks.image_width, &st.image_channels[0], &new_image[0], false),
            (&self.sinks.image_data, &st.image_channels[1], &new_image[1], false),
        ] {
            self.registry
                .swap(sink.as_ref(), old.as_deref(), new.as_deref(), preserve);
        }
        st.state_channels = new_state;
        st.image_channels = new_image;
    }

    /// Recompute the goal delta from the last known position, e.g. after
    /// the user edits a goal field.
    pub fn update_deltas(&self) {
        let keyed = {
            let st = self.state.lock();
            st.imager
                .as_ref()
                .map(|imager| (imager.name().to_string(), st.last.0))
        };
        if let Some((name, x)) = keyed {
            write_deltas(&self.sinks, &self.goals, &name, x);
        }
    }

    /// Name of the bound imager, if any.
    pub fn bound_name(&self) -> Option<String> {
        self.state
            .lock()
            .imager
            .as_ref()
            .map(|imager| imager.name().to_string())
    }

    /// Whether the group is currently bound.
    pub fn is_bound(&self) -> bool {
        self.state.lock().imager.is_some()
    }

    /// Last canonical beam position.
    pub fn position(&self) -> (f64, f64) {
        self.state.lock().last
    }

    /// Transform parameters of the current binding.
    pub fn binding(&self) -> Option<RotationBinding> {
        self.state.lock().binding
    }

    /// Hide every widget in the group. Subscriptions are unaffected: a
    /// hidden group keeps processing ticks so re-showing has no lag.
    pub fn hide(&self) {
        for sink in self.sinks.all() {
            sink.hide();
        }
    }

    /// Show every widget in the group.
    pub fn show(&self) {
        for sink in self.sinks.all() {
            sink.show();
        }
    }
}

impl Drop for ImagerGroup {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        for (signal, handle) in std::mem::take(&mut st.subscriptions) {
            signal.unsubscribe(handle);
        }
    }
}

/// One centroid tick: transform, store, publish. Runs for both live signal
/// callbacks and the synthetic tick issued by `bind`.
fn process_tick(
    state: &Weak<Mutex<BoundState>>,
    sinks: &ImagerSinks,
    goals: &GoalStore,
    epoch: u64,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let published = {
        let mut st = state.lock();
        if st.epoch != epoch {
            trace!(tick = epoch, current = st.epoch, "dropping stale centroid tick");
            return;
        }
        let (Some(imager), Some(binding)) = (st.imager.clone(), st.binding) else {
            return;
        };
        let (raw_x, raw_y) = if binding.swapped {
            (imager.centroid_y().get(), imager.centroid_x().get())
        } else {
            (imager.centroid_x().get(), imager.centroid_y().get())
        };
        let (x, y) = binding.apply(raw_x, raw_y);
        st.last = (x, y);
        (imager.name().to_string(), x, y)
    };
    // Sink writes happen outside the state lock: a sink implementation may
    // call back into the group.
    let (name, x, y) = published;
    sinks.beam_x.set_text(&format!("{x:.1}"));
    sinks.beam_y.set_text(&format!("{y:.1}"));
    write_deltas(sinks, goals, &name, x);
}

fn write_deltas(sinks: &ImagerSinks, goals: &GoalStore, name: &str, x: f64) {
    match goals.get(name) {
        Some(goal) => sinks.delta_x.set_text(&format!("{:.1}", x - goal)),
        None => sinks.delta_x.clear(),
    }
    // There is no y goal in this design; the sink stays blank.
    sinks.delta_y.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimImager;
    use crate::hardware::SignalHub;
    use crate::sink::TextCell;

    struct Fixture {
        group: ImagerGroup,
        cells: Cells,
        goals: GoalStore,
        registry: Arc<ConnectionRegistry>,
    }

    struct Cells {
        label: TextCell,
        beam_x: TextCell,
        beam_y: TextCell,
        delta_x: TextCell,
        delta_y: TextCell,
        state_read: TextCell,
    }

    fn fixture() -> Fixture {
        let cells = Cells {
            label: TextCell::new(),
            beam_x: TextCell::new(),
            beam_y: TextCell::new(),
            delta_x: TextCell::new(),
            delta_y: TextCell::new(),
            state_read: TextCell::new(),
        };
        let sinks = ImagerSinks {
            label: Arc::new(cells.label.clone()),
            beam_x: Arc::new(cells.beam_x.clone()),
            beam_y: Arc::new(cells.beam_y.clone()),
            delta_x: Arc::new(cells.delta_x.clone()),
            delta_y: Arc::new(cells.delta_y.clone()),
            state_read: Arc::new(cells.state_read.clone()),
            state_write: Arc::new(TextCell::new()),
            image_width: Arc::new(TextCell::new()),
            image_data: Arc::new(TextCell::new()),
        };
        let goals = GoalStore::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let group = ImagerGroup::new(sinks, goals.clone(), registry.clone());
        Fixture {
            group,
            cells,
            goals,
            registry,
        }
    }

    fn imager(name: &str, prefix: &str) -> Arc<SimImager> {
        SimImager::new(name, prefix, (1024, 768), &SignalHub::new())
    }

    #[test]
    fn bind_issues_synthetic_tick() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        cam.centroid_x().set(300.0);
        cam.centroid_y().set(200.0);
        f.group.bind(Some(cam), 0.0).unwrap();
        assert_eq!(f.cells.label.text(), "sim_hx2");
        assert_eq!(f.cells.beam_x.text(), "300.0");
        assert_eq!(f.cells.beam_y.text(), "200.0");
    }

    #[test]
    fn rotated_bind_transforms_ticks() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        f.group.bind(Some(cam.clone()), 90.0).unwrap();
        // Native y centroid feeds canonical x at 90 degrees.
        cam.centroid_y().set(300.0);
        assert_eq!(f.cells.beam_x.text(), "468.0");
        assert_eq!(f.group.position(), (468.0, 0.0));
    }

    #[test]
    fn delta_tracks_goal_and_clears_without_one() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        f.group.bind(Some(cam.clone()), 0.0).unwrap();
        cam.centroid_x().set(500.0);
        // No goal saved: delta must be blank, not "0" or "None".
        assert_eq!(f.cells.delta_x.text(), "");

        f.goals.set("sim_hx2", 480.0);
        cam.centroid_x().set(500.0);
        assert_eq!(f.cells.delta_x.text(), "20.0");
        assert_eq!(f.cells.delta_y.text(), "");
    }

    #[test]
    fn stale_epoch_ticks_are_discarded() {
        let f = fixture();
        let cam_a = imager("sim_hx2", "SIM:HX2");
        let cam_b = imager("sim_dg3", "SIM:DG3");
        f.group.bind(Some(cam_a.clone()), 0.0).unwrap();
        cam_a.centroid_x().set(100.0);
        assert_eq!(f.group.position().0, 100.0);

        f.group.bind(Some(cam_b), 0.0).unwrap();
        let before = f.group.position();
        // A's subscription was dropped; even a direct set must not reach
        // the group anymore.
        cam_a.centroid_x().set(999.0);
        assert_eq!(f.group.position(), before);
        assert_eq!(cam_a.centroid_x().subscriber_count(), 0);
    }

    #[test]
    fn bind_none_always_unbinds_cleanly() {
        let f = fixture();
        assert!(f.group.bind(None, 0.0).is_ok());
        let cam = imager("sim_hx2", "SIM:HX2");
        f.group.bind(Some(cam.clone()), 0.0).unwrap();
        f.group.unbind();
        assert!(!f.group.is_bound());
        assert_eq!(f.cells.label.text(), "");
        assert_eq!(cam.centroid_x().subscriber_count(), 0);
        assert_eq!(cam.centroid_y().subscriber_count(), 0);
    }

    #[tracing_test::traced_test]
    #[test]
    fn disconnected_detector_leaves_group_unbound() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        cam.set_connected(false);
        let err = f.group.bind(Some(cam), 0.0);
        assert!(err.is_err());
        assert!(!f.group.is_bound());
        assert_eq!(f.cells.label.text(), "");
        assert!(logs_contain("bind failed"));
    }

    #[test]
    fn state_widgets_survive_rebind_to_same_imager() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        f.group.bind(Some(cam.clone()), 0.0).unwrap();
        let addr = f.cells.state_read.channel().unwrap();
        f.group.bind(Some(cam), 0.0).unwrap();
        assert_eq!(f.registry.times_closed(&addr), 0);
        assert_eq!(f.registry.listener_count(&addr), 1);
    }

    #[test]
    fn hidden_group_keeps_processing_ticks() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        f.group.bind(Some(cam.clone()), 0.0).unwrap();
        f.group.hide();
        assert!(!f.cells.beam_x.is_visible());
        cam.centroid_x().set(250.0);
        assert_eq!(f.cells.beam_x.text(), "250.0");
        f.group.show();
        assert!(f.cells.beam_x.is_visible());
    }

    #[test]
    fn at_most_one_subscription_per_axis() {
        let f = fixture();
        let cam = imager("sim_hx2", "SIM:HX2");
        f.group.bind(Some(cam.clone()), 0.0).unwrap();
        f.group.bind(Some(cam.clone()), 90.0).unwrap();
        f.group.bind(Some(cam.clone()), 180.0).unwrap();
        assert_eq!(cam.centroid_x().subscriber_count(), 1);
        assert_eq!(cam.centroid_y().subscriber_count(), 1);
    }
}
