//! Simulated beamline devices.
//!
//! Provides mirror/imager/slit implementations for running the console
//! without hardware, with enough physics to exercise every code path:
//! mirror pitch linearly steers the centroid on each downstream imager, an
//! inserted YAG screen blocks the beam for everything after it, and closing
//! a slit pair far enough snaps the centroid to the slit fiducial position.
//!
//! All state changes are synchronous: commanding a pitch move updates the
//! readback, recomputes every affected centroid, and fires subscriber
//! callbacks before returning. Tests stay deterministic; the optional
//! centroid jitter is only switched on for interactive use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{AlignError, AppResult};
use crate::hardware::{Imager, Mirror, Signal, SignalHub, Slits, Subsystem, YagState};

/// Slit width below which the beam is clipped to the slit fiducial.
const SLIT_CLIP_WIDTH: f64 = 1.0;

// =============================================================================
// SimMirror
// =============================================================================

/// Simulated steering mirror. Moves complete instantly.
pub struct SimMirror {
    name: String,
    pitch: Signal<f64>,
    pitch_setpoint: Signal<f64>,
    move_done: Signal<f64>,
    nominal: Mutex<Option<f64>>,
}

impl SimMirror {
    /// Create a mirror with channel addresses under `prefix` and register
    /// its signals with the hub.
    pub fn new(name: &str, prefix: &str, initial_pitch: f64, hub: &SignalHub) -> Arc<Self> {
        let pitch = Signal::new("pitch", initial_pitch).with_address(format!("{prefix}:PITCH.RBV"));
        let pitch_setpoint =
            Signal::new("pitch_setpoint", initial_pitch).with_address(format!("{prefix}:PITCH.VAL"));
        let move_done = Signal::new("move_done", 1.0).with_address(format!("{prefix}:PITCH.DMOV"));
        for sig in [&pitch, &pitch_setpoint, &move_done] {
            hub.register(sig);
        }
        Arc::new(Self {
            name: name.to_string(),
            pitch,
            pitch_setpoint,
            move_done,
            nominal: Mutex::new(None),
        })
    }
}

impl Mirror for SimMirror {
    fn name(&self) -> &str {
        &self.name
    }

    fn pitch(&self) -> &Signal<f64> {
        &self.pitch
    }

    fn pitch_setpoint(&self) -> &Signal<f64> {
        &self.pitch_setpoint
    }

    fn move_done(&self) -> &Signal<f64> {
        &self.move_done
    }

    fn set_pitch(&self, target: f64) {
        self.move_done.set(0.0);
        self.pitch_setpoint.set(target);
        self.pitch.set(target);
        self.move_done.set(1.0);
    }

    fn nominal_position(&self) -> Option<f64> {
        *self.nominal.lock()
    }

    fn set_nominal_position(&self, position: f64) {
        *self.nominal.lock() = Some(position);
    }
}

// =============================================================================
// SimImager
// =============================================================================

/// Simulated YAG screen with a camera and centroid readout.
pub struct SimImager {
    name: String,
    size: (u32, u32),
    connected: AtomicBool,
    cent_x: Signal<f64>,
    cent_y: Signal<f64>,
    yag: Signal<YagState>,
    state_readback: Signal<f64>,
    width_channel: String,
    image_channel: String,
    state_read: String,
    state_write: String,
}

/// Numeric encoding of [`YagState`] for the state readback channel.
fn yag_code(state: YagState) -> f64 {
    match state {
        YagState::Unknown => 0.0,
        YagState::Out => 1.0,
        YagState::In => 2.0,
    }
}

impl SimImager {
    /// Create an imager with channel addresses under `prefix` and register
    /// its centroid signals with the hub.
    pub fn new(name: &str, prefix: &str, size: (u32, u32), hub: &SignalHub) -> Arc<Self> {
        let cent_x =
            Signal::new("centroid_x", 0.0).with_address(format!("{prefix}:STATS2:CentroidX_RBV"));
        let cent_y =
            Signal::new("centroid_y", 0.0).with_address(format!("{prefix}:STATS2:CentroidY_RBV"));
        let state_read = format!("{prefix}:MMS:STATE.RBV");
        let state_readback =
            Signal::new("state", yag_code(YagState::Out)).with_address(state_read.clone());
        hub.register(&cent_x);
        hub.register(&cent_y);
        hub.register(&state_readback);
        Arc::new(Self {
            name: name.to_string(),
            size,
            connected: AtomicBool::new(true),
            cent_x,
            cent_y,
            yag: Signal::new("yag", YagState::Out),
            state_readback,
            width_channel: format!("{prefix}:IMAGE2:ArraySize0_RBV"),
            image_channel: format!("{prefix}:IMAGE2:ArrayData"),
            state_read,
            state_write: format!("{prefix}:MMS:STATE.VAL"),
        })
    }

    /// Drop or restore the detector connection, for exercising the
    /// `NotConnected` path.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Imager for SimImager {
    fn name(&self) -> &str {
        &self.name
    }

    fn array_size(&self) -> AppResult<(u32, u32)> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(self.size)
        } else {
            Err(AlignError::NotConnected {
                device: self.name.clone(),
                signal: "array_size".into(),
            })
        }
    }

    fn centroid_x(&self) -> &Signal<f64> {
        &self.cent_x
    }

    fn centroid_y(&self) -> &Signal<f64> {
        &self.cent_y
    }

    fn width_channel(&self) -> Option<String> {
        Some(self.width_channel.clone())
    }

    fn image_channel(&self) -> Option<String> {
        Some(self.image_channel.clone())
    }

    fn state_read_channel(&self) -> Option<String> {
        Some(self.state_read.clone())
    }

    fn state_write_channel(&self) -> Option<String> {
        Some(self.state_write.clone())
    }

    fn yag(&self) -> &Signal<YagState> {
        &self.yag
    }

    fn request_yag(&self, state: YagState) {
        self.state_readback.set(yag_code(state));
        self.yag.set(state);
    }
}

// =============================================================================
// SimSlits
// =============================================================================

/// Simulated aperture. The fiducial is the x pixel the beam clips to when
/// the slits are nearly closed.
pub struct SimSlits {
    name: String,
    x_width: Signal<f64>,
    y_width: Signal<f64>,
    x_width_setpoint: Signal<f64>,
    y_width_setpoint: Signal<f64>,
    move_done: Signal<f64>,
    fiducial_x: f64,
}

impl SimSlits {
    /// Create slits with channel addresses under `prefix`, fully open.
    pub fn new(name: &str, prefix: &str, fiducial_x: f64, hub: &SignalHub) -> Arc<Self> {
        let x_width = Signal::new("x_width", 10.0).with_address(format!("{prefix}:XWIDTH.RBV"));
        let y_width = Signal::new("y_width", 10.0).with_address(format!("{prefix}:YWIDTH.RBV"));
        let x_width_setpoint =
            Signal::new("x_width_setpoint", 10.0).with_address(format!("{prefix}:XWIDTH.VAL"));
        let y_width_setpoint =
            Signal::new("y_width_setpoint", 10.0).with_address(format!("{prefix}:YWIDTH.VAL"));
        let move_done = Signal::new("move_done", 1.0).with_address(format!("{prefix}:DMOV"));
        for sig in [
            &x_width,
            &y_width,
            &x_width_setpoint,
            &y_width_setpoint,
            &move_done,
        ] {
            hub.register(sig);
        }
        Arc::new(Self {
            name: name.to_string(),
            x_width,
            y_width,
            x_width_setpoint,
            y_width_setpoint,
            move_done,
            fiducial_x,
        })
    }
}

impl Slits for SimSlits {
    fn name(&self) -> &str {
        &self.name
    }

    fn x_width(&self) -> &Signal<f64> {
        &self.x_width
    }

    fn y_width(&self) -> &Signal<f64> {
        &self.y_width
    }

    fn x_width_setpoint(&self) -> &Signal<f64> {
        &self.x_width_setpoint
    }

    fn y_width_setpoint(&self) -> &Signal<f64> {
        &self.y_width_setpoint
    }

    fn move_done(&self) -> &Signal<f64> {
        &self.move_done
    }

    fn set_widths(&self, x: f64, y: f64) {
        self.move_done.set(0.0);
        self.x_width_setpoint.set(x);
        self.y_width_setpoint.set(y);
        self.x_width.set(x);
        self.y_width.set(y);
        self.move_done.set(1.0);
    }
}

// =============================================================================
// SimBeamline
// =============================================================================

/// How one imager's centroid responds to the upstream optics.
pub struct BeamCoupling {
    /// The imager whose centroid this entry drives.
    pub imager: Arc<SimImager>,
    /// Centroid with all mirrors at zero pitch, screen inserted.
    pub center: (f64, f64),
    /// Upstream mirrors and their sensitivity in pixels per pitch unit.
    pub mirrors: Vec<(Arc<SimMirror>, f64)>,
    /// Slits between the mirrors and this imager, if any.
    pub slits: Option<Arc<SimSlits>>,
}

struct BeamlineState {
    couplings: Vec<BeamCoupling>,
    noise: f64,
}

/// Owner of the sim beam physics. Keep it alive for as long as the devices
/// should track each other; dropping it freezes all centroids.
pub struct SimBeamline {
    state: Arc<BeamlineState>,
}

impl SimBeamline {
    /// Wire up couplings and propagate the initial beam state.
    pub fn new(couplings: Vec<BeamCoupling>, noise: f64) -> Self {
        let state = Arc::new(BeamlineState { couplings, noise });
        for coupling in &state.couplings {
            for (mirror, _) in &coupling.mirrors {
                let weak = Arc::downgrade(&state);
                mirror.pitch.subscribe(move |_| Self::propagate_weak(&weak));
            }
            let weak = Arc::downgrade(&state);
            coupling.imager.yag.subscribe(move |_| Self::propagate_weak(&weak));
            if let Some(slits) = &coupling.slits {
                let weak = Arc::downgrade(&state);
                slits.x_width.subscribe(move |_| Self::propagate_weak(&weak));
            }
        }
        Self::propagate(&state);
        Self { state }
    }

    fn propagate_weak(state: &Weak<BeamlineState>) {
        if let Some(state) = state.upgrade() {
            Self::propagate(&state);
        }
    }

    /// Recompute every centroid in z order. An inserted screen absorbs the
    /// beam, so imagers behind it read zero.
    fn propagate(state: &BeamlineState) {
        let mut blocked = false;
        for coupling in &state.couplings {
            let inserted = coupling.imager.yag.get() == YagState::In;
            let (cx, cy) = if blocked || !inserted {
                (0.0, 0.0)
            } else {
                let clipped = coupling
                    .slits
                    .as_ref()
                    .filter(|s| s.x_width.get() < SLIT_CLIP_WIDTH)
                    .map(|s| s.fiducial_x);
                let x = match clipped {
                    Some(fiducial) => fiducial,
                    None => {
                        coupling.center.0
                            + coupling
                                .mirrors
                                .iter()
                                .map(|(m, gain)| gain * m.pitch.get())
                                .sum::<f64>()
                    }
                };
                (jitter(x, state.noise), jitter(coupling.center.1, state.noise))
            };
            coupling.imager.cent_x.set(cx);
            coupling.imager.cent_y.set(cy);
            if inserted {
                blocked = true;
            }
        }
    }

    /// Force a recomputation (used after reconnecting a detector).
    pub fn refresh(&self) {
        Self::propagate(&self.state);
    }
}

fn jitter(value: f64, noise: f64) -> f64 {
    if noise > 0.0 {
        value + rand::thread_rng().gen_range(-noise..=noise)
    } else {
        value
    }
}

// =============================================================================
// Simulated system
// =============================================================================

/// Build the default simulated beamline: two soft mirrors feeding two
/// imaging stations, plus a branch mirror and its diagnostic imager.
///
/// Returns the ordered subsystem map (as the screen consumes it) and the
/// beamline physics handle.
pub fn sim_system(hub: &SignalHub, noise: f64) -> (Vec<(String, Subsystem)>, SimBeamline) {
    let m1h = SimMirror::new("sim_m1h", "SIM:M1H", 0.0, hub);
    let m2h = SimMirror::new("sim_m2h", "SIM:M2H", 0.0, hub);
    let xrtm2 = SimMirror::new("sim_xrtm2", "SIM:XRTM2", 0.0, hub);

    let hx2 = SimImager::new("sim_hx2", "SIM:HX2", (1024, 768), hub);
    let dg3 = SimImager::new("sim_dg3", "SIM:DG3", (1024, 768), hub);
    let mfxdg1 = SimImager::new("sim_mfxdg1", "SIM:MFXDG1", (1024, 768), hub);

    let hx2_slits = SimSlits::new("sim_hx2_slits", "SIM:HX2:SLITS", 500.0, hub);
    let dg3_slits = SimSlits::new("sim_dg3_slits", "SIM:DG3:SLITS", 520.0, hub);

    let beamline = SimBeamline::new(
        vec![
            BeamCoupling {
                imager: hx2.clone(),
                center: (512.0, 384.0),
                mirrors: vec![(m1h.clone(), 180.0)],
                slits: Some(hx2_slits.clone()),
            },
            BeamCoupling {
                imager: dg3.clone(),
                center: (512.0, 384.0),
                mirrors: vec![(m1h.clone(), 420.0), (m2h.clone(), 240.0)],
                slits: Some(dg3_slits.clone()),
            },
            BeamCoupling {
                imager: mfxdg1.clone(),
                center: (512.0, 384.0),
                mirrors: vec![(xrtm2.clone(), 300.0)],
                slits: None,
            },
        ],
        noise,
    );

    let system = vec![
        (
            "m1h".to_string(),
            Subsystem {
                mirror: Some(m1h),
                imager: hx2,
                slits: Some(hx2_slits),
                rotation: 0.0,
            },
        ),
        (
            "m2h".to_string(),
            Subsystem {
                mirror: Some(m2h),
                imager: dg3,
                slits: Some(dg3_slits),
                rotation: 0.0,
            },
        ),
        (
            "mfx".to_string(),
            Subsystem {
                mirror: Some(xrtm2),
                imager: mfxdg1,
                slits: None,
                rotation: 0.0,
            },
        ),
    ];
    (system, beamline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_steers_downstream_centroid() {
        let hub = SignalHub::new();
        let (system, _beamline) = sim_system(&hub, 0.0);
        let first = &system[0].1;
        first.imager.request_yag(YagState::In);
        assert_eq!(first.imager.centroid_x().get(), 512.0);

        if let Some(mirror) = &first.mirror {
            mirror.set_pitch(1.0);
        }
        assert_eq!(first.imager.centroid_x().get(), 512.0 + 180.0);
    }

    #[test]
    fn inserted_screen_blocks_downstream_imagers() {
        let hub = SignalHub::new();
        let (system, _beamline) = sim_system(&hub, 0.0);
        let hx2 = &system[0].1.imager;
        let dg3 = &system[1].1.imager;
        hx2.request_yag(YagState::In);
        dg3.request_yag(YagState::In);
        assert_eq!(dg3.centroid_x().get(), 0.0);

        hx2.request_yag(YagState::Out);
        assert_eq!(dg3.centroid_x().get(), 512.0);
    }

    #[test]
    fn narrow_slits_clip_to_fiducial() {
        let hub = SignalHub::new();
        let (system, _beamline) = sim_system(&hub, 0.0);
        let first = &system[0].1;
        first.imager.request_yag(YagState::In);
        let slits = first.slits.as_ref().map(|s| s.channel_source());
        assert!(slits.is_some());
        if let Some(s) = &first.slits {
            s.set_widths(0.2, 0.2);
        }
        assert_eq!(first.imager.centroid_x().get(), 500.0);
        if let Some(s) = &first.slits {
            s.set_widths(10.0, 10.0);
        }
        assert_eq!(first.imager.centroid_x().get(), 512.0);
    }

    #[test]
    fn disconnected_detector_reports_not_connected() {
        let hub = SignalHub::new();
        let imager = SimImager::new("test_cam", "SIM:TEST", (640, 480), &hub);
        assert!(imager.array_size().is_ok());
        imager.set_connected(false);
        assert!(matches!(
            imager.array_size(),
            Err(AlignError::NotConnected { .. })
        ));
    }
}
