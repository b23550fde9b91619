//! The alignment screen controller.
//!
//! Owns the widget groups, the goal store, the connection registry, and the
//! engine handle, and implements every operator action: switching imagers
//! and procedures, starting/pausing/aborting runs, the slit check, and
//! saving goals and mirror positions. The frontend is only responsible for
//! rendering the shared cells and forwarding user input to these methods,
//! so the whole controller runs headless under test.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{default_procedures, save_nominal, ProcedureDef};
use crate::connections::ConnectionRegistry;
use crate::engine::{
    AlignmentPlan, AlignmentTarget, Engine, EngineState, SlitCheckPlan, SlitCheckTarget,
};
use crate::error::{AlignError, AppResult};
use crate::goals::GoalStore;
use crate::groups::{ChannelGroup, ImagerGroup, ImagerSinks, ValueGroup};
use crate::hardware::{Imager, Mirror, Signal, Slits, Subsystem, YagState};
use crate::rotation::resolve;
use crate::settings::Settings;
use crate::sink::{Sink, TextCell, ToggleCell};

/// Fixed number of mirror/goal widget rows on the screen.
pub const MAX_MIRRORS: usize = 4;

// =============================================================================
// Screen cells
// =============================================================================

/// Cells of one mirror readback row.
#[derive(Clone, Default)]
pub struct MirrorRowCells {
    /// Mirror name label.
    pub label: TextCell,
    /// Pitch readback passthrough.
    pub readback: TextCell,
    /// Pitch setpoint passthrough.
    pub setpoint: TextCell,
    /// Motion-done passthrough.
    pub done: TextCell,
}

/// Cells of one goal entry row.
#[derive(Clone, Default)]
pub struct GoalRowCells {
    /// Imager name label.
    pub label: TextCell,
    /// Goal entry field.
    pub edit: TextCell,
    /// Slit-check checkbox.
    pub check: ToggleCell,
}

/// Cells of the slit readback row.
#[derive(Clone, Default)]
pub struct SlitRowCells {
    /// Slits name label.
    pub label: TextCell,
    /// X width readback passthrough.
    pub x_width: TextCell,
    /// Y width readback passthrough.
    pub y_width: TextCell,
    /// X width setpoint passthrough.
    pub x_setpoint: TextCell,
    /// Y width setpoint passthrough.
    pub y_setpoint: TextCell,
    /// Motion-done passthrough.
    pub done: TextCell,
}

/// Cells of the image/centroid panel.
#[derive(Clone, Default)]
pub struct ImageCells {
    /// Bound imager title.
    pub title: TextCell,
    /// Canonical beam x readout.
    pub beam_x: TextCell,
    /// Canonical beam y readout.
    pub beam_y: TextCell,
    /// Goal delta readout.
    pub delta_x: TextCell,
    /// Y delta readout (always blank; no y goal exists).
    pub delta_y: TextCell,
    /// Screen-state readback passthrough.
    pub state_read: TextCell,
    /// Screen-state command passthrough.
    pub state_write: TextCell,
    /// Image width passthrough.
    pub image_width: TextCell,
    /// Image data passthrough.
    pub image_data: TextCell,
}

/// Every cell the frontend renders, shared with the widget groups.
#[derive(Clone)]
pub struct ScreenCells {
    /// Image/centroid panel cells.
    pub image: ImageCells,
    /// Mirror rows, `MAX_MIRRORS` of them.
    pub mirrors: Vec<MirrorRowCells>,
    /// Goal rows, `MAX_MIRRORS` of them.
    pub goals: Vec<GoalRowCells>,
    /// Slit readback row.
    pub slits: SlitRowCells,
}

impl Default for ScreenCells {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenCells {
    /// Allocate the full cell set.
    pub fn new() -> Self {
        Self {
            image: ImageCells::default(),
            mirrors: (0..MAX_MIRRORS).map(|_| MirrorRowCells::default()).collect(),
            goals: (0..MAX_MIRRORS).map(|_| GoalRowCells::default()).collect(),
            slits: SlitRowCells::default(),
        }
    }
}

fn sink(cell: &TextCell) -> Arc<dyn Sink> {
    Arc::new(cell.clone())
}

// =============================================================================
// AlignScreen
// =============================================================================

/// Top-level controller for one alignment screen.
pub struct AlignScreen {
    system: Vec<(String, Subsystem)>,
    procedures: Vec<ProcedureDef>,
    procedure: String,
    current_imager: Option<String>,
    goals: GoalStore,
    registry: Arc<ConnectionRegistry>,
    engine: Engine,
    settings: Settings,
    nominal_file: Option<PathBuf>,
    settings_file: Option<PathBuf>,
    slit_group: ChannelGroup,
    mirror_groups: Vec<ChannelGroup>,
    goal_groups: Vec<ValueGroup>,
    image_group: ImagerGroup,
    auto_fill_goals: bool,
    auto_switch: Arc<AtomicBool>,
    pending_switch: Arc<Mutex<Option<String>>>,
    active_imagers: Arc<Mutex<Vec<(String, Signal<YagState>)>>>,
    slit_results: Arc<Mutex<Option<HashMap<String, f64>>>>,
}

impl AlignScreen {
    /// Build the screen over an ordered subsystem map.
    ///
    /// Loads the nominal config into the goal store, wires every widget
    /// group, and activates the first procedure and its first imager.
    pub fn new(
        system: Vec<(String, Subsystem)>,
        procedures: Vec<ProcedureDef>,
        cells: &ScreenCells,
        engine: Engine,
        settings: Settings,
        nominal_file: Option<PathBuf>,
        settings_file: Option<PathBuf>,
    ) -> AppResult<Self> {
        if system.is_empty() {
            return Err(AlignError::Configuration(
                "beamline config has no subsystems".to_string(),
            ));
        }
        let keys: Vec<String> = system.iter().map(|(key, _)| key.clone()).collect();
        let procedures = if procedures.is_empty() {
            default_procedures(&keys)
        } else {
            procedures
        };

        let goals = GoalStore::new();
        if let Some(path) = &nominal_file {
            match crate::config::read_nominal(path) {
                Ok(entries) => {
                    info!(path = %path.display(), entries = entries.len(), "nominal config cached");
                    goals.merge(&entries);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "nominal config unreadable"),
            }
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let slit_group = ChannelGroup::new(
            vec![
                sink(&cells.slits.x_width),
                sink(&cells.slits.y_width),
                sink(&cells.slits.x_setpoint),
                sink(&cells.slits.y_setpoint),
                sink(&cells.slits.done),
            ],
            Some(sink(&cells.slits.label)),
            registry.clone(),
        );
        let mirror_groups = cells
            .mirrors
            .iter()
            .map(|row| {
                ChannelGroup::new(
                    vec![sink(&row.readback), sink(&row.setpoint), sink(&row.done)],
                    Some(sink(&row.label)),
                    registry.clone(),
                )
            })
            .collect();
        let goal_groups = cells
            .goals
            .iter()
            .map(|row| {
                ValueGroup::new(
                    row.edit.clone(),
                    row.label.clone(),
                    Some(row.check.clone()),
                    goals.clone(),
                )
            })
            .collect();
        let image_group = ImagerGroup::new(
            ImagerSinks {
                label: sink(&cells.image.title),
                beam_x: sink(&cells.image.beam_x),
                beam_y: sink(&cells.image.beam_y),
                delta_x: sink(&cells.image.delta_x),
                delta_y: sink(&cells.image.delta_y),
                state_read: sink(&cells.image.state_read),
                state_write: sink(&cells.image.state_write),
                image_width: sink(&cells.image.image_width),
                image_data: sink(&cells.image.image_data),
            },
            goals.clone(),
            registry.clone(),
        );

        let auto_switch = Arc::new(AtomicBool::new(false));
        let pending_switch = Arc::new(Mutex::new(None));
        let active_imagers: Arc<Mutex<Vec<(String, Signal<YagState>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        // Automatic camera following: whenever any screen moves, pick the
        // first inserted imager of the active procedure. Applied from
        // `poll` so the rebind never happens inside a device callback.
        for (_, subsystem) in &system {
            let auto = auto_switch.clone();
            let pending = pending_switch.clone();
            let active = active_imagers.clone();
            subsystem.imager.yag().subscribe(move |_| {
                if !auto.load(Ordering::SeqCst) {
                    return;
                }
                let active = active.lock();
                for (name, yag) in active.iter() {
                    match yag.get() {
                        YagState::Unknown => return,
                        YagState::In => {
                            *pending.lock() = Some(name.clone());
                            return;
                        }
                        YagState::Out => {}
                    }
                }
            });
        }

        let first_procedure = procedures[0].name.clone();
        let mut screen = Self {
            system,
            procedures,
            procedure: String::new(),
            current_imager: None,
            goals,
            registry,
            engine,
            settings,
            nominal_file,
            settings_file,
            slit_group,
            mirror_groups,
            goal_groups,
            image_group,
            auto_fill_goals: true,
            auto_switch,
            pending_switch,
            active_imagers,
            slit_results: Arc::new(Mutex::new(None)),
        };
        screen.select_procedure(&first_procedure);
        if let Some(first_key) = screen.active_system().first().cloned() {
            if let Some(subsystem) = screen.subsystem(&first_key) {
                let name = subsystem.imager.name().to_string();
                screen.select_imager(&name);
            }
        }
        Ok(screen)
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// All imager names, in beamline order.
    pub fn imager_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.system
            .iter()
            .map(|(_, sub)| sub.imager.name().to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// All procedure names.
    pub fn procedure_names(&self) -> Vec<String> {
        self.procedures.iter().map(|p| p.name.clone()).collect()
    }

    /// Name of the active procedure.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Name of the imager currently on the image panel.
    pub fn current_imager(&self) -> Option<&str> {
        self.current_imager.as_deref()
    }

    fn subsystem(&self, key: &str) -> Option<Subsystem> {
        self.system
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, sub)| sub.clone())
    }

    fn imager_info(&self, imager_name: &str) -> Option<Subsystem> {
        self.system
            .iter()
            .find(|(_, sub)| sub.imager.name() == imager_name)
            .map(|(_, sub)| sub.clone())
    }

    /// Subsystem keys of the active procedure, flattened across stages.
    pub fn active_system(&self) -> Vec<String> {
        self.procedures
            .iter()
            .find(|p| p.name == self.procedure)
            .map(|p| p.stages.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    fn padded_active(&self) -> Vec<Option<Subsystem>> {
        let mut padded: Vec<Option<Subsystem>> = self
            .active_system()
            .iter()
            .map(|key| self.subsystem(key))
            .collect();
        padded.resize_with(MAX_MIRRORS, || None);
        padded
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// Swap the image panel (and slit readbacks) to another imager.
    pub fn select_imager(&mut self, imager_name: &str) {
        info!(imager = imager_name, "selecting imager");
        let Some(subsystem) = self.imager_info(imager_name) else {
            warn!(imager = imager_name, "unknown imager");
            return;
        };
        if let Err(err) = self
            .image_group
            .bind(Some(subsystem.imager.clone()), subsystem.rotation)
        {
            warn!(imager = imager_name, error = %err, "error on selecting imager");
        }
        self.slit_group
            .rebind(subsystem.slits.as_ref().map(|s| s.channel_source()));
        self.current_imager = Some(imager_name.to_string());
    }

    /// Swap the mirror and goal sections to another procedure.
    pub fn select_procedure(&mut self, procedure_name: &str) {
        if !self.procedures.iter().any(|p| p.name == procedure_name) {
            warn!(procedure = procedure_name, "unknown procedure");
            return;
        }
        info!(procedure = procedure_name, "selecting procedure");
        self.procedure = procedure_name.to_string();

        // Goal fields are keyed by imager name: stash the old values before
        // re-labeling the rows.
        for group in &self.goal_groups {
            group.save_value();
            group.clear();
        }
        let padded = self.padded_active();
        for (index, entry) in padded.iter().enumerate() {
            match entry {
                Some(subsystem) => {
                    self.mirror_groups[index]
                        .rebind(subsystem.mirror.as_ref().map(|m| m.channel_source()));
                    if subsystem.mirror.is_some() {
                        self.mirror_groups[index].show();
                    } else {
                        self.mirror_groups[index].hide();
                    }
                    let group = &self.goal_groups[index];
                    group.setup(Some(subsystem.imager.name()));
                    group.set_check_enabled(subsystem.slits.is_some());
                    group.show();
                }
                None => {
                    self.mirror_groups[index].rebind(None);
                    self.mirror_groups[index].hide();
                    self.goal_groups[index].setup(None);
                    self.goal_groups[index].hide();
                }
            }
        }
        *self.active_imagers.lock() = padded
            .iter()
            .flatten()
            .map(|sub| (sub.imager.name().to_string(), sub.imager.yag().clone()))
            .collect();
        self.image_group.update_deltas();
    }

    /// A goal field finished editing: persist it to the store and refresh
    /// the delta readout.
    pub fn on_goal_edited(&self, index: usize) {
        if let Some(group) = self.goal_groups.get(index) {
            group.save_value();
        }
        self.image_group.update_deltas();
    }

    // -------------------------------------------------------------------------
    // Run control
    // -------------------------------------------------------------------------

    /// Start from idle, or resume from paused.
    pub fn start(&mut self) {
        match self.engine.state() {
            EngineState::Idle => self.start_from_idle(),
            EngineState::Paused => {
                info!("resuming procedure");
                self.auto_switch.store(true, Ordering::SeqCst);
                if let Err(err) = self.engine.resume() {
                    warn!(error = %err, "error on resume");
                }
            }
            EngineState::Running => info!("procedure already running"),
        }
    }

    fn start_from_idle(&mut self) {
        let active = self.active_system();
        let mut goals = Vec::new();
        for (index, key) in active.iter().enumerate() {
            match self.goal_groups.get(index).and_then(ValueGroup::value) {
                Some(goal) => goals.push((key.clone(), goal)),
                None => {
                    info!("please fill all goal fields before alignment");
                    return;
                }
            }
        }
        info!(procedure = %self.procedure, ?goals, "starting procedure");

        let mut targets = Vec::new();
        for (key, goal) in goals {
            let Some(subsystem) = self.subsystem(&key) else {
                warn!(system = %key, "active procedure references unknown subsystem");
                return;
            };
            let Some(mirror) = subsystem.mirror.clone() else {
                warn!(system = %key, "subsystem has no mirror to walk");
                return;
            };
            // Walks start from the saved nominal position when one exists.
            if let Some(nominal) = self.goals.get(mirror.name()) {
                mirror.set_nominal_position(nominal);
            }
            let binding = subsystem
                .imager
                .array_size()
                .and_then(|(sx, sy)| resolve(subsystem.rotation, sx, sy));
            let binding = match binding {
                Ok(binding) => binding,
                Err(err) => {
                    warn!(system = %key, error = %err, "cannot plan against this imager");
                    return;
                }
            };
            targets.push(AlignmentTarget {
                mirror,
                imager: subsystem.imager.clone(),
                axis: binding.centroid_axis(),
                goal: binding.goal_to_native(goal),
            });
        }

        self.auto_switch.store(true, Ordering::SeqCst);
        let plan = AlignmentPlan {
            name: self.procedure.clone(),
            targets,
            knobs: self.settings.walk_knobs(),
        };
        if let Err(err) = self.engine.run(plan) {
            warn!(error = %err, "error in running procedure");
            self.auto_switch.store(false, Ordering::SeqCst);
        }
    }

    /// Ask the engine to pause at its next checkpoint.
    pub fn pause(&mut self) {
        self.auto_switch.store(false, Ordering::SeqCst);
        if self.engine.state() == EngineState::Running {
            info!("pausing procedure");
            self.engine.request_pause();
        }
    }

    /// Abort the current run from any state.
    pub fn abort(&mut self) {
        self.auto_switch.store(false, Ordering::SeqCst);
        if self.engine.state() != EngineState::Idle {
            info!("aborting procedure");
            self.engine.abort();
        }
    }

    /// Run the slit fiducialization over every checked goal row.
    pub fn run_slit_check(&mut self) {
        if self.engine.state() != EngineState::Idle {
            info!("engine busy; slit check not started");
            return;
        }
        let mut targets = Vec::new();
        for (index, entry) in self.padded_active().iter().enumerate() {
            let Some(subsystem) = entry else { continue };
            let Some(slits) = subsystem.slits.clone() else {
                continue;
            };
            if !self.goal_groups[index].is_checked() {
                continue;
            }
            let binding = subsystem
                .imager
                .array_size()
                .and_then(|(sx, sy)| resolve(subsystem.rotation, sx, sy));
            match binding {
                Ok(binding) => targets.push(SlitCheckTarget {
                    imager: subsystem.imager.clone(),
                    slits,
                    axis: binding.centroid_axis(),
                    reflect: binding.mod_x,
                }),
                Err(err) => {
                    warn!(imager = subsystem.imager.name(), error = %err, "skipping slit check target")
                }
            }
        }
        if targets.is_empty() {
            info!("no valid slits selected");
            return;
        }
        info!(count = targets.len(), "starting slit check");
        *self.slit_results.lock() = None;
        self.auto_switch.store(true, Ordering::SeqCst);
        let plan = SlitCheckPlan {
            targets,
            slit_width: self.settings.slit_width,
            samples: self.settings.samples,
            results: self.slit_results.clone(),
        };
        if let Err(err) = self.engine.run(plan) {
            warn!(error = %err, "error on slits button");
            self.auto_switch.store(false, Ordering::SeqCst);
        }
    }

    /// Apply deferred work queued by device callbacks. The frontend calls
    /// this once per frame; headless tests call it directly.
    pub fn poll(&mut self) {
        if self.engine.state() == EngineState::Idle {
            self.auto_switch.store(false, Ordering::SeqCst);
        }
        let pending = self.pending_switch.lock().take();
        if let Some(name) = pending {
            if self.current_imager.as_deref() != Some(name.as_str()) {
                info!(imager = %name, "automatically switching camera");
                self.select_imager(&name);
            }
        }
        let results = self.slit_results.lock().take();
        if let Some(results) = results {
            info!(?results, "slit scan found goals");
            if self.auto_fill_goals {
                for group in &self.goal_groups {
                    if let Some(found) = group.name().and_then(|name| results.get(&name)) {
                        group.set_value((found * 10.0).round() / 10.0);
                        group.save_value();
                    }
                }
                self.image_group.update_deltas();
            }
        }
    }

    /// Enable or disable automatic goal filling after a slit check.
    pub fn set_auto_fill_goals(&mut self, enabled: bool) {
        self.auto_fill_goals = enabled;
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Save every filled active goal to the nominal config.
    pub fn save_goals(&self) {
        let active = self.active_system();
        let mut updates = HashMap::new();
        for group in self.goal_groups.iter().take(active.len()) {
            if let (Some(name), Some(value)) = (group.name(), group.value()) {
                updates.insert(name, value);
            }
        }
        self.persist(updates, "goals");
    }

    /// Save the current pitch of every active mirror to the nominal config.
    pub fn save_mirrors(&self) {
        let mut updates = HashMap::new();
        for key in self.active_system() {
            if let Some(mirror) = self.subsystem(&key).and_then(|sub| sub.mirror) {
                updates.insert(mirror.name().to_string(), mirror.pitch().get());
            }
        }
        self.persist(updates, "mirror positions");
    }

    fn persist(&self, updates: HashMap<String, f64>, what: &str) {
        if updates.is_empty() {
            info!("no {what} to save");
            return;
        }
        info!(count = updates.len(), "saving {what}");
        if let Some(path) = &self.nominal_file {
            if let Err(err) = save_nominal(path, &updates) {
                warn!(error = %err, "error saving {what}");
            }
        }
        self.goals.merge(&updates);
    }

    /// Current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings (dialog `Apply`) and persist them.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
        if let Some(path) = &self.settings_file {
            if let Err(err) = self.settings.save(path) {
                warn!(error = %err, "error saving settings");
            } else {
                info!("settings saved");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Frontend queries
    // -------------------------------------------------------------------------

    /// Engine state, for button gating.
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Status label text.
    pub fn status_text(&self) -> String {
        let state = self.engine.state().to_string();
        let mut chars = state.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => state,
        };
        format!("Status: {capitalized}")
    }

    /// Image extents and beam position for the image panel, when bound.
    pub fn beam_view(&self) -> Option<(u32, u32, f64, f64)> {
        let binding = self.image_group.binding()?;
        let (x, y) = self.image_group.position();
        Some((binding.x_size, binding.y_size, x, y))
    }

    /// Command the displayed imager's screen in or out (the state-select
    /// widget's action).
    pub fn request_current_yag(&self, state: YagState) {
        let Some(name) = self.current_imager.as_deref() else {
            return;
        };
        if let Some(subsystem) = self.imager_info(name) {
            info!(imager = name, ?state, "commanding screen state");
            subsystem.imager.request_yag(state);
        }
    }

    /// The shared goal store.
    pub fn goals(&self) -> &GoalStore {
        &self.goals
    }

    /// The shared connection registry (diagnostics).
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The imager display group (tests and diagnostics).
    pub fn image_group(&self) -> &ImagerGroup {
        &self.image_group
    }
}
