//! Application and beamline configuration.
//!
//! Two layers of configuration feed the console:
//!
//! 1. **Application config** ([`AppConfig`]): figment-layered TOML plus
//!    `BEAMWALK_`-prefixed environment overrides: log level, sim mode, and
//!    the paths of the other files.
//! 2. **Beamline config** ([`SystemConfig`]): a JSON file combining the
//!    device database (mirrors/imagers/slits with channel prefixes and sim
//!    physics) with the subsystem map naming which devices align together
//!    and at what camera rotation, plus optional named procedures.
//!
//! Alongside these sits the *nominal* config: a flat JSON name→value map of
//! saved goals and mirror positions, overwritten field-by-field on save and
//! merged into the screen's [`crate::goals::GoalStore`] on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AlignError, AppResult};
use crate::hardware::sim::{BeamCoupling, SimBeamline, SimImager, SimMirror, SimSlits};
use crate::hardware::{SignalHub, Subsystem};

// =============================================================================
// Application config (figment)
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings.
    pub application: ApplicationConfig,
    /// Startup mode and file locations.
    pub startup: StartupConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name (window title).
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Startup mode and file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Run against the simulated beamline.
    pub sim: bool,
    /// Beamline config (device database + subsystem map).
    pub system_file: Option<PathBuf>,
    /// Nominal goal/position file.
    pub nominal_file: Option<PathBuf>,
    /// User settings file.
    pub settings_file: Option<PathBuf>,
    /// Simulated centroid jitter amplitude, pixels.
    pub centroid_noise: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "beamwalk".to_string(),
                log_level: "info".to_string(),
            },
            startup: StartupConfig {
                sim: true,
                system_file: None,
                nominal_file: None,
                settings_file: None,
                centroid_noise: 0.0,
            },
        }
    }
}

impl AppConfig {
    /// Load from `beamwalk.toml` and `BEAMWALK_` environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from("beamwalk.toml")
    }

    /// Load from a specific TOML file, layered over built-in defaults and
    /// under environment overrides (e.g. `BEAMWALK_STARTUP__SIM=false`).
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BEAMWALK_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(AlignError::Configuration(format!(
                "invalid log level '{}'",
                self.application.log_level
            )));
        }
        if self.startup.centroid_noise < 0.0 {
            return Err(AlignError::Configuration(
                "centroid_noise must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Beamline config
// =============================================================================

/// Device database plus subsystem map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Mirror device definitions.
    pub mirrors: Vec<MirrorDef>,
    /// Imager device definitions.
    pub imagers: Vec<ImagerDef>,
    /// Slit device definitions.
    #[serde(default)]
    pub slits: Vec<SlitsDef>,
    /// Ordered subsystem map (z order along the beamline).
    pub systems: Vec<SystemEntry>,
    /// Named procedures; defaults are derived when empty.
    #[serde(default)]
    pub procedures: Vec<ProcedureDef>,
}

/// A steering mirror definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorDef {
    /// Device name.
    pub name: String,
    /// Channel address prefix.
    pub prefix: String,
    /// Initial pitch for the simulated device.
    #[serde(default)]
    pub initial_pitch: f64,
}

/// How one mirror steers an imager's centroid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingDef {
    /// Upstream mirror name.
    pub mirror: String,
    /// Sensitivity in pixels per pitch unit.
    pub gain: f64,
}

/// An imaging screen definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagerDef {
    /// Device name.
    pub name: String,
    /// Channel address prefix.
    pub prefix: String,
    /// Sensor width in pixels (native frame).
    pub width: u32,
    /// Sensor height in pixels (native frame).
    pub height: u32,
    /// Centroid with all upstream mirrors at zero pitch.
    #[serde(default = "default_center")]
    pub center: (f64, f64),
    /// Upstream mirror couplings for the simulated beam.
    #[serde(default)]
    pub couplings: Vec<CouplingDef>,
}

fn default_center() -> (f64, f64) {
    (512.0, 384.0)
}

/// A slit aperture definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlitsDef {
    /// Device name.
    pub name: String,
    /// Channel address prefix.
    pub prefix: String,
    /// Pixel position the beam clips to when the slits close.
    pub fiducial_x: f64,
}

/// One subsystem: which devices align together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEntry {
    /// Subsystem key (procedure stages refer to this).
    pub name: String,
    /// Mirror device name, absent for view-only stations.
    pub mirror: Option<String>,
    /// Imager device name.
    pub imager: String,
    /// Slit device name, if the station has one.
    pub slits: Option<String>,
    /// Camera mount rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
}

/// A named alignment procedure: ordered stages of subsystem keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureDef {
    /// Display name.
    pub name: String,
    /// Each stage is a list of subsystem keys walked in order.
    pub stages: Vec<Vec<String>>,
}

/// Derive the default procedure table: one procedure per subsystem plus a
/// combined walk when there is more than one.
pub fn default_procedures(system_keys: &[String]) -> Vec<ProcedureDef> {
    let mut procedures: Vec<ProcedureDef> = system_keys
        .iter()
        .map(|key| ProcedureDef {
            name: key.clone(),
            stages: vec![vec![key.clone()]],
        })
        .collect();
    if system_keys.len() > 1 {
        procedures.push(ProcedureDef {
            name: "full beamline".to_string(),
            stages: vec![system_keys.to_vec()],
        });
    }
    procedures
}

/// Load a beamline config from JSON.
pub fn load_system_config(path: &Path) -> AppResult<SystemConfig> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Construct the simulated device layer described by `config`.
///
/// Returns the ordered subsystem map and the beamline physics handle, which
/// must be kept alive for centroids to track the optics.
pub fn build_system(
    config: &SystemConfig,
    hub: &SignalHub,
    noise: f64,
) -> AppResult<(Vec<(String, Subsystem)>, SimBeamline)> {
    let mut mirrors = HashMap::new();
    for def in &config.mirrors {
        let mirror = SimMirror::new(&def.name, &def.prefix, def.initial_pitch, hub);
        mirrors.insert(def.name.clone(), mirror);
    }
    let mut slits = HashMap::new();
    for def in &config.slits {
        slits.insert(
            def.name.clone(),
            SimSlits::new(&def.name, &def.prefix, def.fiducial_x, hub),
        );
    }

    // The slits in front of an imager are whatever its subsystem names.
    let slits_for_imager: HashMap<&str, &str> = config
        .systems
        .iter()
        .filter_map(|entry| {
            entry
                .slits
                .as_deref()
                .map(|slit_name| (entry.imager.as_str(), slit_name))
        })
        .collect();

    let mut imagers = HashMap::new();
    let mut couplings = Vec::new();
    for def in &config.imagers {
        let imager = SimImager::new(&def.name, &def.prefix, (def.width, def.height), hub);
        let mut coupled_mirrors = Vec::new();
        for coupling in &def.couplings {
            let mirror = mirrors.get(&coupling.mirror).ok_or_else(|| {
                AlignError::Configuration(format!(
                    "imager '{}' couples to unknown mirror '{}'",
                    def.name, coupling.mirror
                ))
            })?;
            coupled_mirrors.push((mirror.clone(), coupling.gain));
        }
        let coupled_slits = slits_for_imager
            .get(def.name.as_str())
            .and_then(|name| slits.get(*name))
            .cloned();
        couplings.push(BeamCoupling {
            imager: imager.clone(),
            center: def.center,
            mirrors: coupled_mirrors,
            slits: coupled_slits,
        });
        imagers.insert(def.name.clone(), imager);
    }
    let beamline = SimBeamline::new(couplings, noise);

    let mut system = Vec::new();
    for entry in &config.systems {
        let imager = imagers.get(&entry.imager).ok_or_else(|| {
            AlignError::Configuration(format!(
                "system '{}' references unknown imager '{}'",
                entry.name, entry.imager
            ))
        })?;
        let mirror = match &entry.mirror {
            Some(name) => Some(mirrors.get(name).cloned().ok_or_else(|| {
                AlignError::Configuration(format!(
                    "system '{}' references unknown mirror '{name}'",
                    entry.name
                ))
            })?),
            None => None,
        };
        let station_slits = match &entry.slits {
            Some(name) => Some(slits.get(name).cloned().ok_or_else(|| {
                AlignError::Configuration(format!(
                    "system '{}' references unknown slits '{name}'",
                    entry.name
                ))
            })?),
            None => None,
        };
        debug!(system = %entry.name, imager = %entry.imager, "built subsystem");
        system.push((
            entry.name.clone(),
            Subsystem {
                mirror: mirror.map(|m| m as _),
                imager: imager.clone() as _,
                slits: station_slits.map(|s| s as _),
                rotation: entry.rotation,
            },
        ));
    }
    info!(subsystems = system.len(), "beamline config loaded");
    Ok((system, beamline))
}

// =============================================================================
// Nominal config (saved goals and positions)
// =============================================================================

/// Read the nominal name→value map; a missing file is an empty map.
pub fn read_nominal(path: &Path) -> AppResult<HashMap<String, f64>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Merge `updates` into the nominal file, preserving unrelated entries.
pub fn save_nominal(path: &Path, updates: &HashMap<String, f64>) -> AppResult<()> {
    let mut merged = read_nominal(path).unwrap_or_default();
    for (name, value) in updates {
        merged.insert(name.clone(), *value);
    }
    let raw = serde_json::to_string_pretty(&merged)?;
    std::fs::write(path, raw)?;
    info!(path = %path.display(), entries = updates.len(), "nominal config saved");
    Ok(())
}
