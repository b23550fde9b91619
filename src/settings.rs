//! User-adjustable procedure settings.
//!
//! The knobs exposed in the settings window, persisted as JSON next to the
//! nominal config. The dialog edits a draft copy; `Apply` saves it, `Cancel`
//! restores the snapshot taken when the dialog opened.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::WalkKnobs;
use crate::error::AppResult;

/// Procedure tuning and safety knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Probe step for the sensitivity estimate, mirror pitch units.
    pub first_step: f64,
    /// Convergence tolerance, pixels.
    pub tolerance: f64,
    /// Centroid samples averaged per measurement.
    pub averages: u32,
    /// Per-target walk budget.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Tolerance multiplier for intermediate targets.
    pub tol_scaling: f64,
    /// Beam-drop guard: discard centroid samples below this magnitude.
    /// `None` disables the guard.
    pub min_beam: Option<f64>,
    /// Minimum acceptable beam rate in Hz; `None` disables the suspender.
    pub min_rate: Option<f64>,
    /// Aperture width used by the slit check, mm.
    pub slit_width: f64,
    /// Centroid samples averaged by the slit check.
    pub samples: u32,
    /// Close the front-end attenuator while walking.
    pub close_attenuator: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            first_step: 6.0,
            tolerance: 5.0,
            averages: 100,
            timeout: Duration::from_secs(600),
            tol_scaling: 8.0,
            min_beam: Some(1.0),
            min_rate: Some(1.0),
            slit_width: 0.2,
            samples: 100,
            close_attenuator: true,
        }
    }
}

impl Settings {
    /// Load from a JSON file, falling back to defaults when the file does
    /// not exist yet.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no settings file; using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist to a JSON file.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// The engine-facing subset of these settings.
    pub fn walk_knobs(&self) -> WalkKnobs {
        WalkKnobs {
            first_step: self.first_step,
            tolerance: self.tolerance,
            averages: self.averages,
            timeout: self.timeout,
            tol_scaling: self.tol_scaling,
            min_beam: self.min_beam,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.tolerance = 2.5;
        settings.min_rate = None;
        settings.timeout = Duration::from_secs(90);
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"tolerance": 1.0}"#).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.tolerance, 1.0);
        assert_eq!(loaded.averages, Settings::default().averages);
    }
}
