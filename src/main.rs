//! CLI entry point for beamwalk.
//!
//! Loads the layered application config, builds the device layer (simulated
//! beamline, or one described by a beamline config file), wires the
//! alignment screen, and launches the egui frontend. `--check` runs the
//! same wiring headless and prints the first imager's centroid once, which
//! is handy for validating a config file on a console.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use beamwalk::config::{self, AppConfig};
use beamwalk::engine::Engine;
use beamwalk::gui::ConsoleApp;
use beamwalk::hardware::sim::{sim_system, SimBeamline};
use beamwalk::hardware::{SignalHub, Subsystem, YagState};
use beamwalk::screen::{AlignScreen, ScreenCells};
use beamwalk::settings::Settings;
use beamwalk::trace::{self, LogBuffer};

#[derive(Parser)]
#[command(name = "beamwalk")]
#[command(about = "Operator console for optical beamline alignment", long_about = None)]
struct Cli {
    /// Force the simulated beamline even if a system file is configured.
    #[arg(long)]
    sim: bool,

    /// Application config file (TOML).
    #[arg(long, default_value = "beamwalk.toml")]
    config: PathBuf,

    /// Nominal goal/position file, overriding the config.
    #[arg(long)]
    cfg: Option<PathBuf>,

    /// Beamline config file (JSON), overriding the config.
    #[arg(long)]
    system: Option<PathBuf>,

    /// Wire everything headless, print the first centroid, and exit.
    #[arg(long)]
    check: bool,
}

fn build_devices(
    app: &AppConfig,
    hub: &SignalHub,
) -> Result<(Vec<(String, Subsystem)>, SimBeamline, Vec<config::ProcedureDef>)> {
    match (&app.startup.system_file, app.startup.sim) {
        (Some(path), false) => {
            let system_config = config::load_system_config(path)
                .with_context(|| format!("loading beamline config {}", path.display()))?;
            let (system, beamline) =
                config::build_system(&system_config, hub, app.startup.centroid_noise)?;
            Ok((system, beamline, system_config.procedures))
        }
        _ => {
            let (system, beamline) = sim_system(hub, app.startup.centroid_noise);
            Ok((system, beamline, Vec::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config = AppConfig::load_from(&cli.config)?;
    if cli.sim {
        app_config.startup.sim = true;
    }
    if cli.cfg.is_some() {
        app_config.startup.nominal_file = cli.cfg.clone();
    }
    if let Some(system) = &cli.system {
        app_config.startup.system_file = Some(system.clone());
        app_config.startup.sim = false;
    }

    let log_buffer = LogBuffer::new();
    trace::init(&app_config.application.log_level, &log_buffer);
    let mode = if app_config.startup.sim { "sim" } else { "live" };
    tracing::info!(mode, "beamwalk initializing");

    let hub = SignalHub::new();
    let (system, beamline, procedures) = build_devices(&app_config, &hub)?;

    let settings = match &app_config.startup.settings_file {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let cells = ScreenCells::new();
    let screen = AlignScreen::new(
        system,
        procedures,
        &cells,
        Engine::new(),
        settings,
        app_config.startup.nominal_file.clone(),
        app_config.startup.settings_file.clone(),
    )?;

    if cli.check {
        screen.request_current_yag(YagState::In);
        println!(
            "imager: {}",
            screen.image_group().bound_name().unwrap_or_default()
        );
        let (x, y) = screen.image_group().position();
        println!("centroid: ({x:.1}, {y:.1})");
        return Ok(());
    }

    let native_options = eframe::NativeOptions::default();
    let title = app_config.application.name.clone();
    eframe::run_native(
        &title,
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(ConsoleApp::new(
                cc,
                screen,
                cells,
                hub,
                log_buffer,
                Some(beamline),
            )))
        }),
    )
    .map_err(|err| anyhow!("gui terminated: {err}"))
}
