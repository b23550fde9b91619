//! The eframe/egui implementation of the alignment console.
//!
//! The GUI is a thin adapter: every value it shows lives in the shared
//! [`ScreenCells`] written by the widget groups, and every user action maps
//! to one [`AlignScreen`] method. Passthrough widgets carry channel
//! addresses that are resolved against the [`SignalHub`] at render time.

mod log_panel;

use std::time::Duration;

use eframe::egui;
use egui_plot::{Plot, Points};

use crate::engine::EngineState;
use crate::hardware::sim::SimBeamline;
use crate::hardware::{SignalHub, YagState};
use crate::screen::{AlignScreen, ScreenCells, MAX_MIRRORS};
use crate::settings::Settings;
use crate::sink::{Sink, TextCell};
use crate::trace::LogBuffer;

use log_panel::LogPanel;

/// The main GUI application.
pub struct ConsoleApp {
    screen: AlignScreen,
    cells: ScreenCells,
    hub: SignalHub,
    log_panel: LogPanel,
    goal_drafts: Vec<String>,
    show_settings: bool,
    settings_draft: Settings,
    auto_fill: bool,
    // The sim physics dies with the app, not before.
    _beamline: Option<SimBeamline>,
}

impl ConsoleApp {
    /// Create the app over an already-wired screen.
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        screen: AlignScreen,
        cells: ScreenCells,
        hub: SignalHub,
        log_buffer: LogBuffer,
        beamline: Option<SimBeamline>,
    ) -> Self {
        let settings_draft = screen.settings().clone();
        Self {
            screen,
            cells,
            hub,
            log_panel: LogPanel::new(log_buffer),
            goal_drafts: vec![String::new(); MAX_MIRRORS],
            show_settings: false,
            settings_draft,
            auto_fill: true,
            _beamline: beamline,
        }
    }

    fn channel_text(&self, cell: &TextCell) -> String {
        cell.channel()
            .and_then(|address| self.hub.value(&address))
            .map(|value| format!("{value:.3}"))
            .unwrap_or_default()
    }

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("beamwalk");
            ui.separator();
            ui.label(self.screen.status_text());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Settings").clicked() {
                    self.settings_draft = self.screen.settings().clone();
                    self.show_settings = true;
                }
                let state = self.screen.engine_state();
                if ui
                    .add_enabled(state != EngineState::Idle, egui::Button::new("Abort"))
                    .clicked()
                {
                    self.screen.abort();
                }
                if ui
                    .add_enabled(state == EngineState::Running, egui::Button::new("Pause"))
                    .clicked()
                {
                    self.screen.pause();
                }
                let start_label = if state == EngineState::Paused {
                    "Resume"
                } else {
                    "Start"
                };
                if ui
                    .add_enabled(state != EngineState::Running, egui::Button::new(start_label))
                    .clicked()
                {
                    self.screen.start();
                }
            });
        });
    }

    fn procedure_panel(&mut self, ui: &mut egui::Ui) {
        let selected = self.screen.procedure().to_string();
        let mut chosen = None;
        egui::ComboBox::from_label("Procedure")
            .selected_text(selected.clone())
            .show_ui(ui, |ui| {
                for name in self.screen.procedure_names() {
                    if ui.selectable_label(name == selected, &name).clicked() {
                        chosen = Some(name);
                    }
                }
            });
        if let Some(name) = chosen {
            if name != selected {
                self.screen.select_procedure(&name);
            }
        }

        ui.separator();
        ui.strong("Mirrors");
        egui::Grid::new("mirror_rows").striped(true).show(ui, |ui| {
            ui.label("");
            ui.label("readback");
            ui.label("setpoint");
            ui.label("done");
            ui.end_row();
            for row in &self.cells.mirrors {
                if !row.label.is_visible() {
                    continue;
                }
                ui.label(row.label.text());
                ui.monospace(self.channel_text(&row.readback));
                ui.monospace(self.channel_text(&row.setpoint));
                ui.monospace(self.channel_text(&row.done));
                ui.end_row();
            }
        });

        ui.separator();
        ui.strong("Goals");
        let mut edited = None;
        egui::Grid::new("goal_rows").show(ui, |ui| {
            for (index, row) in self.cells.goals.iter().enumerate() {
                if !row.label.is_visible() {
                    continue;
                }
                ui.label(row.label.text());
                let draft = &mut self.goal_drafts[index];
                let response = ui.add(
                    egui::TextEdit::singleline(draft)
                        .desired_width(70.0)
                        .interactive(row.edit.is_enabled()),
                );
                if response.has_focus() {
                    // The operator owns the cell while typing.
                    row.edit.set_text(draft);
                } else {
                    *draft = row.edit.text();
                }
                if response.lost_focus() {
                    edited = Some(index);
                }
                let mut checked = row.check.is_checked();
                if ui
                    .add_enabled(
                        row.check.is_enabled(),
                        egui::Checkbox::new(&mut checked, "slits"),
                    )
                    .changed()
                {
                    row.check.set_checked(checked);
                }
                ui.end_row();
            }
        });
        if let Some(index) = edited {
            self.screen.on_goal_edited(index);
        }

        ui.horizontal(|ui| {
            if ui.button("Check slits").clicked() {
                self.screen.run_slit_check();
            }
            if ui.checkbox(&mut self.auto_fill, "auto-fill goals").changed() {
                self.screen.set_auto_fill_goals(self.auto_fill);
            }
        });
        ui.horizontal(|ui| {
            if ui.button("Save goals").clicked() {
                self.screen.save_goals();
            }
            if ui.button("Save mirrors").clicked() {
                self.screen.save_mirrors();
            }
        });

        if self.cells.slits.label.is_visible() {
            ui.separator();
            ui.strong("Slits");
            ui.label(self.cells.slits.label.text());
            egui::Grid::new("slit_row").show(ui, |ui| {
                ui.label("width rbv");
                ui.monospace(self.channel_text(&self.cells.slits.x_width));
                ui.monospace(self.channel_text(&self.cells.slits.y_width));
                ui.end_row();
                ui.label("width set");
                ui.monospace(self.channel_text(&self.cells.slits.x_setpoint));
                ui.monospace(self.channel_text(&self.cells.slits.y_setpoint));
                ui.end_row();
            });
        }
    }

    fn image_panel(&mut self, ui: &mut egui::Ui) {
        let current = self.screen.current_imager().unwrap_or("").to_string();
        let mut chosen = None;
        egui::ComboBox::from_label("Imager")
            .selected_text(self.cells.image.title.text())
            .show_ui(ui, |ui| {
                for name in self.screen.imager_names() {
                    if ui.selectable_label(name == current, &name).clicked() {
                        chosen = Some(name);
                    }
                }
            });
        if let Some(name) = chosen {
            if name != current {
                self.screen.select_imager(&name);
            }
        }

        if let Some((x_size, y_size, x, y)) = self.screen.beam_view() {
            Plot::new("beam_image")
                .include_x(0.0)
                .include_x(f64::from(x_size))
                .include_y(0.0)
                .include_y(f64::from(y_size))
                .show_axes([true, true])
                .height(320.0)
                .show(ui, |plot_ui| {
                    plot_ui.points(Points::new(vec![[x, y]]).radius(5.0));
                });
        } else {
            ui.weak("no imager bound");
        }

        egui::Grid::new("centroid_readouts").show(ui, |ui| {
            ui.label("Beam X");
            ui.monospace(self.cells.image.beam_x.text());
            ui.label("ΔX");
            ui.monospace(self.cells.image.delta_x.text());
            ui.end_row();
            ui.label("Beam Y");
            ui.monospace(self.cells.image.beam_y.text());
            ui.label("ΔY");
            ui.monospace(self.cells.image.delta_y.text());
            ui.end_row();
        });

        ui.horizontal(|ui| {
            ui.label("Screen state:");
            let state = self
                .cells
                .image
                .state_read
                .channel()
                .and_then(|address| self.hub.value(&address));
            let text = match state {
                Some(code) if code == 2.0 => "IN",
                Some(code) if code == 1.0 => "OUT",
                Some(_) => "UNKNOWN",
                None => "-",
            };
            ui.monospace(text);
            if ui.button("Insert").clicked() {
                self.screen.request_current_yag(YagState::In);
            }
            if ui.button("Retract").clicked() {
                self.screen.request_current_yag(YagState::Out);
            }
        });
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        if !self.show_settings {
            return;
        }
        let mut open = true;
        let mut apply = false;
        let mut cancel = false;
        egui::Window::new("Settings")
            .open(&mut open)
            .resizable(false)
            .show(ctx, |ui| {
                let draft = &mut self.settings_draft;
                egui::Grid::new("settings_grid").show(ui, |ui| {
                    ui.label("First step");
                    ui.add(egui::DragValue::new(&mut draft.first_step).speed(0.1));
                    ui.end_row();
                    ui.label("Tolerance");
                    ui.add(egui::DragValue::new(&mut draft.tolerance).speed(0.1));
                    ui.end_row();
                    ui.label("Averages");
                    ui.add(egui::DragValue::new(&mut draft.averages));
                    ui.end_row();
                    ui.label("Timeout (s)");
                    let mut seconds = draft.timeout.as_secs();
                    if ui.add(egui::DragValue::new(&mut seconds)).changed() {
                        draft.timeout = Duration::from_secs(seconds);
                    }
                    ui.end_row();
                    ui.label("Tolerance scaling");
                    ui.add(egui::DragValue::new(&mut draft.tol_scaling).speed(0.1));
                    ui.end_row();
                    ui.label("Min beam");
                    optional_value(ui, &mut draft.min_beam);
                    ui.end_row();
                    ui.label("Min rate");
                    optional_value(ui, &mut draft.min_rate);
                    ui.end_row();
                    ui.label("Slit width");
                    ui.add(egui::DragValue::new(&mut draft.slit_width).speed(0.01));
                    ui.end_row();
                    ui.label("Slit samples");
                    ui.add(egui::DragValue::new(&mut draft.samples));
                    ui.end_row();
                    ui.label("Close attenuator");
                    ui.checkbox(&mut draft.close_attenuator, "");
                    ui.end_row();
                });
                ui.horizontal(|ui| {
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                    if ui.button("Apply").clicked() {
                        apply = true;
                    }
                });
            });
        if apply {
            self.screen.apply_settings(self.settings_draft.clone());
            self.show_settings = false;
        } else if cancel || !open {
            // Dropping the draft restores the last applied settings.
            self.settings_draft = self.screen.settings().clone();
            self.show_settings = false;
        }
    }
}

fn optional_value(ui: &mut egui::Ui, value: &mut Option<f64>) {
    let mut enabled = value.is_some();
    ui.horizontal(|ui| {
        if ui.checkbox(&mut enabled, "").changed() {
            *value = if enabled { Some(1.0) } else { None };
        }
        if let Some(inner) = value.as_mut() {
            ui.add(egui::DragValue::new(inner).speed(0.1));
        }
    });
}

impl eframe::App for ConsoleApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.screen.poll();

        egui::TopBottomPanel::top("controls").show(ctx, |ui| self.top_bar(ui));
        egui::TopBottomPanel::bottom("log")
            .resizable(true)
            .default_height(140.0)
            .show(ctx, |ui| self.log_panel.show(ui));
        egui::SidePanel::left("system")
            .default_width(340.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.procedure_panel(ui));
            });
        egui::CentralPanel::default().show(ctx, |ui| self.image_panel(ui));
        self.settings_window(ctx);

        // Centroids tick from device callbacks, not egui events.
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
