//! The log console panel at the bottom of the screen.

use eframe::egui;
use egui::Color32;
use tracing::Level;

use crate::trace::{LogBuffer, LogEntry};

fn level_color(level: Level) -> Color32 {
    match level {
        Level::ERROR => Color32::from_rgb(255, 100, 100),
        Level::WARN => Color32::from_rgb(255, 255, 100),
        Level::INFO => Color32::from_rgb(100, 200, 255),
        Level::DEBUG => Color32::from_rgb(150, 150, 150),
        Level::TRACE => Color32::from_rgb(200, 150, 255),
    }
}

/// Renders the shared [`LogBuffer`] with a severity filter.
pub struct LogPanel {
    buffer: LogBuffer,
    min_level: Level,
}

impl LogPanel {
    /// Panel over `buffer`, showing info and up by default.
    pub fn new(buffer: LogBuffer) -> Self {
        Self {
            buffer,
            min_level: Level::INFO,
        }
    }

    fn passes(&self, entry: &LogEntry) -> bool {
        entry.level <= self.min_level
    }

    /// Draw the panel.
    pub fn show(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.strong("Log");
            egui::ComboBox::from_id_salt("log_level")
                .selected_text(self.min_level.as_str())
                .show_ui(ui, |ui| {
                    for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE]
                    {
                        ui.selectable_value(&mut self.min_level, level, level.as_str());
                    }
                });
            if ui.button("Clear").clicked() {
                self.buffer.clear();
            }
        });
        egui::ScrollArea::vertical()
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for entry in self.buffer.entries() {
                    if !self.passes(&entry) {
                        continue;
                    }
                    let line = format!(
                        "{} {:5} {} {}",
                        entry.timestamp.format("%m-%d %H:%M:%S"),
                        entry.level.as_str(),
                        entry.target,
                        entry.message
                    );
                    ui.label(
                        egui::RichText::new(line)
                            .monospace()
                            .color(level_color(entry.level)),
                    );
                }
            });
    }
}
