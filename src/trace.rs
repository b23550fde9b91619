//! Tracing setup and in-process log capture.
//!
//! Structured logging runs through `tracing`/`tracing-subscriber`: an
//! `EnvFilter` (overridable with `RUST_LOG`), a terminal fmt layer, and a
//! capture layer that copies every event into a fixed-capacity [`LogBuffer`]
//! rendered by the GUI's log console.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const MAX_LOG_ENTRIES: usize = 1000;

/// One captured log event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Wall-clock capture time.
    pub timestamp: DateTime<Local>,
    /// Event severity.
    pub level: Level,
    /// Module path the event came from.
    pub target: String,
    /// Rendered message plus structured fields.
    pub message: String,
}

/// A thread-safe, fixed-capacity log buffer shared with the GUI.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<VecDeque<LogEntry>>>);

impl LogBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.0.lock();
        if entries.len() >= MAX_LOG_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the captured entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().iter().cloned().collect()
    }

    /// Discard everything captured so far.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Tracing layer feeding a [`LogBuffer`].
pub struct CaptureLayer {
    buffer: LogBuffer,
}

impl CaptureLayer {
    /// Capture into `buffer`.
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.buffer.push(LogEntry {
            timestamp: Local::now(),
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message + &visitor.fields,
        });
    }
}

/// Install the global subscriber: env-filter (default `level`), terminal
/// output, and GUI capture. Safe to call more than once; later calls keep
/// the existing subscriber (relevant under test).
pub fn init(level: &str, buffer: &LogBuffer) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(CaptureLayer::new(buffer.clone()))
        .try_init();
}
