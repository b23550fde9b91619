//! # Beamwalk Core Library
//!
//! This crate is the core library for the `beamwalk` application, an
//! operator console for aligning optical beamlines: it binds mirror, imager,
//! and slit devices to on-screen widget groups, runs multi-step alignment
//! procedures through a run-control engine, and displays live beam centroid
//! feedback with goal-tracking deltas. Organizing the project as a library
//! keeps the controller fully headless; the native GUI (`main.rs`) is one
//! frontend over it.
//!
//! ## Crate Structure
//!
//! - **`rotation`**: the rotation/axis resolver mapping raw sensor centroids
//!   into canonical display coordinates for quarter-turn camera mounts.
//! - **`groups`**: the bound widget groups and their rebinding protocol,
//!   including the epoch guard that discards stale centroid callbacks.
//! - **`goals`**: the shared name→value cache behind goal deltas and saved
//!   nominal positions.
//! - **`connections`**: listener refcounting that lets preserved widgets
//!   keep their channel connection across a rebind.
//! - **`sink`**: the capability interface widget groups write through, plus
//!   the shared cells the egui frontend renders.
//! - **`hardware`**: device traits, live signals, and the simulated
//!   beamline.
//! - **`engine`**: run control (idle/running/paused) and the alignment and
//!   slit-check plans.
//! - **`screen`**: the top-level controller wiring groups, goal store,
//!   registry, and engine together.
//! - **`config`**: layered application config and the JSON beamline/device
//!   map.
//! - **`settings`**: user-adjustable procedure settings.
//! - **`trace`**: tracing setup and the GUI log capture buffer.
//! - **`error`**: the `AlignError` taxonomy shared across the crate.

pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
pub mod goals;
pub mod groups;
pub mod gui;
pub mod hardware;
pub mod rotation;
pub mod screen;
pub mod settings;
pub mod sink;
pub mod trace;
