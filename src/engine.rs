//! Run control and alignment plans.
//!
//! The [`Engine`] is the console's run-control collaborator: it executes one
//! plan at a time as a background task and exposes the classic
//! idle/running/paused state machine with pause/resume/abort entry points.
//! The widget-binding core never drives timing itself; it only reacts to the
//! engine state (button enabling, status label).
//!
//! Plans implement the [`Plan`] trait and cooperate with run control by
//! calling [`PlanContext::checkpoint`] between steps: a checkpoint parks the
//! task while a pause is requested and aborts it when the operator bails
//! out.
//!
//! Two plan kinds ship here:
//!
//! - [`AlignmentPlan`]: iteratively walks mirror pitch until each imager's
//!   centroid sits within tolerance of its goal (native sensor frame).
//! - [`SlitCheckPlan`]: closes slits to a fiducialization width, measures
//!   where the transmitted beam lands, and reports the found goal per
//!   imager in display coordinates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{AlignError, AppResult};
use crate::hardware::{Imager, Mirror, Slits, YagState};
use crate::rotation::CentroidAxis;

/// Upper bound on correction steps per target before giving up.
const MAX_WALK_ITERATIONS: u32 = 50;
/// Polling cadence while waiting for a mirror to settle.
const SETTLE_POLL: Duration = Duration::from_millis(5);
/// Cadence between centroid samples when averaging.
const SAMPLE_PERIOD: Duration = Duration::from_millis(1);

/// Run-control state, as shown in the status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No plan loaded; ready to start.
    #[default]
    Idle,
    /// A plan task is executing.
    Running,
    /// A plan task is parked at a checkpoint.
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunCommand {
    Continue,
    Pause,
    Abort,
}

/// Cooperation handle passed to an executing plan.
pub struct PlanContext {
    commands: watch::Receiver<RunCommand>,
    state: Arc<watch::Sender<EngineState>>,
}

impl PlanContext {
    /// Honor any pending pause/abort request. Call between steps; the
    /// future resolves once the engine is allowed to continue.
    pub async fn checkpoint(&mut self) -> anyhow::Result<()> {
        if *self.commands.borrow() == RunCommand::Continue {
            return Ok(());
        }
        loop {
            let command = *self.commands.borrow_and_update();
            match command {
                RunCommand::Abort => bail!("aborted by operator"),
                RunCommand::Continue => {
                    let _ = self.state.send(EngineState::Running);
                    return Ok(());
                }
                RunCommand::Pause => {
                    let _ = self.state.send(EngineState::Paused);
                    self.commands
                        .changed()
                        .await
                        .context("run control dropped while paused")?;
                }
            }
        }
    }
}

/// A unit of work the engine can execute.
#[async_trait]
pub trait Plan: Send + Sync {
    /// Human-readable plan name for logs and reports.
    fn name(&self) -> String;
    /// Run to completion, checkpointing between steps.
    async fn execute(&self, ctx: &mut PlanContext) -> anyhow::Result<()>;
}

/// Outcome summary of the most recent run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Plan name.
    pub plan: String,
    /// When execution started.
    pub started: DateTime<Utc>,
    /// When execution finished (successfully or not).
    pub finished: DateTime<Utc>,
    /// Whether the plan completed without error.
    pub success: bool,
    /// Error text for failed runs, empty otherwise.
    pub detail: String,
}

/// Run-control engine: executes one plan at a time on the tokio runtime.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Engine {
    state_tx: Arc<watch::Sender<EngineState>>,
    state_rx: watch::Receiver<EngineState>,
    command_tx: Arc<watch::Sender<RunCommand>>,
    last_report: Arc<Mutex<Option<RunReport>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an idle engine.
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        let (command_tx, _) = watch::channel(RunCommand::Continue);
        Self {
            state_tx: Arc::new(state_tx),
            state_rx,
            command_tx: Arc::new(command_tx),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    /// Current run-control state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for state transitions (status label updates).
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Report of the most recent completed run, if any.
    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report.lock().clone()
    }

    /// Start a plan. Fails with [`AlignError::EngineBusy`] unless idle.
    ///
    /// Must be called from within a tokio runtime; the plan executes on a
    /// spawned task and this call returns immediately.
    pub fn run(&self, plan: impl Plan + 'static) -> AppResult<()> {
        let state = self.state();
        if state != EngineState::Idle {
            return Err(AlignError::EngineBusy(state.to_string()));
        }
        let _ = self.command_tx.send(RunCommand::Continue);
        let _ = self.state_tx.send(EngineState::Running);

        let mut ctx = PlanContext {
            commands: self.command_tx.subscribe(),
            state: self.state_tx.clone(),
        };
        let state_tx = self.state_tx.clone();
        let report_slot = self.last_report.clone();
        let name = plan.name();
        info!(plan = %name, "starting plan");
        tokio::spawn(async move {
            let started = Utc::now();
            let result = plan.execute(&mut ctx).await;
            let detail = match &result {
                Ok(()) => {
                    info!(plan = %name, "plan complete");
                    String::new()
                }
                Err(err) => {
                    warn!(plan = %name, error = %err, "plan stopped");
                    err.to_string()
                }
            };
            *report_slot.lock() = Some(RunReport {
                plan: name,
                started,
                finished: Utc::now(),
                success: result.is_ok(),
                detail,
            });
            let _ = state_tx.send(EngineState::Idle);
        });
        Ok(())
    }

    /// Ask the running plan to park at its next checkpoint.
    pub fn request_pause(&self) {
        if self.state() == EngineState::Running {
            let _ = self.command_tx.send(RunCommand::Pause);
        }
    }

    /// Resume a paused plan.
    pub fn resume(&self) -> AppResult<()> {
        let state = self.state();
        if state != EngineState::Paused {
            return Err(AlignError::Engine(format!("cannot resume from {state}")));
        }
        let _ = self.command_tx.send(RunCommand::Continue);
        Ok(())
    }

    /// Abandon the current plan from any non-idle state.
    pub fn abort(&self) {
        if self.state() != EngineState::Idle {
            let _ = self.command_tx.send(RunCommand::Abort);
        }
    }
}

// =============================================================================
// Walk knobs
// =============================================================================

/// Tuning parameters for the alignment walk, sourced from user settings.
#[derive(Debug, Clone)]
pub struct WalkKnobs {
    /// Probe step used to estimate the pitch-to-pixel sensitivity.
    pub first_step: f64,
    /// Convergence tolerance in pixels for the final target.
    pub tolerance: f64,
    /// Centroid samples averaged per measurement.
    pub averages: u32,
    /// Per-target wall-clock budget.
    pub timeout: Duration,
    /// Tolerance multiplier for intermediate targets.
    pub tol_scaling: f64,
    /// Samples with |centroid| below this count as "no beam" and are
    /// discarded; `None` disables the guard.
    pub min_beam: Option<f64>,
}

// =============================================================================
// AlignmentPlan
// =============================================================================

/// One mirror/imager pair to steer, in the sensor's native frame.
pub struct AlignmentTarget {
    /// Mirror whose pitch is walked.
    pub mirror: Arc<dyn Mirror>,
    /// Imager providing feedback.
    pub imager: Arc<dyn Imager>,
    /// Which native centroid channel the display's x goal refers to.
    pub axis: CentroidAxis,
    /// Goal in native sensor coordinates.
    pub goal: f64,
}

/// Iterative pitch walk over an ordered set of targets.
pub struct AlignmentPlan {
    /// Procedure name, for logs.
    pub name: String,
    /// Targets walked in order; earlier screens are retracted for later
    /// targets.
    pub targets: Vec<AlignmentTarget>,
    /// Walk tuning.
    pub knobs: WalkKnobs,
}

#[async_trait]
impl Plan for AlignmentPlan {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, ctx: &mut PlanContext) -> anyhow::Result<()> {
        for (index, target) in self.targets.iter().enumerate() {
            ctx.checkpoint().await?;
            // Only the active target's screen may sit in the beam.
            for (other_index, other) in self.targets.iter().enumerate() {
                other.imager.request_yag(if other_index == index {
                    YagState::In
                } else {
                    YagState::Out
                });
            }
            let last = index + 1 == self.targets.len();
            let tolerance = if last {
                self.knobs.tolerance
            } else {
                self.knobs.tolerance * self.knobs.tol_scaling
            };
            info!(
                imager = target.imager.name(),
                mirror = target.mirror.name(),
                goal = target.goal,
                tolerance,
                "walking target"
            );
            timeout(
                self.knobs.timeout,
                walk_target(target, &self.knobs, tolerance, ctx),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "timed out walking {} after {:?}",
                    target.imager.name(),
                    self.knobs.timeout
                )
            })??;
        }
        Ok(())
    }
}

async fn walk_target(
    target: &AlignmentTarget,
    knobs: &WalkKnobs,
    tolerance: f64,
    ctx: &mut PlanContext,
) -> anyhow::Result<()> {
    // Start from the recorded nominal position when one exists.
    if let Some(nominal) = target.mirror.nominal_position() {
        target.mirror.set_pitch(nominal);
        wait_settled(&target.mirror).await?;
    }
    let mut pitch = target.mirror.pitch().get();
    let mut current = sample_centroid(&target.imager, target.axis, knobs).await?;
    if (target.goal - current).abs() <= tolerance {
        info!(imager = target.imager.name(), centroid = current, "already within tolerance");
        return Ok(());
    }

    // Probe step to estimate pixels-per-pitch sensitivity.
    target.mirror.set_pitch(pitch + knobs.first_step);
    wait_settled(&target.mirror).await?;
    let probed = sample_centroid(&target.imager, target.axis, knobs).await?;
    let mut sensitivity = (probed - current) / knobs.first_step;
    ensure!(
        sensitivity.is_finite() && sensitivity.abs() > f64::EPSILON,
        "no centroid response to pitch on {}",
        target.imager.name()
    );
    pitch += knobs.first_step;
    current = probed;

    for iteration in 0..MAX_WALK_ITERATIONS {
        ctx.checkpoint().await?;
        let error = target.goal - current;
        if error.abs() <= tolerance {
            info!(
                imager = target.imager.name(),
                iteration,
                centroid = current,
                "converged"
            );
            return Ok(());
        }
        let step = error / sensitivity;
        target.mirror.set_pitch(pitch + step);
        wait_settled(&target.mirror).await?;
        let next = sample_centroid(&target.imager, target.axis, knobs).await?;
        if step.abs() > f64::EPSILON {
            let measured = (next - current) / step;
            if measured.is_finite() && measured.abs() > f64::EPSILON {
                sensitivity = measured;
            }
        }
        pitch += step;
        current = next;
        debug!(iteration, centroid = current, error, "walk step");
    }
    bail!(
        "{} did not converge within {} iterations",
        target.imager.name(),
        MAX_WALK_ITERATIONS
    )
}

async fn sample_centroid(
    imager: &Arc<dyn Imager>,
    axis: CentroidAxis,
    knobs: &WalkKnobs,
) -> anyhow::Result<f64> {
    let signal = match axis {
        CentroidAxis::NativeX => imager.centroid_x(),
        CentroidAxis::NativeY => imager.centroid_y(),
    };
    let mut sum = 0.0;
    let mut kept = 0u32;
    for _ in 0..knobs.averages.max(1) {
        let value = signal.get();
        if knobs.min_beam.map_or(true, |floor| value.abs() >= floor) {
            sum += value;
            kept += 1;
        }
        sleep(SAMPLE_PERIOD).await;
    }
    ensure!(kept > 0, "no usable beam on {}", imager.name());
    Ok(sum / f64::from(kept))
}

async fn wait_settled(mirror: &Arc<dyn Mirror>) -> anyhow::Result<()> {
    for _ in 0..1000 {
        if mirror.move_done().get() >= 1.0 {
            return Ok(());
        }
        sleep(SETTLE_POLL).await;
    }
    bail!("mirror {} did not settle", mirror.name())
}

// =============================================================================
// SlitCheckPlan
// =============================================================================

/// One slit/imager pair to fiducialize.
pub struct SlitCheckTarget {
    /// Imager downstream of the slits.
    pub imager: Arc<dyn Imager>,
    /// The slits to scan.
    pub slits: Arc<dyn Slits>,
    /// Native centroid channel observed.
    pub axis: CentroidAxis,
    /// Reflection offset to report the result in display coordinates.
    pub reflect: Option<f64>,
}

/// Close each slit pair to a fiducialization width and record where the
/// transmitted beam lands. Results land in `results` (display frame) when
/// the plan completes.
pub struct SlitCheckPlan {
    /// Pairs to check.
    pub targets: Vec<SlitCheckTarget>,
    /// Aperture width used during the measurement.
    pub slit_width: f64,
    /// Centroid samples averaged per pair.
    pub samples: u32,
    /// Output slot, filled once on completion.
    pub results: Arc<Mutex<Option<HashMap<String, f64>>>>,
}

#[async_trait]
impl Plan for SlitCheckPlan {
    fn name(&self) -> String {
        "slit fiducialization".to_string()
    }

    async fn execute(&self, ctx: &mut PlanContext) -> anyhow::Result<()> {
        let knobs_averages = self.samples.max(1);
        let mut found = HashMap::new();
        for target in &self.targets {
            ctx.checkpoint().await?;
            target.imager.request_yag(YagState::In);
            let restore = (target.slits.x_width().get(), target.slits.y_width().get());
            target.slits.set_widths(self.slit_width, self.slit_width);

            let signal = match target.axis {
                CentroidAxis::NativeX => target.imager.centroid_x(),
                CentroidAxis::NativeY => target.imager.centroid_y(),
            };
            let mut sum = 0.0;
            for _ in 0..knobs_averages {
                sum += signal.get();
                sleep(SAMPLE_PERIOD).await;
            }
            let native = sum / f64::from(knobs_averages);
            target.slits.set_widths(restore.0, restore.1);

            let display_val = match target.reflect {
                Some(offset) => offset - native,
                None => native,
            };
            info!(
                imager = target.imager.name(),
                slits = target.slits.name(),
                found = display_val,
                "slit scan found goal"
            );
            found.insert(target.imager.name().to_string(), display_val);
        }
        *self.results.lock() = Some(found);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted plan that loops checkpoints until told to finish.
    struct TickingPlan {
        ticks: Arc<AtomicU32>,
        stop_after: u32,
    }

    #[async_trait]
    impl Plan for TickingPlan {
        fn name(&self) -> String {
            "ticking".to_string()
        }

        async fn execute(&self, ctx: &mut PlanContext) -> anyhow::Result<()> {
            loop {
                ctx.checkpoint().await?;
                let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= self.stop_after {
                    return Ok(());
                }
                sleep(Duration::from_millis(2)).await;
            }
        }
    }

    async fn wait_for(engine: &Engine, state: EngineState) {
        let mut rx = engine.subscribe_state();
        timeout(Duration::from_secs(5), async {
            while *rx.borrow() != state {
                rx.changed().await.ok();
            }
        })
        .await
        .ok();
        assert_eq!(engine.state(), state);
    }

    #[tokio::test]
    async fn plan_runs_to_completion() {
        let engine = Engine::new();
        let ticks = Arc::new(AtomicU32::new(0));
        engine
            .run(TickingPlan {
                ticks: ticks.clone(),
                stop_after: 3,
            })
            .unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        wait_for(&engine, EngineState::Idle).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        let report = engine.last_report().unwrap();
        assert!(report.success);
        assert_eq!(report.plan, "ticking");
    }

    #[tokio::test]
    async fn engine_rejects_concurrent_plans() {
        let engine = Engine::new();
        let ticks = Arc::new(AtomicU32::new(0));
        engine
            .run(TickingPlan {
                ticks: ticks.clone(),
                stop_after: u32::MAX,
            })
            .unwrap();
        let second = engine.run(TickingPlan {
            ticks: ticks.clone(),
            stop_after: 1,
        });
        assert!(matches!(second, Err(AlignError::EngineBusy(_))));
        engine.abort();
        wait_for(&engine, EngineState::Idle).await;
    }

    #[tokio::test]
    async fn pause_resume_abort_cycle() {
        let engine = Engine::new();
        let ticks = Arc::new(AtomicU32::new(0));
        engine
            .run(TickingPlan {
                ticks: ticks.clone(),
                stop_after: u32::MAX,
            })
            .unwrap();

        engine.request_pause();
        wait_for(&engine, EngineState::Paused).await;
        let parked = ticks.load(Ordering::SeqCst);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), parked, "paused plan kept ticking");

        engine.resume().unwrap();
        wait_for(&engine, EngineState::Running).await;

        engine.abort();
        wait_for(&engine, EngineState::Idle).await;
        let report = engine.last_report().unwrap();
        assert!(!report.success);
        assert!(report.detail.contains("aborted"));
    }

    #[test]
    fn resume_requires_paused_state() {
        let engine = Engine::new();
        assert!(matches!(engine.resume(), Err(AlignError::Engine(_))));
    }

    #[test]
    fn checkpoint_passes_through_while_continuing() {
        tokio_test::block_on(async {
            let engine = Engine::new();
            let mut ctx = PlanContext {
                commands: engine.command_tx.subscribe(),
                state: engine.state_tx.clone(),
            };
            ctx.checkpoint().await.unwrap();
            assert_eq!(engine.state(), EngineState::Idle);
        });
    }
}
