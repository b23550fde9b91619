//! End-to-end alignment runs against the simulated beamline.

use std::time::Duration;

use beamwalk::engine::{Engine, EngineState};
use beamwalk::hardware::sim::{sim_system, SimBeamline};
use beamwalk::hardware::{Imager, SignalHub, Slits, Subsystem, YagState};
use beamwalk::screen::{AlignScreen, ScreenCells};
use beamwalk::settings::Settings;
use beamwalk::sink::Sink;

fn fast_settings() -> Settings {
    Settings {
        first_step: 0.01,
        tolerance: 1.0,
        averages: 2,
        timeout: Duration::from_secs(5),
        tol_scaling: 2.0,
        min_beam: Some(0.5),
        slit_width: 0.2,
        samples: 2,
        ..Settings::default()
    }
}

struct Bench {
    screen: AlignScreen,
    cells: ScreenCells,
    system: Vec<(String, Subsystem)>,
    _beamline: SimBeamline,
}

fn bench() -> Bench {
    let hub = SignalHub::new();
    let (system, beamline) = sim_system(&hub, 0.0);
    let cells = ScreenCells::new();
    let screen = AlignScreen::new(
        system.clone(),
        Vec::new(),
        &cells,
        Engine::new(),
        fast_settings(),
        None,
        None,
    )
    .unwrap();
    Bench {
        screen,
        cells,
        system,
        _beamline: beamline,
    }
}

async fn drive_to_idle(bench: &mut Bench) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        bench.screen.poll();
        if bench.screen.engine_state() == EngineState::Idle {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "engine did not return to idle"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    bench.screen.poll();
}

#[tokio::test]
async fn single_station_walk_converges() {
    let mut b = bench();
    b.screen.select_procedure("m1h");
    b.cells.goals[0].edit.set_text("600");
    b.screen.on_goal_edited(0);

    b.screen.start();
    assert_eq!(b.screen.engine_state(), EngineState::Running);
    drive_to_idle(&mut b).await;

    let imager = &b.system[0].1.imager;
    imager.request_yag(YagState::In);
    let reached = imager.centroid_x().get();
    assert!(
        (reached - 600.0).abs() <= 1.0,
        "walk stopped at {reached}, wanted 600±1"
    );
}

#[tokio::test]
async fn full_beamline_walk_hits_every_goal() {
    let mut b = bench();
    b.screen.select_procedure("full beamline");
    for (index, goal) in [(0, "600"), (1, "500"), (2, "450")] {
        b.cells.goals[index].edit.set_text(goal);
        b.screen.on_goal_edited(index);
    }

    b.screen.start();
    drive_to_idle(&mut b).await;

    // Walked in order; check each station with only its own screen in.
    for (index, wanted) in [(0, 600.0), (1, 500.0), (2, 450.0)] {
        for (j, (_, sub)) in b.system.iter().enumerate() {
            sub.imager.request_yag(if j == index {
                YagState::In
            } else {
                YagState::Out
            });
        }
        let reached = b.system[index].1.imager.centroid_x().get();
        assert!(
            (reached - wanted).abs() <= 1.0,
            "station {index} stopped at {reached}, wanted {wanted}±1"
        );
    }

    // The camera followed the run: the last auto-switch left the final
    // station's imager on the image panel.
    assert_eq!(b.screen.current_imager(), Some("sim_mfxdg1"));
}

#[tokio::test]
async fn start_refuses_incomplete_goals() {
    let mut b = bench();
    b.screen.select_procedure("full beamline");
    b.cells.goals[0].edit.set_text("600");
    b.screen.on_goal_edited(0);
    // Rows 1 and 2 left empty.
    b.screen.start();
    assert_eq!(b.screen.engine_state(), EngineState::Idle);
}

#[tokio::test]
async fn pause_and_resume_from_the_screen() {
    let mut b = bench();
    let mut settings = fast_settings();
    settings.averages = 50; // slow the walk down enough to pause it
    b.screen.apply_settings(settings);
    b.screen.select_procedure("full beamline");
    for (index, goal) in [(0, "600"), (1, "500"), (2, "450")] {
        b.cells.goals[index].edit.set_text(goal);
        b.screen.on_goal_edited(index);
    }
    b.screen.start();

    b.screen.pause();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while b.screen.engine_state() == EngineState::Running {
        assert!(tokio::time::Instant::now() < deadline, "pause never landed");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(b.screen.engine_state(), EngineState::Paused);

    // Start doubles as resume from the paused state.
    b.screen.start();
    drive_to_idle(&mut b).await;
}

#[tokio::test]
async fn abort_returns_to_idle() {
    let mut b = bench();
    let mut settings = fast_settings();
    settings.averages = 50;
    b.screen.apply_settings(settings);
    b.screen.select_procedure("m1h");
    b.cells.goals[0].edit.set_text("600");
    b.screen.on_goal_edited(0);
    b.screen.start();

    b.screen.abort();
    drive_to_idle(&mut b).await;
    assert_eq!(b.screen.engine_state(), EngineState::Idle);
}

#[tokio::test]
async fn slit_check_fills_checked_goals() {
    let mut b = bench();
    b.screen.select_procedure("full beamline");
    // Only the first station is checked for fiducialization.
    b.cells.goals[0].check.set_checked(true);
    b.screen.run_slit_check();
    assert_eq!(b.screen.engine_state(), EngineState::Running);
    drive_to_idle(&mut b).await;

    // The hx2 slit fiducial sits at pixel 500.
    assert_eq!(b.cells.goals[0].edit.text(), "500");
    assert_eq!(b.screen.goals().get("sim_hx2"), Some(500.0));
    // Unchecked stations are untouched.
    assert_eq!(b.cells.goals[1].edit.text(), "");

    // The slits were restored after the measurement.
    let slits = b.system[0].1.slits.as_ref().unwrap();
    assert!(slits.x_width().get() > 1.0);
}

#[tokio::test]
async fn slit_check_with_nothing_selected_is_a_no_op() {
    let mut b = bench();
    b.screen.select_procedure("m1h");
    b.screen.run_slit_check();
    assert_eq!(b.screen.engine_state(), EngineState::Idle);
}
