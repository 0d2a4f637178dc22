//! The operator's entry point: collect calibration points from the arrays,
//! then solve for each array's pose.

use arraycal::{
    args::{CalArgs, CommandTask},
    calibration_files::count_points,
    config::CalibrationConfig,
    coordinator::{PointOutcome, RecordingCoordinator},
    error::CalError,
    estimator::PoseEstimator,
    interrupt::{Input, Interrupt, InterruptibleLines},
    reducer::PointReducer,
    session::{IngestTimeouts, SessionRegistry},
    Point,
};

use clap::Parser;
use log::{error, info, warn};
use std::{
    fs,
    io::{self, Write},
    process,
    time::Duration,
};

// Example:
// cargo run --bin arraycal -- --data-dir run1 collect --clients 3
// cargo run --bin arraycal -- --data-dir run1 solve --guess 0 0 0

const QUIT: &str = "q";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CalArgs::parse();

    if let Err(e) = run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(args: &CalArgs) -> Result<(), CalError> {
    let mut config = match &args.config {
        Some(path) => CalibrationConfig::from_path(path)?,
        None => CalibrationConfig::default(),
    };
    args.apply(&mut config);

    match &args.command {
        CommandTask::Collect(_) => collect(&config),
        CommandTask::Solve(solve_args) => solve(&config, solve_args.points),
        CommandTask::Config(config_args) => {
            config.to_path(&config_args.outfile)?;
            info!("Default configuration written to {}", config_args.outfile.display());
            Ok(())
        }
    }
}

/// Print `question` and read one trimmed line. `None` on end of input or
/// Ctrl-C.
fn prompt(input: &InterruptibleLines, question: &str) -> Option<String> {
    print!("{}", question);
    let _ = io::stdout().flush();
    match input.next_line() {
        Input::Line(line) => Some(line),
        Input::Closed => None,
        Input::Interrupted => {
            println!();
            None
        }
    }
}

fn confirm(input: &InterruptibleLines, question: &str) -> bool {
    prompt(input, question)
        .map(|answer| answer.eq_ignore_ascii_case("y"))
        .unwrap_or(false)
}

/// Ask for one source coordinate until we get a number. `None` means quit.
fn prompt_coordinate(input: &InterruptibleLines, axis: &str) -> Option<f64> {
    loop {
        let question = format!("Source {} position (or '{}' to quit): ", axis, QUIT);
        let answer = prompt(input, &question)?;
        if answer.eq_ignore_ascii_case(QUIT) {
            return None;
        }
        match answer.parse::<f64>() {
            Ok(value) => return Some(value),
            Err(_) => println!("Invalid number, try again."),
        }
    }
}

/// Ask for the window length, falling back to `default`. `None` means quit.
fn prompt_duration(input: &InterruptibleLines, default: f64) -> Option<Duration> {
    let answer = prompt(input, &format!("Recording duration in seconds [{}]: ", default))?;
    if answer.is_empty() {
        return Some(Duration::from_secs_f64(default));
    }
    match answer.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            warn!("Invalid duration {:?}, using {}s", answer, default);
            Some(Duration::from_secs_f64(default))
        }
    }
}

fn collect(config: &CalibrationConfig) -> Result<(), CalError> {
    let server = &config.server;
    fs::create_dir_all(&config.data_dir)?;

    let timeouts = IngestTimeouts {
        poll: server.poll_timeout(),
        idle: server.idle_timeout(),
    };
    let mut registry = SessionRegistry::bind(server.addr(), timeouts)?;
    let reducer = PointReducer::new(&config.data_dir, server.num_clients);

    // Ctrl-C while waiting for clients just exits
    let coordinator =
        RecordingCoordinator::new(reducer, server.countdown_secs, Interrupt::detached());
    registry.accept_sessions(server.num_clients, coordinator.store(), &coordinator.gate_reader())?;
    let interrupt = Interrupt::sigint();
    let mut coordinator = coordinator.with_interrupt(interrupt);
    let input = InterruptibleLines::stdin(interrupt)?;

    println!("Press Ctrl-C to stop early, twice to exit immediately.");

    loop {
        if coordinator.interrupted() {
            break;
        }

        if !registry.all_connected() {
            for (id, state) in registry.dropped_sessions() {
                warn!(
                    "[Client {}] {}, last data {:.1}s ago",
                    id,
                    state.status,
                    state.last_activity.elapsed().as_secs_f64()
                );
            }
            if !confirm(&input, "Some clients are disconnected. Continue anyway? (y/n): ") {
                break;
            }
        }

        println!();
        println!("=== Calibration point {} ===", coordinator.points_recorded() + 1);
        let Some(x) = prompt_coordinate(&input, "X") else { break };
        let Some(y) = prompt_coordinate(&input, "Y") else { break };
        let Some(duration) = prompt_duration(&input, server.default_duration_secs) else {
            break;
        };

        let source = Point::new(x, y);
        match coordinator.run_point(source, duration) {
            PointOutcome::Interrupted => break,
            PointOutcome::Discarded(_) => {
                println!("Point not counted, not every client's data was saved. Record it again.");
                continue;
            }
            PointOutcome::Counted(_) => {
                println!("Point {} at {} recorded.", coordinator.points_recorded(), source);
            }
        }

        if coordinator.points_recorded() >= server.min_points
            && !confirm(&input, "Record another point? (y/n): ")
        {
            break;
        }
    }

    println!();
    println!("{}", coordinator.summary());

    for (id, status) in registry.shutdown() {
        info!("[Client {}] {}", id, status);
    }
    Ok(())
}

fn solve(config: &CalibrationConfig, points: Option<usize>) -> Result<(), CalError> {
    let estimator = PoseEstimator::from_config(config);
    let num_arrays = estimator.num_arrays();

    let counts: Vec<usize> = match points {
        Some(p) => vec![p; num_arrays],
        None => (0..num_arrays)
            .map(|array| count_points(&config.data_dir, array + 1))
            .collect(),
    };
    info!("Calibration points per array: {:?}", counts);

    let calibrations = estimator.calibrate_all(&counts)?;
    for calibration in &calibrations {
        println!();
        println!("{}", calibration);
    }

    println!();
    println!(
        "==== Calibration complete: {} of {} arrays calibrated ====",
        calibrations.len(),
        num_arrays
    );
    for calibration in &calibrations {
        println!("  {}", calibration.pose());
    }
    Ok(())
}
