//! Fake array clients for bench testing the collector without hardware.
//!
//! Each simulated array connects to the collector and streams the delay it
//! would measure for the current source position. Type `x y` to move the
//! source, `noise <seconds>` to change the jitter, `q` to stop.

use arraycal::{config::CalibrationConfig, dummy_client::DummyClient, ArrayPose, Point};

use clap::Parser;
use log::{error, info, warn};
use std::{
    f64::consts::FRAC_PI_2,
    io::{self, BufRead},
    path::PathBuf,
    process,
    time::Duration,
};

// Example:
// cargo run --bin simulator -- --pose 0,0,0 --pose 2,0,1.57 --noise 1e-6

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
struct SimArgs {
    /// RON config file to read the collector address and array baselines from
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Collector address, overrides the config's host and port
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Pose of one simulated array as x,y,theta; repeat once per array
    #[arg(long = "pose", value_parser = parse_pose, allow_hyphen_values = true)]
    poses: Vec<[f64; 3]>,

    /// Initial source position as x,y
    #[arg(short = 's', long = "source", value_parser = parse_point, default_value = "1,0")]
    source: Point,

    /// Uniform delay jitter, in seconds
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Milliseconds between records
    #[arg(long, default_value_t = 20)]
    period_ms: u64,
}

fn parse_numbers(s: &str, count: usize) -> Result<Vec<f64>, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("{:?}: {}", v, e)))
        .collect::<Result<Vec<f64>, String>>()?;
    if values.len() != count {
        return Err(format!("expected {} comma separated numbers, got {}", count, values.len()));
    }
    Ok(values)
}

fn parse_pose(s: &str) -> Result<[f64; 3], String> {
    let v = parse_numbers(s, 3)?;
    Ok([v[0], v[1], v[2]])
}

fn parse_point(s: &str) -> Result<Point, String> {
    let v = parse_numbers(s, 2)?;
    Ok(Point::new(v[0], v[1]))
}

/// Arrays along the x axis, all facing +y, for when no poses are given.
fn default_poses(count: usize) -> Vec<[f64; 3]> {
    (0..count).map(|i| [i as f64, 0.0, FRAC_PI_2]).collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = SimArgs::parse();

    let config = match &args.config {
        Some(path) => match CalibrationConfig::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        },
        None => CalibrationConfig::default(),
    };
    let addr = args.addr.clone().unwrap_or_else(|| {
        // the collector listens on all interfaces by default
        format!("127.0.0.1:{}", config.server.port)
    });
    let poses = if args.poses.is_empty() {
        default_poses(config.server.num_clients)
    } else {
        args.poses.clone()
    };

    let mut clients = Vec::with_capacity(poses.len());
    for (array, params) in poses.iter().enumerate() {
        let baseline = match config.arrays.baseline(array) {
            Ok(baseline) => baseline,
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        };
        let pose = ArrayPose::from_params(array, params, baseline);
        match DummyClient::connect(
            addr.as_str(),
            pose,
            config.arrays.speed_of_sound,
            args.source,
            Duration::from_millis(args.period_ms),
        ) {
            Ok(client) => {
                info!("Simulating {}", pose);
                client.set_noise(args.noise);
                clients.push(client);
            }
            Err(e) => {
                error!("could not connect array {} to {}: {}", array + 1, addr, e);
                process::exit(1);
            }
        }
    }

    println!("Source at {}. Enter 'x y' to move it, 'noise <s>' or 'q' to quit.", args.source);
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["q"] => break,
            ["noise", value] => match value.parse::<f64>() {
                Ok(noise) => clients.iter().for_each(|c| c.set_noise(noise)),
                Err(e) => warn!("bad noise {:?}: {}", value, e),
            },
            [x, y] => match (x.parse::<f64>(), y.parse::<f64>()) {
                (Ok(x), Ok(y)) => {
                    let source = Point::new(x, y);
                    clients.iter().for_each(|c| c.set_source(source));
                    println!("Source moved to {}", source);
                }
                _ => warn!("expected two numbers, got {:?}", line),
            },
            _ => warn!("unrecognized command {:?}", line),
        }
    }

    for client in clients.iter_mut() {
        client.stop();
    }
}
