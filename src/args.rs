// Commandline argument parser using clap for arraycal

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CalibrationConfig;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct CalArgs {
    #[command(subcommand, long_about)]
    /// Which phase to run: collecting calibration points or solving for poses
    pub command: CommandTask,

    /// RON config file; built-in defaults are used when omitted
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory point files and pose files are read from and written to
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Accept the array clients and record calibration points
    #[command(about)]
    Collect(CollectCommand),

    /// Fit every array's pose to the recorded points
    #[command(about)]
    Solve(SolveCommand),

    /// Write the default configuration to a file
    #[command(about)]
    Config(ConfigCommand),
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct CollectCommand {
    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of array clients to wait for
    #[arg(short = 'n', long = "clients")]
    pub num_clients: Option<usize>,
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct SolveCommand {
    /// Number of calibration points per array; counted from the point
    /// files on disk when omitted
    #[arg(short = 'p', long = "points")]
    pub points: Option<usize>,

    /// Initial guess for the local solver, as x y theta
    #[arg(short = 'g', long = "guess", allow_negative_numbers = true)]
    #[clap(num_args = 3)]
    pub initial_guess: Option<Vec<f64>>,
}

#[derive(Debug, Args, Clone)]
#[command(about)]
pub struct ConfigCommand {
    /// Filename for the configuration to be written to
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,
}

impl CalArgs {
    /// Apply the flags given on the command line on top of `config`.
    pub fn apply(&self, config: &mut CalibrationConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        match &self.command {
            CommandTask::Collect(collect) => {
                if let Some(host) = &collect.host {
                    config.server.host = host.clone();
                }
                if let Some(port) = collect.port {
                    config.server.port = port;
                }
                if let Some(n) = collect.num_clients {
                    config.server.num_clients = n;
                }
            }
            CommandTask::Solve(solve) => {
                if let Some([x, y, theta]) = solve.initial_guess.as_deref() {
                    config.local.initial_guess = [*x, *y, *theta];
                }
            }
            CommandTask::Config(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = CalArgs::parse_from([
            "arraycal", "-d", "out", "collect", "--host", "127.0.0.1", "-p", "7000", "-n", "2",
        ]);
        let mut config = CalibrationConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server.addr(), "127.0.0.1:7000");
        assert_eq!(config.server.num_clients, 2);
        assert_eq!(config.data_dir, PathBuf::from("out"));
    }

    #[test]
    fn solve_takes_a_guess() {
        let args = CalArgs::parse_from(["arraycal", "solve", "--points", "4", "--guess", "1", "-2", "0.5"]);
        let mut config = CalibrationConfig::default();
        args.apply(&mut config);
        assert_eq!(config.local.initial_guess, [1.0, -2.0, 0.5]);
        match args.command {
            CommandTask::Solve(solve) => assert_eq!(solve.points, Some(4)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn defaults_are_left_alone() {
        let args = CalArgs::parse_from(["arraycal", "collect"]);
        let mut config = CalibrationConfig::default();
        args.apply(&mut config);
        assert_eq!(config, CalibrationConfig::default());
    }
}
