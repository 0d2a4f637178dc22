//! Run configuration, stored as a [ron] file. Every section has defaults,
//! so a config file only needs to name the values it changes, e.g.
//!
//! ```text
//! (
//!     server: (host: "192.168.12.171", num_clients: 3),
//!     arrays: (baselines: [0.055, 0.063, 0.055]),
//! )
//! ```

use serde::{Deserialize, Serialize};
use std::{
    f64::consts::PI,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::CalError;

/// Top level configuration for both the collector and the solver.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Acquisition server settings
    pub server: ServerConfig,
    /// Fixed array geometry
    pub arrays: ArrayConfig,
    /// Local (simplex) solver knobs
    pub local: LocalSolverConfig,
    /// Global (population) solver knobs
    pub global: GlobalSolverConfig,
    /// Local fits worse than this RMS angular error are re-solved globally
    pub rms_threshold_deg: f64,
    /// Where point files and pose files are read and written
    pub data_dir: PathBuf,
}

/// Settings for the acquisition phase.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on
    pub host: String,
    /// TCP port to listen on
    pub port: u16,
    /// Exact number of array clients to wait for
    pub num_clients: usize,
    /// How long a single socket read may block
    pub poll_timeout_secs: f64,
    /// A session with no data for this long is considered timed out
    pub idle_timeout_secs: f64,
    /// Seconds counted down before each recording window opens
    pub countdown_secs: u32,
    /// Window length offered when the operator just presses enter
    pub default_duration_secs: f64,
    /// Ask before each extra point once this many points are recorded
    pub min_points: usize,
}

/// Geometry shared by every array.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Microphone spacing of each array, indexed by array
    pub baselines: Vec<f64>,
    /// In m/s
    pub speed_of_sound: f64,
}

/// Settings for the Nelder-Mead pass.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalSolverConfig {
    pub max_iterations: usize,
    /// Convergence tolerance on the simplex vertices
    pub xatol: f64,
    /// Convergence tolerance on the objective values at the vertices
    pub fatol: f64,
    /// Starting pose `[x, y, theta]`
    pub initial_guess: [f64; 3],
}

/// Settings for the differential evolution fallback.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalSolverConfig {
    /// `(low, high)` for x, y and theta
    pub bounds: Vec<(f64, f64)>,
    pub seed: u64,
    /// Population size is this times the number of parameters
    pub popsize: usize,
    pub max_generations: usize,
    /// Relative convergence tolerance on the population's objective spread
    pub tol: f64,
    /// Absolute convergence tolerance on the population's objective spread
    pub atol: f64,
    /// Differential weight is drawn from this range once per generation
    pub mutation: (f64, f64),
    pub recombination: f64,
    /// Refine the best member with the local solver afterwards
    pub polish: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            arrays: ArrayConfig::default(),
            local: LocalSolverConfig::default(),
            global: GlobalSolverConfig::default(),
            rms_threshold_deg: 10.0,
            data_dir: PathBuf::from("."),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 6060,
            num_clients: 3,
            poll_timeout_secs: 5.0,
            idle_timeout_secs: 10.0,
            countdown_secs: 3,
            default_duration_secs: 2.0,
            min_points: 3,
        }
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            baselines: vec![0.055, 0.063, 0.055],
            speed_of_sound: 343.0,
        }
    }
}

impl Default for LocalSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            xatol: 1e-8,
            fatol: 1e-8,
            initial_guess: [0.0, 0.0, 0.0],
        }
    }
}

impl Default for GlobalSolverConfig {
    fn default() -> Self {
        Self {
            bounds: vec![(-5.0, 5.0), (-5.0, 5.0), (-PI, PI)],
            seed: 42,
            popsize: 15,
            max_generations: 1000,
            tol: 1e-6,
            atol: 1e-6,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            polish: true,
        }
    }
}

impl ServerConfig {
    /// The `host:port` string to listen on.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.poll_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout_secs)
    }
}

impl ArrayConfig {
    /// Baseline of array `array`, if one is configured.
    pub fn baseline(&self, array: usize) -> Result<f64, CalError> {
        self.baselines
            .get(array)
            .copied()
            .ok_or(CalError::MissingBaseline(array))
    }

    /// Number of arrays the configuration describes.
    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    /// True when no baselines are configured.
    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }
}

impl CalibrationConfig {
    /// Read a config from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CalError> {
        let mut handle = File::open(path)?;
        Self::from_file(&mut handle)
    }

    /// Read a config from the [Read]able object provided.
    pub fn from_file(file: &mut impl Read) -> Result<Self, CalError> {
        let mut raw_text = Vec::new();
        file.read_to_end(&mut raw_text)?;
        Ok(ron::de::from_bytes::<CalibrationConfig>(&raw_text)?)
    }

    /// Write out this config to the path provided.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), CalError> {
        let mut handle = File::create(path)?;
        self.to_file(&mut handle)
    }

    /// Write out this config to the [Write]able object provided.
    pub fn to_file(&self, file: &mut impl Write) -> Result<(), CalError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}
