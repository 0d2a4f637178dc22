//! `arraycal` calibrates the pose of a set of two-element microphone
//! sub-arrays. Each array reports, over TCP, the time delay between its two
//! microphones while a sound source sits at a known position. After enough
//! source positions have been recorded, each array's position and orientation
//! is fitted so that the angle of arrival implied by its delays matches the
//! bearing from the array to each source.
//!
//! The work happens in two phases that never overlap:
//!
//! - **Acquisition**: the [session::SessionRegistry] accepts one connection
//!   per array and hands each to an [ingest::IngestWorker]. The
//!   [coordinator::RecordingCoordinator] opens a [gate::RecordingGate] for
//!   one window per source position, the workers fill the
//!   [record_store::RecordStore], and the [reducer::PointReducer] turns each
//!   window into one point file per array.
//! - **Estimation**: the [estimator::PoseEstimator] loads those point files,
//!   converts delays to angles with the [geometry] model, and minimises the
//!   [objective::PoseObjective] with a local [solver::NelderMead] pass,
//!   falling back to a seeded [solver::DifferentialEvolution] when the fit
//!   is poor.

#![warn(missing_docs)]
pub mod args;
pub mod calibration_files;
pub mod config;
pub mod coordinator;
pub mod dummy_client;
pub mod error;
pub mod estimator;
pub mod gate;
pub mod geometry;
pub mod ingest;
pub mod interrupt;
pub mod objective;
pub mod record_store;
pub mod reducer;
pub mod session;
pub mod solver;
pub mod wire;

use std::fmt::Display;

/// Angles are carried around as plain `f64`s in radians.
pub type Radian = f64;

/// Identifier of a connected array client, assigned 1..=N in connection order.
pub type ClientId = usize;

/// A position in the global calibration frame, in meters.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Make a new [Point].
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn abs_dist(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// The fitted (or true) pose of one microphone array.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ArrayPose {
    /// Zero-based array index, client `array + 1` on the wire.
    pub array: usize,
    /// Position of the array's center
    pub position: Point,
    /// Orientation of the array's broadside axis in the global frame
    pub theta: Radian,
    /// Distance between the two microphones; configuration, never estimated
    pub baseline: f64,
}

impl ArrayPose {
    /// Pack the estimated parameters as `[x, y, theta]`, the layout the
    /// solvers work with.
    pub fn params(&self) -> [f64; 3] {
        [self.position.x, self.position.y, self.theta]
    }

    /// Build a pose for `array` out of solver parameters `[x, y, theta]`.
    pub fn from_params(array: usize, params: &[f64], baseline: f64) -> Self {
        Self {
            array,
            position: Point::new(params[0], params[1]),
            theta: params[2],
            baseline,
        }
    }
}

impl Display for ArrayPose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "array {} at ({:.4}, {:.4}) facing {:.2}°",
            self.array + 1,
            self.position.x,
            self.position.y,
            self.theta.to_degrees()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_params_round_trip() {
        let pose = ArrayPose {
            array: 2,
            position: Point::new(1.5, -0.25),
            theta: 0.3,
            baseline: 0.055,
        };
        let back = ArrayPose::from_params(2, &pose.params(), 0.055);
        assert_eq!(pose, back);
    }

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.abs_dist(&b) - 5.0).abs() < 1e-12);
    }
}
