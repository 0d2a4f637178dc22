//! The least-squares objective an array's pose is fitted against.

use crate::{
    geometry::{angle_difference, expected_angle},
    Point, Radian,
};

/// One calibration point as seen by one array: where the source was, and
/// the angle the array measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub source: Point,
    pub measured: Radian,
}

/// Sum of squared angular residuals over every observation of one array.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseObjective {
    observations: Vec<Observation>,
}

impl PoseObjective {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Number of calibration points.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Wrapped residual of every observation for the pose `[x, y, theta]`.
    pub fn residuals(&self, params: &[f64]) -> Vec<Radian> {
        let position = Point::new(params[0], params[1]);
        let theta = params[2];
        self.observations
            .iter()
            .map(|obs| angle_difference(obs.measured, expected_angle(position, theta, obs.source)))
            .collect()
    }

    /// `J(pose)`, the quantity the solvers minimise.
    pub fn evaluate(&self, params: &[f64]) -> f64 {
        self.residuals(params).iter().map(|r| r * r).sum()
    }

    /// RMS angular error in degrees for an objective value `j`. `None` when
    /// there are no observations to average over.
    pub fn rms_deg(&self, j: f64) -> Option<f64> {
        if self.observations.is_empty() {
            return None;
        }
        Some((j / self.observations.len() as f64).sqrt().to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn observations_for(position: Point, theta: f64, sources: &[Point]) -> Vec<Observation> {
        sources
            .iter()
            .map(|&source| Observation {
                source,
                measured: expected_angle(position, theta, source),
            })
            .collect()
    }

    #[test]
    fn zero_at_true_pose() {
        let sources = [Point::new(1.0, 0.0), Point::new(2.0, 1.0), Point::new(1.0, -2.0)];
        let objective = PoseObjective::new(observations_for(Point::new(0.2, 0.1), 0.3, &sources));
        assert!(objective.evaluate(&[0.2, 0.1, 0.3]) < 1e-24);
        // a full turn of orientation is the same pose
        assert!(objective.evaluate(&[0.2, 0.1, 0.3 + 2.0 * PI]) < 1e-20);
        assert!(objective.evaluate(&[0.0, 0.0, 0.0]) > 1e-3);
    }

    #[test]
    fn rms_of_uniform_error() {
        let objective = PoseObjective::new(vec![
            Observation {
                source: Point::new(1.0, 0.0),
                measured: 4f64.to_radians(),
            },
            Observation {
                source: Point::new(0.0, 1.0),
                measured: PI / 2.0 - 4f64.to_radians(),
            },
        ]);
        let j = objective.evaluate(&[0.0, 0.0, 0.0]);
        assert!((objective.rms_deg(j).unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn empty_objective_has_no_rms() {
        let objective = PoseObjective::new(vec![]);
        assert!(objective.is_empty());
        assert_eq!(objective.rms_deg(0.0), None);
    }
}
