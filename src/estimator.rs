//! Fits each array's pose to the calibration points recorded for it.
//!
//! Per array the estimator loads the point files of client `array + 1`,
//! reduces each to its mean delay and converts that to an angle of arrival.
//! The [PoseObjective] over those angles is minimised from the configured
//! initial guess by the local solver. If the RMS angular error of that fit is
//! above the threshold, the global solver gets a go and its answer is used
//! instead. Only a converged fit is written out as a pose file.

use crate::{
    calibration_files::{point_file_name, write_pose, PointFile},
    config::{ArrayConfig, CalibrationConfig},
    error::CalError,
    geometry::angle_of_arrival,
    objective::{Observation, PoseObjective},
    solver::{DifferentialEvolution, Minimum, NelderMead, Solver, SolverError, SolverKind},
    ArrayPose,
};

use log::{error, info, warn};
use std::{fmt::Display, path::PathBuf};

/// The result of one solver run, turned back into a pose.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    pub pose: ArrayPose,
    /// Sum of squared angular residuals at `pose`
    pub objective: f64,
    pub converged: bool,
    pub solver: SolverKind,
}

impl OptimizationOutcome {
    fn from_minimum(array: usize, baseline: f64, min: &Minimum) -> Self {
        Self {
            pose: ArrayPose::from_params(array, &min.params, baseline),
            objective: min.value,
            converged: min.converged,
            solver: min.kind,
        }
    }
}

/// Everything worth reporting about one successfully calibrated array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayCalibration {
    pub observations: Vec<Observation>,
    /// The local pass, kept even when the global solver replaced it
    pub local: OptimizationOutcome,
    /// The fit that was written out
    pub outcome: OptimizationOutcome,
    /// RMS angular error of `outcome`, in radians
    pub rms_rad: f64,
    pub pose_file: PathBuf,
}

impl ArrayCalibration {
    /// The fitted pose.
    pub fn pose(&self) -> &ArrayPose {
        &self.outcome.pose
    }

    /// Whether the global solver was needed.
    pub fn escalated(&self) -> bool {
        self.outcome.solver == SolverKind::Global
    }
}

impl Display for ArrayCalibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pose = self.pose();
        let sources: Vec<String> = self.observations.iter().map(|o| o.source.to_string()).collect();
        let angles: Vec<String> = self
            .observations
            .iter()
            .map(|o| format!("{:.2}", o.measured.to_degrees()))
            .collect();

        writeln!(f, "Calibrating array {}", pose.array + 1)?;
        writeln!(f, "Number of calibration points: {}", self.observations.len())?;
        writeln!(f, "Source positions: [{}]", sources.join(", "))?;
        writeln!(f, "Measured angles (deg): [{}]", angles.join(", "))?;
        writeln!(f, "Optimization successful ({} solver)", self.outcome.solver)?;
        writeln!(
            f,
            "Array position: ({:.4}, {:.4})",
            pose.position.x, pose.position.y
        )?;
        writeln!(f, "Array orientation: {:.2}°", pose.theta.to_degrees())?;
        writeln!(
            f,
            "Final error (sum of squared angle errors): {:.6}",
            self.outcome.objective
        )?;
        writeln!(
            f,
            "RMS angle error: {:.4} rad ({:.2}°)",
            self.rms_rad,
            self.rms_rad.to_degrees()
        )?;
        write!(f, "Pose written to {}", self.pose_file.display())
    }
}

/// Fits array poses with a local solver `L`, escalating to a global solver
/// `G` for poor fits.
pub struct PoseEstimator<L: Solver = NelderMead, G: Solver = DifferentialEvolution> {
    local: L,
    global: G,
    arrays: ArrayConfig,
    initial_guess: [f64; 3],
    rms_threshold_deg: f64,
    data_dir: PathBuf,
}

impl PoseEstimator {
    /// The estimator described by `config`: Nelder-Mead, then seeded
    /// differential evolution.
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::with_solvers(
            NelderMead::from(&config.local),
            DifferentialEvolution::from(&config.global),
            config,
        )
    }
}

impl<L: Solver, G: Solver> PoseEstimator<L, G> {
    /// Use the given solvers, everything else comes from `config`.
    pub fn with_solvers(local: L, global: G, config: &CalibrationConfig) -> Self {
        Self {
            local,
            global,
            arrays: config.arrays.clone(),
            initial_guess: config.local.initial_guess,
            rms_threshold_deg: config.rms_threshold_deg,
            data_dir: config.data_dir.clone(),
        }
    }

    /// Number of arrays with a configured baseline.
    pub fn num_arrays(&self) -> usize {
        self.arrays.len()
    }

    /// Load the first `points` point files of `array` as observations.
    pub fn load_observations(&self, array: usize, points: usize) -> Result<Vec<Observation>, CalError> {
        let baseline = self.arrays.baseline(array)?;
        (0..points)
            .map(|point| {
                let path = self.data_dir.join(point_file_name(array + 1, point));
                let data = PointFile::from_path(&path)?;
                let delay = data.mean_delay().ok_or_else(|| CalError::MalformedPointFile {
                    path,
                    reason: "no delay rows".to_owned(),
                })?;
                Ok(Observation {
                    source: data.source,
                    measured: angle_of_arrival(delay, baseline, self.arrays.speed_of_sound),
                })
            })
            .collect()
    }

    /// Fit the pose of `array` from its first `points` calibration points and
    /// write its pose file.
    pub fn calibrate_array(&self, array: usize, points: usize) -> Result<ArrayCalibration, CalError> {
        if points == 0 {
            return Err(CalError::NoCalibrationPoints(array));
        }
        let baseline = self.arrays.baseline(array)?;
        let observations = self.load_observations(array, points)?;
        let objective = PoseObjective::new(observations);
        let f = |params: &[f64]| objective.evaluate(params);
        let failure = |source: SolverError| CalError::SolverFailure { array, source };

        let local_min = self
            .local
            .minimize(&f, &self.initial_guess)
            .map_err(failure)?;
        let local_rms = objective.rms_deg(local_min.value).unwrap_or(f64::INFINITY);
        info!(
            "array {}: {} pass J={:.6e}, RMS {:.2}° after {} iterations",
            array + 1,
            self.local.kind(),
            local_min.value,
            local_rms,
            local_min.iterations
        );

        let best = if local_rms > self.rms_threshold_deg {
            warn!(
                "array {}: RMS {:.2}° is above {:.2}°, trying the {} solver",
                array + 1,
                local_rms,
                self.rms_threshold_deg,
                self.global.kind()
            );
            self.global
                .minimize(&f, &local_min.params)
                .map_err(failure)?
        } else {
            local_min.clone()
        };

        if !best.converged {
            return Err(failure(SolverError::DidNotConverge {
                iterations: best.iterations,
                residual: best.value,
            }));
        }

        let local = OptimizationOutcome::from_minimum(array, baseline, &local_min);
        let outcome = OptimizationOutcome::from_minimum(array, baseline, &best);
        let rms_rad = (outcome.objective / objective.len() as f64).sqrt();
        let pose_file = write_pose(&self.data_dir, &outcome.pose)?;
        info!("{} written to {}", outcome.pose, pose_file.display());

        Ok(ArrayCalibration {
            observations: objective.observations().to_vec(),
            local,
            outcome,
            rms_rad,
            pose_file,
        })
    }

    /// Calibrate every array, `points[m]` being the number of points for
    /// array `m`. Arrays that fail for a recoverable reason are logged and
    /// skipped, a fatal error ends the whole run.
    pub fn calibrate_all(&self, points: &[usize]) -> Result<Vec<ArrayCalibration>, CalError> {
        let mut calibrated = Vec::with_capacity(points.len());
        for (array, &count) in points.iter().enumerate() {
            match self.calibrate_array(array, count) {
                Ok(calibration) => calibrated.push(calibration),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!("{}", e),
            }
        }
        Ok(calibrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calibration_files::{pose_file_name, read_pose},
        geometry::{delay_for_angle, expected_angle, SPEED_OF_SOUND},
        Point,
    };
    use std::{cell::Cell, path::Path};

    const BASELINE: f64 = 0.063;

    fn sources() -> Vec<Point> {
        vec![
            Point::new(3.0, 0.0),
            Point::new(3.0, 2.0),
            Point::new(3.0, -2.0),
            Point::new(2.0, 3.0),
            Point::new(4.0, 1.0),
            Point::new(2.0, -3.0),
        ]
    }

    /// Write noiseless point files for an array at `position` facing `theta`.
    fn synthesize(dir: &Path, array: usize, position: Point, theta: f64) -> usize {
        let sources = sources();
        for (point, &source) in sources.iter().enumerate() {
            let angle = expected_angle(position, theta, source);
            let delay = delay_for_angle(angle, BASELINE, SPEED_OF_SOUND);
            PointFile::new(source, vec![delay, delay])
                .to_path(dir.join(point_file_name(array + 1, point)))
                .unwrap();
        }
        sources.len()
    }

    fn config(dir: &Path) -> CalibrationConfig {
        let mut config = CalibrationConfig::default();
        config.arrays.baselines = vec![BASELINE; 3];
        config.arrays.speed_of_sound = SPEED_OF_SOUND;
        config.data_dir = dir.to_owned();
        config
    }

    /// Reports the starting point as the answer.
    struct StayPut;

    impl Solver for StayPut {
        fn kind(&self) -> SolverKind {
            SolverKind::Local
        }

        fn minimize(
            &self,
            objective: &dyn Fn(&[f64]) -> f64,
            initial: &[f64],
        ) -> Result<Minimum, SolverError> {
            Ok(Minimum {
                params: initial.to_vec(),
                value: objective(initial),
                converged: true,
                iterations: 1,
                evaluations: 1,
                kind: SolverKind::Local,
            })
        }
    }

    struct Counting<S> {
        inner: S,
        calls: Cell<usize>,
    }

    impl<S> Counting<S> {
        fn new(inner: S) -> Self {
            Self {
                inner,
                calls: Cell::new(0),
            }
        }
    }

    impl<S: Solver> Solver for Counting<S> {
        fn kind(&self) -> SolverKind {
            self.inner.kind()
        }

        fn minimize(
            &self,
            objective: &dyn Fn(&[f64]) -> f64,
            initial: &[f64],
        ) -> Result<Minimum, SolverError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.minimize(objective, initial)
        }
    }

    /// Never meets its convergence criteria.
    struct GivesUp;

    impl Solver for GivesUp {
        fn kind(&self) -> SolverKind {
            SolverKind::Global
        }

        fn minimize(
            &self,
            objective: &dyn Fn(&[f64]) -> f64,
            initial: &[f64],
        ) -> Result<Minimum, SolverError> {
            Ok(Minimum {
                params: initial.to_vec(),
                value: objective(initial),
                converged: false,
                iterations: 1000,
                evaluations: 45000,
                kind: SolverKind::Global,
            })
        }
    }

    #[test]
    fn recovers_noiseless_pose() {
        let dir = tempfile::tempdir().unwrap();
        let truth = Point::new(0.5, -0.3);
        let points = synthesize(dir.path(), 0, truth, 0.2);

        let estimator = PoseEstimator::from_config(&config(dir.path()));
        let result = estimator.calibrate_array(0, points).unwrap();

        assert!(result.outcome.converged);
        assert!(result.outcome.objective < 1e-10, "{:?}", result.outcome);
        assert!(result.pose().position.abs_dist(&truth) < 1e-3);
        assert!((result.pose().theta - 0.2).abs() < 1e-3);
        assert_eq!(result.pose().baseline, BASELINE);

        let written = read_pose(dir.path(), 0).unwrap();
        assert!(written.position.abs_dist(&truth) < 1e-3);
        assert!(result.to_string().contains("Number of calibration points: 6"));
    }

    #[test]
    fn poor_local_fit_escalates_deterministically() {
        // from the zero guess every residual is 15°
        let run = || {
            let dir = tempfile::tempdir().unwrap();
            let points = synthesize(dir.path(), 0, Point::new(0.0, 0.0), 15f64.to_radians());
            let global = Counting::new(DifferentialEvolution::default());
            let estimator = PoseEstimator::with_solvers(StayPut, global, &config(dir.path()));
            let result = estimator.calibrate_array(0, points).unwrap();
            let local_rms = (result.local.objective / points as f64).sqrt().to_degrees();
            assert!((local_rms - 15.0).abs() < 1e-9);
            assert_eq!(estimator.global.calls.get(), 1);
            result
        };
        let a = run();
        let b = run();

        assert!(a.escalated());
        assert_eq!(a.outcome.solver, SolverKind::Global);
        assert_eq!(a.outcome, b.outcome);
        assert!((a.pose().theta - 15f64.to_radians()).abs() < 1e-3);
    }

    #[test]
    fn good_local_fit_does_not_escalate() {
        let dir = tempfile::tempdir().unwrap();
        let points = synthesize(dir.path(), 1, Point::new(0.0, 0.0), 4f64.to_radians());
        let global = Counting::new(DifferentialEvolution::default());
        let estimator = PoseEstimator::with_solvers(StayPut, global, &config(dir.path()));

        let result = estimator.calibrate_array(1, points).unwrap();
        assert_eq!(estimator.global.calls.get(), 0);
        assert!(!result.escalated());
        assert!((result.rms_rad.to_degrees() - 4.0).abs() < 1e-9);
        assert!(dir.path().join(pose_file_name(1)).exists());
    }

    #[test]
    fn no_points_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = PoseEstimator::from_config(&config(dir.path()));
        let err = estimator.calibrate_array(0, 0).unwrap_err();
        assert!(matches!(err, CalError::NoCalibrationPoints(0)));
        assert!(err.is_fatal());
        assert!(estimator.calibrate_all(&[0, 0, 0]).is_err());
    }

    #[test]
    fn failed_solve_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let points = synthesize(dir.path(), 0, Point::new(0.0, 0.0), 15f64.to_radians());
        let estimator = PoseEstimator::with_solvers(StayPut, GivesUp, &config(dir.path()));

        let err = estimator.calibrate_array(0, points).unwrap_err();
        assert!(matches!(
            err,
            CalError::SolverFailure {
                array: 0,
                source: SolverError::DidNotConverge { .. }
            }
        ));
        assert!(!dir.path().join(pose_file_name(0)).exists());
    }

    #[test]
    fn one_bad_array_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let points = synthesize(dir.path(), 1, Point::new(0.5, -0.3), 0.2);
        // array 0 has a point file with a header but no delays
        std::fs::write(dir.path().join(point_file_name(1, 0)), "1,0\n").unwrap();

        let estimator = PoseEstimator::from_config(&config(dir.path()));
        let calibrated = estimator.calibrate_all(&[1, points]).unwrap();
        assert_eq!(calibrated.len(), 1);
        assert_eq!(calibrated[0].pose().array, 1);
        assert!(!dir.path().join(pose_file_name(0)).exists());
    }

    #[test]
    fn short_global_bounds_fail_the_array() {
        let dir = tempfile::tempdir().unwrap();
        let points = synthesize(dir.path(), 0, Point::new(0.0, 0.0), 15f64.to_radians());
        let mut config = config(dir.path());
        config.global.bounds = vec![(-5.0, 5.0), (-5.0, 5.0)];
        // a single iteration leaves the local pass at the 15° start
        config.local.max_iterations = 1;

        let estimator = PoseEstimator::from_config(&config);
        let err = estimator.calibrate_array(0, points).unwrap_err();
        assert!(matches!(
            err,
            CalError::SolverFailure {
                array: 0,
                source: SolverError::DimensionMismatch { expected: 3, got: 2 }
            }
        ));
        assert!(!err.is_fatal());
        assert!(!dir.path().join(pose_file_name(0)).exists());
    }

    #[test]
    fn missing_point_file_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = PoseEstimator::from_config(&config(dir.path()));
        let err = estimator.calibrate_array(2, 3).unwrap_err();
        assert!(matches!(err, CalError::IoError(_)));
        assert!(!err.is_fatal());
    }
}
