//! The error type shared by the acquisition and estimation phases.

use std::{borrow::Cow, fmt, io, path::PathBuf};

use crate::solver::SolverError;

/// Everything that can go wrong while collecting calibration points or
/// estimating array poses.
///
/// Only the setup failures are fatal, see [CalError::is_fatal]. Everything
/// else is recovered per session or per array by the caller.
#[derive(Debug)]
pub enum CalError {
    /// The listening socket could not be bound.
    Bind {
        /// Address we tried to listen on
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Returned when io fails when reading or writing files or sockets.
    IoError(io::Error),

    /// Returned when reading or writing a point or pose file fails.
    CsvError(csv::Error),

    /// Returned when serialization of the config fails.
    RonError(ron::Error),

    /// Returned when deserialization of the config fails.
    RonSpannedError(ron::de::SpannedError),

    /// A point file exists but does not follow the point file layout.
    MalformedPointFile {
        /// Offending file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// No baseline is configured for the requested array.
    MissingBaseline(usize),

    /// The estimator was asked to fit an array with zero calibration points.
    NoCalibrationPoints(usize),

    /// The solver did not produce a usable pose for an array.
    SolverFailure {
        /// Zero-based array index
        array: usize,
        /// Why the solve failed
        source: SolverError,
    },
}

impl CalError {
    /// Setup failures abort the run; everything else is recovered per
    /// session or per array.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CalError::Bind { .. }
                | CalError::RonError(_)
                | CalError::RonSpannedError(_)
                | CalError::NoCalibrationPoints(_)
        )
    }
}

impl fmt::Display for CalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use CalError as CE;
        let msg = match self {
            CE::Bind { addr, source } => Cow::from(format!("unable to listen on {addr}: {source}")),
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::CsvError(error) => Cow::from(format!("csv error: {}", error)),
            CE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            CE::MalformedPointFile { path, reason } => {
                Cow::from(format!("malformed point file {}: {}", path.display(), reason))
            }
            CE::MissingBaseline(array) => {
                Cow::from(format!("no baseline configured for array {}", array + 1))
            }
            CE::NoCalibrationPoints(array) => Cow::from(format!(
                "no calibration points available for array {}",
                array + 1
            )),
            CE::SolverFailure { array, source } => Cow::from(format!(
                "optimization failed for array {}: {}",
                array + 1,
                source
            )),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for CalError {}

impl From<io::Error> for CalError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<csv::Error> for CalError {
    fn from(value: csv::Error) -> Self {
        Self::CsvError(value)
    }
}

impl From<ron::Error> for CalError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for CalError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failures_are_fatal() {
        let bind = CalError::Bind {
            addr: "0.0.0.0:6060".to_owned(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(bind.is_fatal());
        assert!(CalError::NoCalibrationPoints(0).is_fatal());
    }

    #[test]
    fn per_array_failures_are_recoverable() {
        let err = CalError::SolverFailure {
            array: 1,
            source: SolverError::DidNotConverge {
                iterations: 10,
                residual: 0.5,
            },
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("array 2"));
        assert!(!CalError::MissingBaseline(4).is_fatal());
    }
}
