//! Reading and writing the two CSV files the calibration leaves on disk.
//!
//! - A **point file**, `data_<client>_<point>.csv`, holds what one client
//!   measured during one recording window. The first row is the source
//!   position, every following row one delay:
//!
//!   ```text
//!   x_source,y_source
//!   del_t
//!   del_t
//!   ...
//!   ```
//!
//! - A **pose file**, `sensor<array>.csv`, holds a single row with the fitted
//!   pose and the configured baseline:
//!
//!   ```text
//!   x,y,theta,baseline_distance
//!   ```
//!
//! Both file names use 1-based indices.

use crate::{error::CalError, ArrayPose, ClientId, Point};

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

/// Name of the point file for `client` and the zero-based `point` index.
pub fn point_file_name(client: ClientId, point: usize) -> String {
    format!("data_{}_{}.csv", client, point + 1)
}

/// Name of the pose file for the zero-based `array` index.
pub fn pose_file_name(array: usize) -> String {
    format!("sensor{}.csv", array + 1)
}

/// Count the point files for `client` in `dir`, stopping at the first gap.
pub fn count_points(dir: impl AsRef<Path>, client: ClientId) -> usize {
    let dir = dir.as_ref();
    (0..)
        .take_while(|&point| dir.join(point_file_name(client, point)).is_file())
        .count()
}

fn writer<W: Write>(out: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(out)
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

fn field(record: &StringRecord, index: usize, path: &Path) -> Result<f64, CalError> {
    let raw = record.get(index).ok_or_else(|| CalError::MalformedPointFile {
        path: path.to_owned(),
        reason: format!("row {} has no field {}", record_row(record), index),
    })?;
    raw.parse::<f64>().map_err(|e| CalError::MalformedPointFile {
        path: path.to_owned(),
        reason: format!("row {}: {:?} is not a number ({})", record_row(record), raw, e),
    })
}

fn record_row(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

/// Everything one client measured during one calibration point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFile {
    /// Where the operator placed the source
    pub source: Point,
    /// Every valid delay received during the window, in arrival order
    pub delays: Vec<f64>,
}

impl PointFile {
    /// Make a new [PointFile].
    pub fn new(source: Point, delays: Vec<f64>) -> Self {
        Self { source, delays }
    }

    /// Arithmetic mean of the delays, `None` when there are none.
    pub fn mean_delay(&self) -> Option<f64> {
        if self.delays.is_empty() {
            return None;
        }
        Some(self.delays.iter().sum::<f64>() / self.delays.len() as f64)
    }

    /// Write out a [PointFile] to the path provided.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), CalError> {
        let handle = File::create(path)?;
        self.to_file(handle)
    }

    /// Write out a [PointFile] to the [Write]able object provided.
    ///
    /// The source position is written the way it was entered (`1,0`), the
    /// delays with a guaranteed decimal point (`0.0`, `1.2e-5`).
    pub fn to_file(&self, file: impl Write) -> Result<(), CalError> {
        let mut out = writer(file);
        out.write_record([self.source.x.to_string(), self.source.y.to_string()])?;
        for delay in &self.delays {
            out.write_record([format!("{:?}", delay)])?;
        }
        out.flush()?;
        Ok(())
    }

    /// Read a [PointFile] from the path provided.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CalError> {
        let path = path.as_ref();
        let handle = File::open(path)?;
        Self::from_file(handle, path)
    }

    /// Read a [PointFile] from the [Read]able object provided. `path` is
    /// only used in error messages.
    pub fn from_file(file: impl Read, path: &Path) -> Result<Self, CalError> {
        let mut records = reader(file).into_records();

        let header = records.next().ok_or_else(|| CalError::MalformedPointFile {
            path: path.to_owned(),
            reason: "file is empty".to_owned(),
        })??;
        let source = Point::new(field(&header, 0, path)?, field(&header, 1, path)?);

        let delays = records
            .map(|record| field(&record?, 0, path))
            .collect::<Result<Vec<f64>, CalError>>()?;

        Ok(PointFile { source, delays })
    }
}

/// Write the pose file for `pose` into `dir`, returning its path.
pub fn write_pose(dir: impl AsRef<Path>, pose: &ArrayPose) -> Result<PathBuf, CalError> {
    let path = dir.as_ref().join(pose_file_name(pose.array));
    let mut out = writer(File::create(&path)?);
    out.write_record([
        pose.position.x.to_string(),
        pose.position.y.to_string(),
        pose.theta.to_string(),
        pose.baseline.to_string(),
    ])?;
    out.flush()?;
    Ok(path)
}

/// Read back the pose file of `array` from `dir`.
pub fn read_pose(dir: impl AsRef<Path>, array: usize) -> Result<ArrayPose, CalError> {
    let path = dir.as_ref().join(pose_file_name(array));
    let mut records = reader(File::open(&path)?).into_records();
    let row = records.next().ok_or_else(|| CalError::MalformedPointFile {
        path: path.clone(),
        reason: "file is empty".to_owned(),
    })??;
    let values = (0..4)
        .map(|i| field(&row, i, &path))
        .collect::<Result<Vec<f64>, CalError>>()?;
    Ok(ArrayPose::from_params(array, &values[..3], values[3]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn file_names_are_one_based() {
        assert_eq!(point_file_name(1, 0), "data_1_1.csv");
        assert_eq!(point_file_name(3, 6), "data_3_7.csv");
        assert_eq!(pose_file_name(0), "sensor1.csv");
    }

    #[test]
    fn broadside_point_layout() {
        let mut buf = Vec::new();
        PointFile::new(Point::new(1.0, 0.0), vec![0.0])
            .to_file(&mut buf)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "1,0\n0.0\n");
    }

    #[test]
    fn write_and_read_cursor() {
        let data = PointFile::new(Point::new(-1.5, 2.25), vec![1.2e-5, -3.5e-5, 0.0]);
        let mut buf = Cursor::new(Vec::new());
        data.to_file(&mut buf).unwrap();
        buf.set_position(0);
        let read_data = PointFile::from_file(buf, Path::new("mem")).unwrap();
        assert_eq!(data, read_data);
        assert!((read_data.mean_delay().unwrap() - (-2.3e-5 / 3.0)).abs() < 1e-18);
    }

    #[test]
    fn reads_hand_written_files() {
        let text = "2.0, 3.5\n0.0001\n 0.0002\n\n0.0003\n";
        let data = PointFile::from_file(text.as_bytes(), Path::new("mem")).unwrap();
        assert_eq!(data.source, Point::new(2.0, 3.5));
        assert_eq!(data.delays, vec![0.0001, 0.0002, 0.0003]);
    }

    #[test]
    fn malformed_files() {
        let empty = PointFile::from_file("".as_bytes(), Path::new("e.csv")).unwrap_err();
        assert!(matches!(empty, CalError::MalformedPointFile { .. }));

        let short_header = PointFile::from_file("1.0\n0.1\n".as_bytes(), Path::new("h.csv"));
        assert!(matches!(short_header, Err(CalError::MalformedPointFile { .. })));

        let bad_delay = PointFile::from_file("1,2\nabc\n".as_bytes(), Path::new("d.csv"));
        assert!(matches!(bad_delay, Err(CalError::MalformedPointFile { .. })));
    }

    #[test]
    fn no_delays_has_no_mean() {
        assert_eq!(PointFile::new(Point::new(0.0, 0.0), vec![]).mean_delay(), None);
    }

    #[test]
    fn counts_consecutive_points() {
        let dir = tempfile::tempdir().unwrap();
        for point in [0, 1, 2, 4] {
            PointFile::new(Point::new(1.0, 1.0), vec![0.0])
                .to_path(dir.path().join(point_file_name(2, point)))
                .unwrap();
        }
        assert_eq!(count_points(dir.path(), 2), 3);
        assert_eq!(count_points(dir.path(), 1), 0);
    }

    #[test]
    fn pose_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pose = ArrayPose {
            array: 1,
            position: Point::new(0.75, -1.125),
            theta: 0.3,
            baseline: 0.063,
        };
        let path = write_pose(dir.path(), &pose).unwrap();
        assert!(path.ends_with("sensor2.csv"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "0.75,-1.125,0.3,0.063\n"
        );
        assert_eq!(read_pose(dir.path(), 1).unwrap(), pose);
    }
}
