//! Turns the records of one recording window into point files.

use crate::{
    calibration_files::{point_file_name, PointFile},
    wire::valid_delays,
    ClientId, Point,
};

use log::{info, warn};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// What one client contributed to one calibration point.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSummary {
    pub id: ClientId,
    /// Records received while the gate was open
    pub received: usize,
    /// Records that carried a parseable delay
    pub valid: usize,
    pub mean: Option<f64>,
    /// Population standard deviation of the delays
    pub std: Option<f64>,
    /// Point file written for this client. `None` when it had no valid
    /// records or the file could not be written.
    pub file: Option<PathBuf>,
}

/// Result of reducing one window.
#[derive(Debug, Clone, PartialEq)]
pub struct PointReport {
    pub clients: Vec<ClientSummary>,
    /// True iff every client has a point file for this window
    pub counted: bool,
}

impl PointReport {
    /// Ids of the clients left without a point file in this window.
    pub fn missing_clients(&self) -> Vec<ClientId> {
        self.clients
            .iter()
            .filter(|c| c.file.is_none())
            .map(|c| c.id)
            .collect()
    }
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Writes per-client point files into `dir` for clients `1..=num_clients`.
#[derive(Debug, Clone)]
pub struct PointReducer {
    dir: PathBuf,
    num_clients: usize,
}

impl PointReducer {
    pub fn new(dir: impl Into<PathBuf>, num_clients: usize) -> Self {
        Self {
            dir: dir.into(),
            num_clients,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reduce the records drained after one window for the source at
    /// `source`, stored as point `point` (zero-based).
    ///
    /// Every client with at least one valid record gets a file, even when
    /// some other client came up empty and the point does not count. A file
    /// that cannot be written only costs its own client.
    pub fn reduce(
        &self,
        point: usize,
        source: Point,
        mut records: BTreeMap<ClientId, Vec<String>>,
    ) -> PointReport {
        let mut clients = Vec::with_capacity(self.num_clients);

        for id in 1..=self.num_clients {
            let lines = records.remove(&id).unwrap_or_default();
            let delays = valid_delays(&lines);

            let mut summary = ClientSummary {
                id,
                received: lines.len(),
                valid: delays.len(),
                mean: None,
                std: None,
                file: None,
            };

            match mean_and_std(&delays) {
                Some((mean, std)) => {
                    info!(
                        "[Client {}] {} samples, mean del_t={:.6e}, std={:.6e}",
                        id,
                        delays.len(),
                        mean,
                        std
                    );
                    summary.mean = Some(mean);
                    summary.std = Some(std);
                    let path = self.dir.join(point_file_name(id, point));
                    match PointFile::new(source, delays).to_path(&path) {
                        Ok(()) => summary.file = Some(path),
                        Err(e) => warn!("[Client {}] could not write {}: {}", id, path.display(), e),
                    }
                }
                None => warn!(
                    "[Client {}] no valid data ({} records received)",
                    id,
                    lines.len()
                ),
            }

            clients.push(summary);
        }

        let counted = clients.iter().all(|c| c.file.is_some());
        PointReport { clients, counted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration_files::count_points;

    fn records(entries: &[(ClientId, &[&str])]) -> BTreeMap<ClientId, Vec<String>> {
        entries
            .iter()
            .map(|(id, lines)| (*id, lines.iter().map(|l| l.to_string()).collect()))
            .collect()
    }

    #[test]
    fn broadside_point_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let reducer = PointReducer::new(dir.path(), 1);
        let report = reducer.reduce(0, Point::new(1.0, 0.0), records(&[(1, &["t,0,0,0,0,0.0"])]));
        assert!(report.counted);
        assert_eq!(report.clients[0].valid, 1);
        assert_eq!(report.clients[0].mean, Some(0.0));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("data_1_1.csv")).unwrap(),
            "1,0\n0.0\n"
        );
    }

    #[test]
    fn garbage_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let reducer = PointReducer::new(dir.path(), 1);
        let report = reducer.reduce(0, Point::new(1.0, 0.0), records(&[(1, &["garbage,line"])]));
        assert!(!report.counted);
        assert_eq!(report.clients[0].received, 1);
        assert_eq!(report.clients[0].valid, 0);
        assert_eq!(report.clients[0].file, None);
        assert_eq!(report.missing_clients(), vec![1]);
        assert!(!dir.path().join("data_1_1.csv").exists());
    }

    #[test]
    fn partial_point_keeps_files_but_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let reducer = PointReducer::new(dir.path(), 3);
        let report = reducer.reduce(
            0,
            Point::new(2.0, 1.0),
            records(&[
                (1, &["a,0,0,0,0,1e-5", "b,0,0,0,0,3e-5"]),
                (3, &["a,0,0,0,0,-2e-5", "not a record"]),
            ]),
        );
        assert!(!report.counted);
        assert_eq!(report.missing_clients(), vec![2]);
        assert!(dir.path().join("data_1_1.csv").exists());
        assert!(!dir.path().join("data_2_1.csv").exists());
        assert!(dir.path().join("data_3_1.csv").exists());

        let c1 = &report.clients[0];
        assert!((c1.mean.unwrap() - 2e-5).abs() < 1e-18);
        assert!((c1.std.unwrap() - 1e-5).abs() < 1e-18);
        assert_eq!(report.clients[2].received, 2);
        assert_eq!(report.clients[2].valid, 1);
    }

    #[test]
    fn retry_overwrites_previous_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let reducer = PointReducer::new(dir.path(), 2);
        let first = reducer.reduce(0, Point::new(1.0, 1.0), records(&[(1, &["a,0,0,0,0,1e-5"])]));
        assert!(!first.counted);

        let second = reducer.reduce(
            0,
            Point::new(1.5, 1.0),
            records(&[(1, &["a,0,0,0,0,2e-5"]), (2, &["a,0,0,0,0,4e-5"])]),
        );
        assert!(second.counted);
        let file = PointFile::from_path(dir.path().join("data_1_1.csv")).unwrap();
        assert_eq!(file.source, Point::new(1.5, 1.0));
        assert_eq!(file.delays, vec![2e-5]);
        assert_eq!(count_points(dir.path(), 1), 1);
        assert_eq!(count_points(dir.path(), 2), 1);
    }

    #[test]
    fn unwritable_file_costs_only_its_client() {
        let dir = tempfile::tempdir().unwrap();
        // a directory in the way of client 2's point file
        std::fs::create_dir(dir.path().join("data_2_1.csv")).unwrap();
        let reducer = PointReducer::new(dir.path(), 3);
        let report = reducer.reduce(
            0,
            Point::new(1.0, 0.0),
            records(&[
                (1, &["a,0,0,0,0,1e-5"]),
                (2, &["a,0,0,0,0,2e-5"]),
                (3, &["a,0,0,0,0,3e-5"]),
            ]),
        );
        assert!(!report.counted);
        assert_eq!(report.missing_clients(), vec![2]);
        assert_eq!(report.clients[1].valid, 1);
        assert_eq!(report.clients[1].file, None);
        assert!(dir.path().join("data_2_1.csv").is_dir());

        let last = PointFile::from_path(dir.path().join("data_3_1.csv")).unwrap();
        assert_eq!(last.delays, vec![3e-5]);
        assert_eq!(report.clients[2].file, Some(dir.path().join("data_3_1.csv")));
    }

    #[test]
    fn records_for_unknown_clients_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let reducer = PointReducer::new(dir.path(), 1);
        let report = reducer.reduce(
            0,
            Point::new(1.0, 0.0),
            records(&[(1, &["a,0,0,0,0,0.0"]), (9, &["a,0,0,0,0,0.0"])]),
        );
        assert_eq!(report.clients.len(), 1);
        assert!(!dir.path().join("data_9_1.csv").exists());
    }
}
