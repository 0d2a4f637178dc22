//! Runs the recording windows, one calibration point at a time.

use crate::{
    gate::{GateReader, RecordingGate},
    interrupt::Interrupt,
    record_store::RecordStore,
    reducer::{PointReducer, PointReport},
    Point,
};

use log::{info, warn};
use std::{
    fmt::Display,
    io::{self, Write},
    path::PathBuf,
    time::{Duration, Instant},
};

const TICK: Duration = Duration::from_millis(100);

/// How a call to [RecordingCoordinator::run_point] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PointOutcome {
    /// Every client contributed, the point index advanced.
    Counted(PointReport),
    /// Some client ended up without a point file; the same index will be
    /// recorded again.
    Discarded(PointReport),
    /// The operator stopped the run mid-window. Nothing was reduced.
    Interrupted,
}

impl PointOutcome {
    /// Whether the point index advanced.
    pub fn counted(&self) -> bool {
        matches!(self, PointOutcome::Counted(_))
    }
}

/// A point that made it into the data set.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPoint {
    pub source: Point,
    pub files: Vec<PathBuf>,
}

/// Owns the record store and the gate, and drives each recording window:
/// clear, count down, open, wait, close, reduce.
pub struct RecordingCoordinator {
    store: RecordStore,
    gate: RecordingGate,
    reducer: PointReducer,
    countdown: u32,
    interrupt: Interrupt,
    points: Vec<RecordedPoint>,
}

impl RecordingCoordinator {
    pub fn new(reducer: PointReducer, countdown: u32, interrupt: Interrupt) -> Self {
        Self {
            store: RecordStore::new(),
            gate: RecordingGate::new(),
            reducer,
            countdown,
            interrupt,
            points: Vec::new(),
        }
    }

    /// Replace the flag that ends the run early.
    pub fn with_interrupt(self, interrupt: Interrupt) -> Self {
        Self { interrupt, ..self }
    }

    /// The store ingest workers record into.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// A read-only handle on the gate for ingest workers.
    pub fn gate_reader(&self) -> GateReader {
        self.gate.reader()
    }

    /// Number of points recorded so far, which is also the index of the next one.
    pub fn points_recorded(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[RecordedPoint] {
        &self.points
    }

    /// Whether the operator has asked to stop.
    pub fn interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }

    /// Record one calibration point for a source at `source`, keeping what
    /// arrives in the next `duration`.
    pub fn run_point(&mut self, source: Point, duration: Duration) -> PointOutcome {
        let index = self.points.len();
        self.store.clear();

        if !self.count_down() {
            return self.abandon();
        }

        println!(">>> RECORDING for {:.1} seconds...", duration.as_secs_f64());
        self.gate.open();
        let start = Instant::now();
        while let Some(remaining) = duration.checked_sub(start.elapsed()) {
            if self.interrupt.is_raised() {
                println!();
                return self.abandon();
            }
            print!("\r  {:.1}s remaining ", remaining.as_secs_f64());
            // Progress output is best effort.
            let _ = io::stdout().flush();
            spin_sleep::sleep(remaining.min(TICK));
        }
        self.gate.close();
        println!("\r>>> Recording stopped.      ");

        let report = self.reducer.reduce(index, source, self.store.drain());

        if report.counted {
            let files = report
                .clients
                .iter()
                .filter_map(|c| c.file.clone())
                .collect();
            self.points.push(RecordedPoint { source, files });
            info!("Point {} at {} recorded", index + 1, source);
            PointOutcome::Counted(report)
        } else {
            warn!(
                "Point {} discarded, no data saved for client(s) {:?}",
                index + 1,
                report.missing_clients()
            );
            PointOutcome::Discarded(report)
        }
    }

    fn count_down(&self) -> bool {
        for remaining in (1..=self.countdown).rev() {
            if self.interrupt.is_raised() {
                return false;
            }
            println!("  {}...", remaining);
            spin_sleep::sleep(Duration::from_secs(1));
        }
        !self.interrupt.is_raised()
    }

    fn abandon(&mut self) -> PointOutcome {
        self.gate.close();
        self.store.clear();
        warn!("Recording interrupted, point {} abandoned", self.points.len() + 1);
        PointOutcome::Interrupted
    }

    /// Summary of everything recorded in this run.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            points: self.points.clone(),
            data_dir: self.reducer.dir().to_owned(),
            interrupted: self.interrupt.is_raised(),
        }
    }
}

/// What the operator is shown when collection ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub points: Vec<RecordedPoint>,
    pub data_dir: PathBuf,
    /// The run was ended with Ctrl-C
    pub interrupted: bool,
}

impl Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "==== Data collection complete ====")?;
        if self.interrupted {
            writeln!(f, "(stopped by the operator)")?;
        }
        writeln!(f, "Total calibration points recorded: {}", self.points.len())?;
        writeln!(f, "Data saved in {}:", self.data_dir.display())?;
        for (i, point) in self.points.iter().enumerate() {
            writeln!(f, "  Point {} at {}:", i + 1, point.source)?;
            for file in &point.files {
                let name = file.file_name().unwrap_or(file.as_os_str());
                writeln!(f, "    {}", name.to_string_lossy())?;
            }
        }
        if self.points.is_empty() {
            write!(f, "Nothing to solve, record at least one point first.")
        } else {
            writeln!(f, "Next steps:")?;
            write!(
                f,
                "  arraycal --data-dir {} solve --points {}",
                self.data_dir.display(),
                self.points.len()
            )
        }
    }
}
