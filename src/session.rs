//! The logging session: owns the output CSV while recording and stamps every
//! reading with elapsed time, calibration and the operator's current state.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{info, warn};
use thiserror::Error;

use crate::calibration::CalibrationFactors;
use crate::config::{ConfigError, MachineConfig};
use crate::export::{numbered_path, output_path};
use crate::protocol::{CSV_HEADER, INITIAL_STATE};
use crate::types::{Channel, LogRow, SensorReading, StateChange};

/// Rows kept in memory for [`LoggingSession::export`].  Older rows are still
/// in the session file; they just drop out of the export buffer.
pub const ROW_BUFFER_CAPACITY: usize = 10_000;

/// Give up on numbered names after this many collisions.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// Receives every row the session writes, in order, exactly once.
///
/// Implemented by [`crate::plot::PlotBuffer`]; tests use `Vec<LogRow>`.
pub trait RowSink {
    fn push_row(&mut self, row: &LogRow);
}

impl RowSink for Vec<LogRow> {
    fn push_row(&mut self, row: &LogRow) {
        self.push(row.clone());
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a logging session is already running")]
    AlreadyLogging,
    #[error("not logging")]
    NotLogging,
    #[error("state label is empty")]
    EmptyState,
    #[error("no data to export")]
    NoData,
    #[error("invalid machine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
}

impl SessionError {
    fn io(path: &Path, source: io::Error) -> Self {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Returned by [`LoggingSession::stop`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub duration_secs: f64,
    pub state_changes: usize,
}

/// State that exists only between Start and Stop.
struct ActiveSession {
    path: PathBuf,
    writer: csv::Writer<Box<dyn Write + Send>>,
    start_time: DateTime<Local>,
    current_state: String,
    last_elapsed: f64,
    rows_written: usize,
}

impl ActiveSession {
    /// Seconds since start, never negative and never below the previous value
    /// (the wall clock may step backwards under NTP).
    fn elapsed_at(&self, t: DateTime<Local>) -> f64 {
        let raw = (t - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        raw.max(self.last_elapsed)
    }
}

/// Central coordinator between the BLE stream, the CSV file and the plot.
///
/// ```no_run
/// use laundryiq_rs::prelude::*;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut session = LoggingSession::new();
/// let mut plot = PlotBuffer::default();
/// session.start(&MachineConfig::default(), CalibrationFactors::default(),
///               std::path::Path::new("logs"), chrono::Local::now())?;
/// session.set_state("Wash", chrono::Local::now())?;
/// // for each reading: session.on_reading(&reading, &mut plot)?;
/// session.stop();
/// # Ok(())
/// # }
/// ```
pub struct LoggingSession {
    active: Option<ActiveSession>,
    calibration: CalibrationFactors,
    rows: VecDeque<LogRow>,
    row_capacity: usize,
    state_changes: Vec<StateChange>,
}

impl Default for LoggingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingSession {
    pub fn new() -> Self {
        Self::with_row_capacity(ROW_BUFFER_CAPACITY)
    }

    /// Like [`new`](Self::new) but keeping at most `capacity` rows for export.
    pub fn with_row_capacity(capacity: usize) -> Self {
        Self {
            active: None,
            calibration: CalibrationFactors::default(),
            rows: VecDeque::new(),
            row_capacity: capacity.max(1),
            state_changes: Vec::new(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Open a new log file in `dir` and begin accepting readings.
    ///
    /// The state resets to `"Off"`; the row buffer and state journal from the
    /// previous session are cleared.  An existing file is never overwritten:
    /// if the name is taken, `_1`, `_2`, … is inserted before `.csv`.
    /// Returns the path of the new file.
    pub fn start(
        &mut self,
        machine: &MachineConfig,
        calibration: CalibrationFactors,
        dir: &Path,
        now: DateTime<Local>,
    ) -> Result<PathBuf, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyLogging);
        }
        machine.validate()?;
        fs::create_dir_all(dir).map_err(|e| SessionError::io(dir, e))?;

        let (path, file) = create_log_file(&output_path(dir, machine, &now))?;
        self.open(path, Box::new(file), calibration, now)
    }

    fn open(
        &mut self,
        path: PathBuf,
        out: Box<dyn Write + Send>,
        calibration: CalibrationFactors,
        now: DateTime<Local>,
    ) -> Result<PathBuf, SessionError> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(CSV_HEADER)?;
        writer.flush().map_err(|e| SessionError::io(&path, e))?;

        self.calibration = calibration;
        self.rows.clear();
        self.state_changes.clear();
        self.active = Some(ActiveSession {
            path: path.clone(),
            writer,
            start_time: now,
            current_state: INITIAL_STATE.to_owned(),
            last_elapsed: 0.0,
            rows_written: 0,
        });
        info!("Logging started: {}", path.display());
        Ok(path)
    }

    /// Close the log file.  Safe to call at any time; returns `None` when no
    /// session was running.
    pub fn stop(&mut self) -> Option<SessionSummary> {
        let mut active = self.active.take()?;
        if let Err(e) = active.writer.flush() {
            warn!("Final flush of {} failed: {e}", active.path.display());
        }
        let summary = SessionSummary {
            path: active.path,
            rows: active.rows_written,
            duration_secs: active.last_elapsed,
            state_changes: self.state_changes.len(),
        };
        info!(
            "Logging stopped: {} row(s) in {:.1} s → {}",
            summary.rows,
            summary.duration_secs,
            summary.path.display()
        );
        Some(summary)
    }

    // ── Data path ─────────────────────────────────────────────────────────────

    /// Record one reading.
    ///
    /// Returns `Ok(None)` when not logging.  Otherwise the calibrated row is
    /// written and flushed to the file, kept in the export buffer, and handed
    /// to `sink`, in that order.  A failed write leaves earlier rows intact
    /// and the row is not forwarded.
    pub fn on_reading(
        &mut self,
        reading: &SensorReading,
        sink: &mut dyn RowSink,
    ) -> Result<Option<LogRow>, SessionError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };

        let elapsed_time = active.elapsed_at(reading.timestamp);
        let row = LogRow {
            timestamp: reading.timestamp,
            values: self.calibration.apply_all(&reading.values),
            state: active.current_state.clone(),
            elapsed_time,
        };

        active.writer.write_record(row_record(&row))?;
        active
            .writer
            .flush()
            .map_err(|e| SessionError::io(&active.path, e))?;
        active.last_elapsed = elapsed_time;
        active.rows_written += 1;

        if self.rows.len() >= self.row_capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(row.clone());
        sink.push_row(&row);
        Ok(Some(row))
    }

    /// Change the state stamped on subsequent rows.
    pub fn set_state(
        &mut self,
        state: &str,
        now: DateTime<Local>,
    ) -> Result<StateChange, SessionError> {
        let active = self.active.as_mut().ok_or(SessionError::NotLogging)?;
        let state = state.trim();
        if state.is_empty() {
            return Err(SessionError::EmptyState);
        }
        let change = StateChange {
            timestamp: now,
            state: state.to_owned(),
            elapsed_time: active.elapsed_at(now),
        };
        active.current_state = change.state.clone();
        info!("State → {} (t={:.1}s)", change.state, change.elapsed_time);
        self.state_changes.push(change.clone());
        Ok(change)
    }

    /// Replace the calibration used for subsequent rows.
    pub fn set_calibration(&mut self, calibration: CalibrationFactors) {
        self.calibration = calibration;
    }

    /// Write the buffered rows to a new CSV at `path`.  Returns the row count.
    pub fn export(&self, path: &Path) -> Result<usize, SessionError> {
        if self.rows.is_empty() {
            return Err(SessionError::NoData);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| SessionError::io(path, e))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        for row in &self.rows {
            writer.write_record(row_record(row))?;
        }
        writer.flush().map_err(|e| SessionError::io(path, e))?;
        info!("Exported {} row(s) to {}", self.rows.len(), path.display());
        Ok(self.rows.len())
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn is_logging(&self) -> bool {
        self.active.is_some()
    }

    pub fn current_state(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.current_state.as_str())
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.active.as_ref().map(|a| a.start_time)
    }

    /// Rows written by the running session.
    pub fn rows_written(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.rows_written)
    }

    /// Export buffer: the most recent rows of the current or last session.
    pub fn rows(&self) -> &VecDeque<LogRow> {
        &self.rows
    }

    pub fn state_changes(&self) -> &[StateChange] {
        &self.state_changes
    }

    pub fn calibration(&self) -> &CalibrationFactors {
        &self.calibration
    }
}

/// Create `path` exclusively, falling back to numbered siblings when it
/// already exists.
fn create_log_file(path: &Path) -> Result<(PathBuf, File), SessionError> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let candidate = if n == 0 {
            path.to_path_buf()
        } else {
            numbered_path(path, n)
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                if n > 0 {
                    warn!("{} exists, logging to {}", path.display(), candidate.display());
                }
                return Ok((candidate, file));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(SessionError::io(&candidate, e)),
        }
    }
    Err(SessionError::io(
        path,
        io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
    ))
}

/// Format a row as CSV fields in [`CSV_HEADER`] order.  Values keep a
/// decimal point even when whole (`3.0`).
pub fn row_record(row: &LogRow) -> [String; 6] {
    let cell = |ch: Channel| row.values.get(ch).map(|v| format!("{v:?}")).unwrap_or_default();
    [
        row.timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        cell(Channel::CtClamp),
        cell(Channel::Hall1),
        cell(Channel::Hall2),
        row.state.clone(),
        format!("{:.3}", row.elapsed_time),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelValues;
    use chrono::Duration;

    fn reading(t: DateTime<Local>, ct: f64, h1: f64, h2: f64) -> SensorReading {
        SensorReading {
            values: ChannelValues {
                ct_clamp: Some(ct),
                hall1: Some(h1),
                hall2: Some(h2),
            },
            timestamp: t,
        }
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn state_applies_to_following_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();

        let path = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        s.set_state("Wash", t0).unwrap();
        s.on_reading(&reading(t0, 1.0, 0.1, 0.2), &mut sink).unwrap();
        s.on_reading(&reading(t0 + Duration::seconds(1), 1.1, 0.1, 0.2), &mut sink).unwrap();
        s.set_state("Rinse", t0 + Duration::milliseconds(1500)).unwrap();
        s.on_reading(&reading(t0 + Duration::seconds(2), 1.2, 0.1, 0.2), &mut sink).unwrap();
        s.stop();

        let rows = read_rows(&path);
        let states: Vec<&str> = rows.iter().map(|r| &r[4]).collect();
        assert_eq!(states, ["Wash", "Wash", "Rinse"]);
        let elapsed: Vec<&str> = rows.iter().map(|r| &r[5]).collect();
        assert_eq!(elapsed, ["0.000", "1.000", "2.000"]);
        assert_eq!(s.state_changes().len(), 2);
    }

    #[test]
    fn header_and_calibrated_values() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let cal = CalibrationFactors { ct_clamp: 2.0, hall1: 0.5, hall2: 1.0 };
        let mut s = LoggingSession::new();
        let path = s.start(&MachineConfig::default(), cal, dir.path(), t0).unwrap();

        let partial = SensorReading {
            values: ChannelValues { ct_clamp: Some(1.5), hall1: Some(4.0), hall2: None },
            timestamp: t0,
        };
        s.on_reading(&partial, &mut Vec::<LogRow>::new()).unwrap();
        s.stop();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = rdr.headers().unwrap().iter().map(str::to_owned).collect();
        assert_eq!(header, CSV_HEADER);
        let row = rdr.records().next().unwrap().unwrap();
        assert_eq!(&row[1], "3.0");
        assert_eq!(&row[2], "2.0");
        assert_eq!(&row[3], "");
        assert_eq!(&row[4], "Off");
        assert!(row[0].starts_with(&t0.format("%Y-%m-%dT%H:%M:%S").to_string()));
    }

    #[test]
    fn elapsed_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();
        s.start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();

        // Clock steps backwards between the 2nd and 3rd reading.
        let offsets = [0, 400, 250, 900, -100, 1300];
        for ms in offsets {
            s.on_reading(&reading(t0 + Duration::milliseconds(ms), 0.0, 0.0, 0.0), &mut sink)
                .unwrap();
        }
        let elapsed: Vec<f64> = sink.iter().map(|r| r.elapsed_time).collect();
        assert!(elapsed.windows(2).all(|w| w[1] >= w[0]), "{elapsed:?}");
        assert_eq!(elapsed[0], 0.0);
        assert!((elapsed[5] - 1.3).abs() < 1e-9);
    }

    #[test]
    fn every_written_row_reaches_the_sink_once_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();
        let path = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        for i in 0..25 {
            if i % 3 == 0 {
                s.set_state(if i % 2 == 0 { "Spin" } else { "Rinse" }, t0).unwrap();
            }
            s.on_reading(&reading(t0 + Duration::milliseconds(i * 100), i as f64, 0.0, 0.0), &mut sink)
                .unwrap();
        }
        s.stop();

        let file_rows = read_rows(&path);
        assert_eq!(file_rows.len(), sink.len());
        for (rec, row) in file_rows.iter().zip(&sink) {
            assert_eq!(row_record(row).as_slice(), rec.iter().collect::<Vec<_>>().as_slice());
        }
    }

    #[test]
    fn stop_is_idempotent_and_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        assert!(s.stop().is_none());

        let path = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        s.on_reading(&reading(t0, 1.0, 2.0, 3.0), &mut Vec::<LogRow>::new()).unwrap();
        let summary = s.stop().expect("session was running");
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.path, path);
        assert!(s.stop().is_none());
        assert!(!s.is_logging());
        assert_eq!(read_rows(&path).len(), 1);
    }

    #[test]
    fn idle_session_ignores_readings_and_states() {
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();
        assert!(s.on_reading(&reading(Local::now(), 1.0, 1.0, 1.0), &mut sink).unwrap().is_none());
        assert!(sink.is_empty());
        assert!(matches!(s.set_state("Wash", Local::now()), Err(SessionError::NotLogging)));
    }

    #[test]
    fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = LoggingSession::new();
        let t0 = Local::now();
        s.start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        assert!(matches!(
            s.start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0),
            Err(SessionError::AlreadyLogging)
        ));
    }

    #[test]
    fn empty_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = LoggingSession::new();
        s.start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), Local::now())
            .unwrap();
        assert!(matches!(s.set_state("   ", Local::now()), Err(SessionError::EmptyState)));
        assert_eq!(s.current_state(), Some("Off"));
    }

    #[test]
    fn export_writes_buffer_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        assert!(matches!(
            s.export(&dir.path().join("empty.csv")),
            Err(SessionError::NoData)
        ));

        s.start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        for i in 0..4 {
            s.on_reading(&reading(t0 + Duration::seconds(i), 1.0, 1.0, 1.0), &mut Vec::<LogRow>::new())
                .unwrap();
        }
        s.stop();

        let out = dir.path().join("sub").join("export.csv");
        assert_eq!(s.export(&out).unwrap(), 4);
        assert_eq!(read_rows(&out).len(), 4);
    }

    #[test]
    fn calibration_change_applies_to_later_rows() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();
        s.start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        s.on_reading(&reading(t0, 2.0, 2.0, 2.0), &mut sink).unwrap();
        let mut cal = *s.calibration();
        cal.set(Channel::CtClamp, 1.5);
        s.set_calibration(cal);
        s.on_reading(&reading(t0, 2.0, 2.0, 2.0), &mut sink).unwrap();
        assert_eq!(sink[0].values.ct_clamp, Some(2.0));
        assert_eq!(sink[1].values.ct_clamp, Some(3.0));
        assert_eq!(sink[1].values.hall1, Some(2.0));
    }

    #[test]
    fn invalid_machine_config_blocks_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = LoggingSession::new();
        let mut w = crate::config::WasherSettings::default();
        w.cycle.clear();
        let err = s
            .start(&MachineConfig::Washer(w), CalibrationFactors::default(), dir.path(), Local::now())
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
        assert!(!s.is_logging());
    }

    #[test]
    fn restart_in_same_second_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();

        let first = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        for i in 0..5 {
            s.on_reading(&reading(t0 + Duration::milliseconds(i * 50), 1.0, 1.0, 1.0), &mut sink)
                .unwrap();
        }
        s.stop();

        let second = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        s.on_reading(&reading(t0, 2.0, 2.0, 2.0), &mut sink).unwrap();
        s.stop();
        let third = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        s.stop();

        assert_ne!(first, second);
        assert_eq!(second, numbered_path(&first, 1));
        assert_eq!(third, numbered_path(&first, 2));
        assert_eq!(read_rows(&first).len(), 5);
        assert_eq!(read_rows(&second).len(), 1);
    }

    #[test]
    fn whole_values_keep_a_decimal_point() {
        let row = LogRow {
            timestamp: Local::now(),
            values: ChannelValues { ct_clamp: Some(3.0), hall1: Some(0.25), hall2: Some(-1.0) },
            state: "Off".into(),
            elapsed_time: 1.0,
        };
        let rec = row_record(&row);
        assert_eq!(rec[1..], ["3.0", "0.25", "-1.0", "Off", "1.000"]);
    }

    #[test]
    fn export_keeps_only_newest_rows() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = Local::now();
        let mut s = LoggingSession::with_row_capacity(3);
        let path = s
            .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
            .unwrap();
        for i in 0..5 {
            s.on_reading(&reading(t0 + Duration::seconds(i), i as f64, 0.0, 0.0), &mut Vec::<LogRow>::new())
                .unwrap();
        }
        s.stop();

        assert_eq!(read_rows(&path).len(), 5);
        let out = dir.path().join("export.csv");
        assert_eq!(s.export(&out).unwrap(), 3);
        let ct: Vec<String> = read_rows(&out).iter().map(|r| r[1].to_owned()).collect();
        assert_eq!(ct, ["2.0", "3.0", "4.0"]);
    }

    /// Accepts a fixed number of writes, then fails like a full disk.
    struct FailingFile {
        file: File,
        writes_left: usize,
    }

    impl Write for FailingFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes_left == 0 {
                return Err(io::Error::new(ErrorKind::Other, "disk full"));
            }
            self.writes_left -= 1;
            self.file.write_all(buf)?;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    #[test]
    fn failed_write_keeps_earlier_rows_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let t0 = Local::now();
        let mut s = LoggingSession::new();
        let mut sink: Vec<LogRow> = Vec::new();

        // Header plus three rows succeed.
        let out = FailingFile {
            file: File::create(&path).unwrap(),
            writes_left: 4,
        };
        s.open(path.clone(), Box::new(out), CalibrationFactors::default(), t0)
            .unwrap();
        for i in 0..3 {
            s.on_reading(&reading(t0 + Duration::seconds(i), 1.5, 0.5, 0.0), &mut sink)
                .unwrap();
        }
        let err = s
            .on_reading(&reading(t0 + Duration::seconds(3), 9.0, 9.0, 9.0), &mut sink)
            .unwrap_err();
        assert!(matches!(err, SessionError::Io { .. }));
        assert_eq!(sink.len(), 3);
        assert_eq!(s.rows().len(), 3);
        assert_eq!(s.rows_written(), 3);
        s.stop();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| &r[1] == "1.5"));
    }
}
