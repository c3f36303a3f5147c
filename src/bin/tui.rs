//! Live current-draw logger for LaundryIQ sensors.
//!
//! Usage:
//!   cargo run --bin tui                        # scan, pick a device, log
//!   cargo run --bin tui -- --simulate          # built-in washer simulator
//!   cargo run --bin tui -- --config liq.json   # load and save settings
//!
//! Keys (main view)
//! ----------------
//!   Tab      open device picker
//!   s        scan now
//!   d        disconnect current device
//!   m        machine configuration (washer / dryer settings)
//!   c        calibration
//!   l        start logging
//!   x        stop logging
//!   1 … 8    set machine state (On, Off, Wash, Rinse, Spin, End, Drying, Cooling)
//!   F1 … F3  show / hide CT clamp, Hall1, Hall2
//!   r        cycle sample rate (1 / 2 / 5 / 10 Hz)
//!   e        export buffered rows
//!   z        clear the chart
//!   q / Esc  quit
//!
//! Mouse: hover over the chart to read the nearest sample.
//!
//! Keys (device picker)
//! --------------------
//!   ↑ / ↓   navigate list
//!   Enter    connect to highlighted device
//!   /        edit name filter (Enter applies and rescans)
//!   s        rescan
//!   Esc      close picker

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Chart, Clear, Dataset, GraphType, List, ListItem, ListState,
        Paragraph,
    },
    Frame, Terminal,
};
use tokio::sync::{mpsc, oneshot};

use laundryiq_rs::calibration::{parse_and_compute, CalibrationFactors};
use laundryiq_rs::client::{LiqClient, LiqClientConfig, LiqDevice, LiqHandle};
use laundryiq_rs::config::{MachineConfig, Settings};
use laundryiq_rs::export::export_path;
use laundryiq_rs::parse::{LineParser, ReadingAssembler};
use laundryiq_rs::plot::{HoverPoint, PlotBuffer};
use laundryiq_rs::protocol::{MACHINE_STATES, SAMPLE_RATES_HZ};
use laundryiq_rs::session::LoggingSession;
use laundryiq_rs::types::{Channel, ChannelValues, LiqEvent};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Per-channel line colours: CT clamp, Hall1, Hall2.
const COLORS: [Color; 3] = [Color::Cyan, Color::Yellow, Color::Magenta];

/// Colour of the vertical state-change markers.
const MARKER_COLOR: Color = Color::DarkGray;

/// Braille spinner frames cycled at ~100 ms intervals to indicate background activity.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Messages kept in the log pane.
const LOG_LINES: usize = 200;

/// Simulator notification rate.  Faster than any selectable sample rate so
/// the rate gate has something to do.
const SIM_HZ: f64 = 20.0;

#[derive(Parser, Debug)]
#[command(name = "tui", about = "Live LaundryIQ current logger")]
struct Cli {
    /// Feed the built-in simulator instead of a BLE device.
    #[arg(long)]
    simulate: bool,
    /// Settings file (JSON).  Loaded at start and saved on exit.
    #[arg(long)]
    config: Option<PathBuf>,
}

// ── App mode ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum AppMode {
    /// Not connected; waiting for the operator to scan or pick a device.
    Idle,
    /// BLE scan is running.
    Scanning,
    /// Actively establishing a connection.
    Connecting(String),
    /// Receiving data. Carries the device name and its short identifier.
    Connected { name: String, id: String },
    /// `--simulate` flag: running the built-in signal generator.
    Simulated,
    /// Last scan found no matching devices.
    NoDevices,
    /// Was connected; link was lost.
    Disconnected,
}

/// Modal overlays.  At most one is open.
#[derive(Clone, PartialEq)]
enum Overlay {
    None,
    Picker,
    /// Row 0 is the machine type; rows 1..=3 are its settings.
    Machine { row: usize },
    Calibration(CalForm),
}

#[derive(Clone, PartialEq)]
struct CalForm {
    channel: usize,
    /// `false` = multimeter field, `true` = sensor field.
    sensor_focus: bool,
    multimeter: String,
    sensor: String,
}

impl CalForm {
    fn new() -> Self {
        Self {
            channel: 0,
            sensor_focus: false,
            multimeter: String::new(),
            sensor: String::new(),
        }
    }

    fn field_mut(&mut self) -> &mut String {
        if self.sensor_focus {
            &mut self.sensor
        } else {
            &mut self.multimeter
        }
    }
}

// ── App state (shared with the BLE event task via Arc<Mutex<_>>) ──────────────

pub struct App {
    // ── Pipeline
    parser: LineParser,
    assembler: ReadingAssembler,
    session: LoggingSession,
    plot: PlotBuffer,
    /// Latest raw (uncalibrated) values, shown even when not logging.
    live: ChannelValues,

    // ── Configuration
    machine: MachineConfig,
    calibration: CalibrationFactors,
    output_dir: PathBuf,
    rate_idx: usize,
    name_filter: String,
    scan_timeout_secs: u64,

    // ── Status
    /// Generation of the current BLE link; events from older links are dropped.
    link: u64,
    pub mode: AppMode,
    pub last_error: Option<String>,
    messages: VecDeque<String>,

    // ── Overlays
    overlay: Overlay,
    pub picker_cursor: usize,
    /// Display strings for each discovered device: "Name  [short-id]  rssi"
    pub picker_entries: Vec<String>,
    pub picker_connected_idx: Option<usize>,
    pub picker_scanning: bool,
    /// `Some` while the name filter is being edited in the picker.
    filter_edit: Option<String>,

    // ── Hover
    /// Plotting area of the chart from the last draw, for mouse mapping.
    graph_area: Rect,
    hover: Option<(HoverPoint, u16, u16)>,
}

impl App {
    fn new(settings: &Settings) -> Self {
        let rate_idx = SAMPLE_RATES_HZ
            .iter()
            .position(|&r| r == settings.sample_rate_hz)
            .unwrap_or(SAMPLE_RATES_HZ.len() - 1);
        Self {
            parser: LineParser::new(),
            assembler: ReadingAssembler::new(SAMPLE_RATES_HZ[rate_idx]),
            session: LoggingSession::new(),
            plot: PlotBuffer::default(),
            live: ChannelValues::default(),
            machine: settings.machine.clone(),
            calibration: CalibrationFactors::default(),
            output_dir: settings.output_dir(),
            rate_idx,
            name_filter: settings.name_filter.clone(),
            scan_timeout_secs: settings.scan_timeout_secs,
            link: 0,
            mode: AppMode::Idle,
            last_error: None,
            messages: VecDeque::with_capacity(LOG_LINES),
            overlay: Overlay::None,
            picker_cursor: 0,
            picker_entries: vec![],
            picker_connected_idx: None,
            picker_scanning: false,
            filter_edit: None,
            graph_area: Rect::default(),
            hover: None,
        }
    }

    /// Append a timestamped line to the log pane (and the log file).
    fn note(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::info!("{msg}");
        if self.messages.len() == LOG_LINES {
            self.messages.pop_front();
        }
        self.messages
            .push_back(format!("{}  {msg}", Local::now().format("%H:%M:%S")));
    }

    fn rate_hz(&self) -> f64 {
        SAMPLE_RATES_HZ[self.rate_idx]
    }

    // ── Data path ─────────────────────────────────────────────────────────────

    /// Feed one notification through parser → rate gate → session → chart.
    fn on_data(&mut self, bytes: &[u8]) {
        let update = self.parser.push(bytes);
        if update.is_empty() {
            return;
        }
        let Some(reading) = self.assembler.push(&update, Instant::now(), Local::now()) else {
            return;
        };
        self.live = reading.values;
        match self.session.on_reading(&reading, &mut self.plot) {
            Ok(_) => {}
            Err(e) => {
                log::error!("write failed: {e}");
                self.last_error = Some(e.to_string());
                self.stop_logging("write error");
            }
        }
    }

    /// A new connection is live; returns its generation.
    fn begin_link(&mut self) -> u64 {
        self.link += 1;
        self.link
    }

    /// The current connection is being torn down on purpose.
    fn end_link(&mut self) {
        self.link += 1;
    }

    /// Apply an event from link `link`.  Returns `false` once the forwarding
    /// task should stop: the link ended or was superseded.
    fn on_link_event(&mut self, link: u64, ev: LiqEvent) -> bool {
        if link != self.link {
            log::debug!("dropping event from stale link {link}");
            return false;
        }
        match ev {
            // Mode is already set by the connect path.
            LiqEvent::Connected(_) => true,
            LiqEvent::Data(bytes) => {
                self.on_data(&bytes);
                true
            }
            LiqEvent::Disconnected => {
                self.on_disconnected();
                false
            }
        }
    }

    /// Link lost: stop logging and forget partial input.
    fn on_disconnected(&mut self) {
        self.mode = AppMode::Disconnected;
        self.picker_connected_idx = None;
        self.parser.reset();
        self.assembler.reset();
        self.note("Device disconnected");
        if self.session.is_logging() {
            self.stop_logging("device disconnected");
        }
    }

    // ── Session control ───────────────────────────────────────────────────────

    fn connected(&self) -> bool {
        matches!(self.mode, AppMode::Connected { .. } | AppMode::Simulated)
    }

    fn start_logging(&mut self) {
        if !self.connected() {
            self.note("Connect to a device before logging");
            return;
        }
        let result = self.session.start(
            &self.machine,
            self.calibration,
            &self.output_dir,
            Local::now(),
        );
        match result {
            Ok(path) => {
                self.plot.clear();
                self.note(format!("Logging to {}", path.display()));
            }
            Err(e) => self.note(format!("Start failed: {e}")),
        }
    }

    fn stop_logging(&mut self, reason: &str) {
        if let Some(summary) = self.session.stop() {
            self.note(format!(
                "Logging stopped ({reason}): {} row(s), {:.1} s → {}",
                summary.rows,
                summary.duration_secs,
                summary.path.display()
            ));
        }
    }

    fn set_state(&mut self, label: &str) {
        match self.session.set_state(label, Local::now()) {
            Ok(change) => {
                self.note(format!("State → {} at {:.3} s", change.state, change.elapsed_time));
                self.plot.mark_state(change);
            }
            Err(e) => self.note(format!("State not set: {e}")),
        }
    }

    fn export(&mut self) {
        let path = export_path(&self.output_dir, &self.machine, &Local::now());
        match self.session.export(&path) {
            Ok(n) => self.note(format!("Exported {n} row(s) to {}", path.display())),
            Err(e) => self.note(format!("Export failed: {e}")),
        }
    }

    fn cycle_rate(&mut self) {
        self.rate_idx = (self.rate_idx + 1) % SAMPLE_RATES_HZ.len();
        let hz = self.rate_hz();
        self.assembler.set_rate(hz);
        self.note(format!("Sample rate {hz} Hz"));
    }

    fn apply_calibration(&mut self, form: &CalForm) {
        let channel = Channel::ALL[form.channel];
        match parse_and_compute(&form.multimeter, &form.sensor) {
            Ok(factor) => {
                self.calibration.set(channel, factor);
                self.session.set_calibration(self.calibration);
                self.note(format!("{} factor = {factor:.6}", channel.label()));
            }
            Err(e) => self.note(format!("{} calibration failed: {e}", channel.label())),
        }
    }

    fn reset_calibration(&mut self, channel: Channel) {
        self.calibration.set(channel, 1.0);
        self.session.set_calibration(self.calibration);
        self.note(format!("{} factor reset to 1.0", channel.label()));
    }

    // ── Hover ─────────────────────────────────────────────────────────────────

    /// Map a terminal cell inside the plotting area to chart coordinates.
    fn cell_to_data(&self, col: u16, row: u16) -> Option<(f64, f64)> {
        let g = self.graph_area;
        if g.width < 2 || g.height < 2 {
            return None;
        }
        if col < g.x || col >= g.x + g.width || row < g.y || row >= g.y + g.height {
            return None;
        }
        let [x0, x1] = self.plot.x_bounds();
        let [y0, y1] = self.plot.y_bounds();
        let fx = f64::from(col - g.x) / f64::from(g.width - 1);
        let fy = f64::from(row - g.y) / f64::from(g.height - 1);
        Some((x0 + fx * (x1 - x0), y1 - fy * (y1 - y0)))
    }

    fn on_mouse_move(&mut self, col: u16, row: u16) {
        self.hover = self
            .cell_to_data(col, row)
            .and_then(|(x, y)| self.plot.nearest(x, y))
            .map(|p| (p, col, row));
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Shorten a BLE identifier for compact display.
/// UUID  → last 8 hex chars, e.g. "90ABCDEF"
/// MAC   → last 8 chars, e.g.  "EE:FF"
fn short_id(id: &str) -> String {
    let trimmed = id.trim_matches(|c: char| c == '{' || c == '}');
    if trimmed.len() > 8 {
        trimmed[trimmed.len() - 8..].to_uppercase()
    } else {
        trimmed.to_uppercase()
    }
}

/// Build the display string shown in the picker list.
fn device_entry(d: &LiqDevice) -> String {
    let rssi = d
        .rssi
        .map(|r| format!("{r} dBm"))
        .unwrap_or_else(|| "? dBm".into());
    format!("{}  [{}]  {rssi}", d.name, short_id(&d.id))
}

fn fmt_amps(v: Option<f64>) -> String {
    v.map_or_else(|| "   –   ".to_owned(), |v| format!("{v:7.3}"))
}

// ── Simulator ─────────────────────────────────────────────────────────────────

/// Deterministic noise in `[-0.5, 0.5)`.
fn noise(t: f64, ch: usize) -> f64 {
    let nx = t * 1000.7 + ch as f64 * 137.508;
    (nx.sin() * 9973.1).fract() - 0.5
}

/// Synthetic washer draw at time `t` (seconds), repeating every 120 s.
///
/// | Phase | Time | CT clamp |
/// |-------|------|----------|
/// | Idle  | 0–10 s | ~0.05 A |
/// | Wash  | 10–50 s | 3 A ± 1.5 A agitation |
/// | Drain | 50–70 s | ~1 A |
/// | Spin  | 70–100 s | ramp to 6 A |
/// | Idle  | 100–120 s | ~0.05 A |
fn sim_values(t: f64) -> [f64; 3] {
    let p = t % 120.0;
    let ct = match p {
        p if p < 10.0 => 0.05,
        p if p < 50.0 => 3.0 + 1.5 * (2.0 * PI * p / 4.0).sin(),
        p if p < 70.0 => 1.0,
        p if p < 100.0 => 1.0 + 5.0 * ((p - 70.0) / 30.0).min(1.0),
        _ => 0.05,
    };
    let ct = (ct + 0.1 * noise(t, 0)).max(0.0);
    let hall1 = (0.92 * ct + 0.05 * noise(t, 1)).max(0.0);
    let hall2 = (0.2 + 0.05 * noise(t, 2)).max(0.0);
    [ct, hall1, hall2]
}

/// Spawn a task that writes device-style text into `app` at [`SIM_HZ`].
///
/// Each tick's text is split at a moving offset into two chunks so partial
/// lines are exercised the same way real notifications exercise them.
fn spawn_simulator(app: Arc<Mutex<App>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / SIM_HZ));
        let mut t = 0.0_f64;
        let mut seq = 0usize;
        loop {
            ticker.tick().await;
            let [ct, h1, h2] = sim_values(t);
            let text = format!("CT_A: {ct:.4}\nHALL1_A: {h1:.4}\nHALL2_A: {h2:.4}\n");
            let cut = seq % text.len();
            let (a, b) = text.as_bytes().split_at(cut);
            {
                let mut s = app.lock().unwrap();
                s.on_data(a);
                s.on_data(b);
            }
            seq = seq.wrapping_add(7);
            t += 1.0 / SIM_HZ;
        }
    });
}

// ── BLE helpers ───────────────────────────────────────────────────────────────

/// Scan result delivered through the oneshot channel.
struct ScanResult {
    devices: Vec<LiqDevice>,
    /// `Some(msg)` when the scan failed or timed out.
    error: Option<String>,
}

/// Start a background scan; return a receiver for the results.
///
/// The task has a hard deadline of `scan_timeout + 10 s` in case btleplug
/// hangs inside `Manager::new()` or `start_scan()`.
fn start_scan(config: LiqClientConfig) -> oneshot::Receiver<ScanResult> {
    let (tx, rx) = oneshot::channel();
    let deadline = Duration::from_secs(config.scan_timeout_secs + 10);
    tokio::spawn(async move {
        let result = match tokio::time::timeout(deadline, LiqClient::new(config).scan_all()).await
        {
            Ok(Ok(devices)) => {
                log::info!("Scan completed: {} device(s) found", devices.len());
                ScanResult { devices, error: None }
            }
            Ok(Err(e)) => {
                log::error!("Scan failed: {e}");
                ScanResult { devices: vec![], error: Some(format!("{e}")) }
            }
            Err(_) => {
                log::error!("Scan timed out after {deadline:?}");
                ScanResult { devices: vec![], error: Some("scan timed out".into()) }
            }
        };
        let _ = tx.send(result);
    });
    rx
}

/// Kick off a scan and flag it in the UI.
fn begin_scan(app: &Arc<Mutex<App>>, connected: bool) -> oneshot::Receiver<ScanResult> {
    let config = {
        let mut s = app.lock().unwrap();
        if !connected {
            s.mode = AppMode::Scanning;
        }
        s.picker_scanning = true;
        let msg = format!("Scanning for {:?} …", s.name_filter);
        s.note(msg);
        LiqClientConfig {
            name_filter: s.name_filter.clone(),
            scan_timeout_secs: s.scan_timeout_secs,
        }
    };
    start_scan(config)
}

/// Spawn a task that forwards BLE events of link `link` into `app`.
/// Returns immediately; the task runs until the peripheral disconnects or
/// another link replaces this one.
fn spawn_event_task(mut rx: mpsc::Receiver<LiqEvent>, link: u64, app: Arc<Mutex<App>>) {
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            if !app.lock().unwrap().on_link_event(link, ev) {
                break;
            }
        }
    });
}

/// Payload delivered on a successful connection.
struct ConnectOutcome {
    rx: mpsc::Receiver<LiqEvent>,
    handle: LiqHandle,
    device_idx: usize,
    name: String,
    id: String,
}

/// Kick off a background connection attempt and return immediately.
///
/// The oneshot resolves to `Some(ConnectOutcome)` on success and `None` on
/// failure (`app.mode` is already `Disconnected` by then).
fn start_connect(
    idx: usize,
    device: LiqDevice,
    app: Arc<Mutex<App>>,
) -> oneshot::Receiver<Option<ConnectOutcome>> {
    let (tx, rx) = oneshot::channel();

    {
        let mut s = app.lock().unwrap();
        s.mode = AppMode::Connecting(device.name.clone());
        s.picker_connected_idx = None;
        s.overlay = Overlay::None;
        s.parser.reset();
        s.assembler.reset();
        s.note(format!("Connecting to {} …", device.name));
    }

    tokio::spawn(async move {
        let client = LiqClient::new(LiqClientConfig::default());
        let name = device.name.clone();
        let id = short_id(&device.id);
        match client.connect_to(device).await {
            Ok((evt_rx, handle)) => {
                let _ = tx.send(Some(ConnectOutcome {
                    rx: evt_rx,
                    handle,
                    device_idx: idx,
                    name,
                    id,
                }));
            }
            Err(e) => {
                log::warn!("connect_to failed: {e:#}");
                let mut s = app.lock().unwrap();
                s.mode = AppMode::Disconnected;
                s.last_error = Some(format!("{e}"));
                s.note(format!("Connection failed: {e}"));
                let _ = tx.send(None);
            }
        }
    });

    rx
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Top-level render callback handed to [`Terminal::draw`].
///
/// Header / (chart | side panel) / log pane / footer, then the open overlay
/// and the hover tooltip on top.
fn draw(frame: &mut Frame, app: &mut App) {
    let area = frame.area();
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(7),
        Constraint::Length(3),
    ])
    .split(area);
    let [chart_area, side_area] =
        Layout::horizontal([Constraint::Min(40), Constraint::Length(34)]).areas(root[1]);

    draw_header(frame, root[0], app);
    draw_chart(frame, chart_area, app);
    draw_side_panel(frame, side_area, app);
    draw_messages(frame, root[2], app);
    draw_footer(frame, root[3], app);

    match &app.overlay {
        Overlay::None => {}
        Overlay::Picker => draw_device_picker(frame, area, app),
        Overlay::Machine { row } => draw_machine_form(frame, area, app, *row),
        Overlay::Calibration(form) => draw_calibration(frame, area, app, form),
    }

    if let Some((point, col, row)) = &app.hover {
        draw_tooltip(frame, area, &point.label(), *col, *row);
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Return the current braille spinner frame based on wall-clock milliseconds.
fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

/// Status bar: connection state, recording indicator, state, sample rate.
fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (label, color) = match &app.mode {
        AppMode::Idle => ("○ Not connected".to_owned(), Color::DarkGray),
        AppMode::Scanning => (format!("{} Scanning…", spinner_str()), Color::Yellow),
        AppMode::Connecting(name) => (
            format!("{} Connecting to {}…", spinner_str(), name),
            Color::Yellow,
        ),
        AppMode::Connected { name, id } => (format!("● {name}  [{id}]"), Color::Green),
        AppMode::Simulated => ("◆ Simulated".to_owned(), Color::Cyan),
        AppMode::NoDevices => ("No devices found, press [s]".to_owned(), Color::Yellow),
        AppMode::Disconnected => {
            let reason = app
                .last_error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default();
            (format!("✕ Disconnected{reason}"), Color::Red)
        }
    };

    let rec = if app.session.is_logging() {
        Span::styled(
            format!("⏺ REC {} rows", app.session.rows_written()),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled("not logging", Style::default().fg(Color::DarkGray))
    };

    let state = app.session.current_state().unwrap_or("–").to_owned();

    let line = Line::from(vec![
        Span::styled(
            " LaundryIQ Logger ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        rec,
        sep(),
        Span::styled(
            format!("State: {state}"),
            Style::default().fg(Color::LightBlue).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(format!("{} Hz", app.rate_hz()), Style::default().fg(Color::White)),
        Span::raw(" "),
    ]);

    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

/// Dimmed vertical separator used between header fields.
#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

// ── Chart ─────────────────────────────────────────────────────────────────────

/// Render the three channel series plus a vertical line per state change.
///
/// Also records the plotting rectangle so mouse positions can be mapped back
/// to data coordinates.
fn draw_chart(frame: &mut Frame, area: Rect, app: &mut App) {
    let [x0, x1] = app.plot.x_bounds();
    let [y0, y1] = app.plot.y_bounds();

    let series: Vec<(Channel, Vec<(f64, f64)>)> = Channel::ALL
        .into_iter()
        .filter(|&ch| app.plot.is_visible(ch))
        .map(|ch| (ch, app.plot.window_series(ch)))
        .collect();
    let markers: Vec<(String, [(f64, f64); 2])> = app
        .plot
        .markers()
        .map(|m| (m.state.clone(), [(m.elapsed_time, y0), (m.elapsed_time, y1)]))
        .collect();

    let mut datasets: Vec<Dataset> = markers
        .iter()
        .map(|(_, line)| {
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(MARKER_COLOR))
                .data(line)
        })
        .collect();
    datasets.extend(series.iter().map(|(ch, data)| {
        Dataset::default()
            .name(ch.label())
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COLORS[ch.index()]))
            .data(data)
    }));

    let y_labels: Vec<String> = [0.0, 0.5, 1.0]
        .iter()
        .map(|&f| format!("{:.2}", y0 + f * (y1 - y0)))
        .collect();
    let x_labels: Vec<String> = [0.0, 0.5, 1.0]
        .iter()
        .map(|&f| format!("{:.0}s", x0 + f * (x1 - x0)))
        .collect();

    let marker_names: Vec<&str> = markers.iter().map(|(s, _)| s.as_str()).collect();
    let title = if marker_names.is_empty() {
        " Current (A) ".to_owned()
    } else {
        format!(" Current (A)  ▏{} ", marker_names.join(" ▏"))
    };

    // Plotting area: inside the border, right of the y labels, above the
    // x axis line and labels.
    let inner = area.inner(Margin {
        horizontal: 1,
        vertical: 1,
    });
    let label_w = y_labels.iter().map(|l| l.len()).max().unwrap_or(0) as u16 + 1;
    app.graph_area = Rect::new(
        inner.x + label_w,
        inner.y,
        inner.width.saturating_sub(label_w),
        inner.height.saturating_sub(2),
    );

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .title(Span::styled(
                    title,
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL),
        )
        .x_axis(
            Axis::default()
                .bounds([x0, x1])
                .labels(x_labels)
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds([y0, y1])
                .labels(y_labels)
                .style(Style::default().fg(Color::DarkGray)),
        );

    frame.render_widget(chart, area);
}

fn draw_tooltip(frame: &mut Frame, area: Rect, text: &str, col: u16, row: u16) {
    let w = (text.chars().count() as u16 + 2).min(area.width);
    let h = 3u16.min(area.height);
    let x = (col + 2).min(area.right().saturating_sub(w));
    let y = if row + 1 + h <= area.bottom() { row + 1 } else { row.saturating_sub(h) };
    let rect = Rect::new(x, y, w, h);
    frame.render_widget(Clear, rect);
    frame.render_widget(
        Paragraph::new(Span::styled(text, Style::default().fg(Color::White)))
            .block(Block::default().borders(Borders::ALL)),
        rect,
    );
}

// ── Side panel ────────────────────────────────────────────────────────────────

/// Live values, calibration factors, and the machine configuration.
fn draw_side_panel(frame: &mut Frame, area: Rect, app: &App) {
    let dim = Style::default().fg(Color::DarkGray);
    let mut lines = vec![Line::from(Span::styled(" Live (calibrated)", dim))];

    for ch in Channel::ALL {
        let color = if app.plot.is_visible(ch) {
            COLORS[ch.index()]
        } else {
            Color::DarkGray
        };
        let value = app.live.get(ch).map(|v| app.calibration.apply(v, ch));
        lines.push(Line::from(vec![
            Span::styled(format!(" F{} ", ch.index() + 1), dim),
            Span::styled(format!("{:9}", ch.label()), Style::default().fg(color)),
            Span::styled(format!("{} A", fmt_amps(value)), Style::default().fg(color)),
            Span::styled(format!("  ×{:.4}", app.calibration.get(ch)), dim),
        ]));
    }

    lines.push(Line::raw(""));
    lines.push(Line::from(Span::styled(
        format!(" {}", app.machine.type_name()),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )));
    for (label, value, _) in app.machine.fields() {
        lines.push(Line::from(vec![
            Span::styled(format!("   {label:10}"), dim),
            Span::raw(value.to_owned()),
        ]));
    }

    lines.push(Line::raw(""));
    lines.push(Line::from(Span::styled(" States", dim)));
    let current = app.session.current_state();
    for (i, state) in MACHINE_STATES.iter().enumerate() {
        let style = if current == Some(*state) {
            Style::default().fg(Color::Black).bg(Color::LightBlue)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(vec![
            Span::styled(format!("   [{}] ", i + 1), dim),
            Span::styled(state.to_string(), style),
        ]));
    }

    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

// ── Log pane ──────────────────────────────────────────────────────────────────

fn draw_messages(frame: &mut Frame, area: Rect, app: &App) {
    let rows = area.height.saturating_sub(2) as usize;
    let skip = app.messages.len().saturating_sub(rows);
    let lines: Vec<Line> = app
        .messages
        .iter()
        .skip(skip)
        .map(|m| Line::raw(m.as_str()))
        .collect();
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().title(" Log ").borders(Borders::ALL)),
        area,
    );
}

// ── Footer ────────────────────────────────────────────────────────────────────

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let log_key = if app.session.is_logging() {
        vec![key("[x]"), Span::raw("Stop  ")]
    } else {
        vec![key("[l]"), Span::raw("Log  ")]
    };
    let mut spans = vec![Span::raw(" "), key("[Tab]"), Span::raw("Devices  ")];
    spans.extend(log_key);
    spans.extend([
        key("[1-8]"),
        Span::raw("State  "),
        key("[F1-F3]"),
        Span::raw("Channels  "),
        key("[m]"),
        Span::raw("Machine  "),
        key("[c]"),
        Span::raw("Calibrate  "),
        key("[r]"),
        Span::raw("Rate  "),
        key("[e]"),
        Span::raw("Export  "),
        key("[z]"),
        Span::raw("Clear  "),
        key("[d]"),
        Span::raw("Disconnect  "),
        key("[q]"),
        Span::raw("Quit"),
    ]);

    frame.render_widget(
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

/// Styled keybinding label (bold yellow) used in hint lines.
#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

/// Centered popup of the given inner size, cleared and framed.
fn popup(frame: &mut Frame, area: Rect, title: String, width: u16, height: u16) -> Rect {
    let box_h = height + 2;
    let box_w = width.max(52).min(area.width);
    let x = area.x + (area.width.saturating_sub(box_w)) / 2;
    let y = area.y + (area.height.saturating_sub(box_h)) / 2;
    let rect = Rect::new(x, y, box_w, box_h.min(area.height));

    frame.render_widget(Clear, rect);
    frame.render_widget(
        Block::default()
            .title(Span::styled(
                title,
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
        rect,
    );
    rect.inner(Margin {
        horizontal: 1,
        vertical: 1,
    })
}

// ── Device picker overlay ─────────────────────────────────────────────────────

/// Centered device list with the name filter above it.
fn draw_device_picker(frame: &mut Frame, area: Rect, app: &App) {
    let n = app.picker_entries.len().max(1) as u16;
    let title = if app.picker_scanning {
        format!(" {} Scanning…  ({} found) ", spinner_str(), app.picker_entries.len())
    } else {
        format!(" Select Device  ({} found) ", app.picker_entries.len())
    };
    let inner = popup(frame, area, title, area.width * 60 / 100, n + 6);

    let hint_h = 2u16;
    let [filter_area, list_area, _, hint_area] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(inner.height.saturating_sub(hint_h + 3)),
        Constraint::Length(1),
        Constraint::Length(hint_h),
    ])
    .areas(inner);

    let filter_line = match &app.filter_edit {
        Some(text) => Line::from(vec![
            Span::styled(" Name filter: ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("{text}▏"),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        ]),
        None => Line::from(vec![
            Span::styled(" Name filter: ", Style::default().fg(Color::DarkGray)),
            Span::raw(if app.name_filter.is_empty() {
                "(any)".to_owned()
            } else {
                app.name_filter.clone()
            }),
        ]),
    };
    frame.render_widget(Paragraph::new(filter_line), filter_area);

    let items: Vec<ListItem> = if app.picker_entries.is_empty() {
        vec![ListItem::new(Span::styled(
            "  No devices found, press [s] to scan",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        app.picker_entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let connected = app.picker_connected_idx == Some(i);
                let (bullet, color, suffix) = if connected {
                    ("● ", Color::Green, "  ← connected")
                } else {
                    ("  ", Color::White, "")
                };
                ListItem::new(Span::styled(
                    format!("{bullet}{entry}{suffix}"),
                    Style::default().fg(color),
                ))
            })
            .collect()
    };

    let mut list_state = ListState::default();
    if !app.picker_entries.is_empty() {
        list_state.select(Some(app.picker_cursor));
    }

    frame.render_stateful_widget(
        List::new(items)
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ "),
        list_area,
        &mut list_state,
    );

    frame.render_widget(
        Paragraph::new(vec![
            Line::from(vec![
                key(" [↑↓]"),
                Span::raw(" Navigate  "),
                key("[↵]"),
                Span::raw(" Connect  "),
                key("[/]"),
                Span::raw(" Filter  "),
                key("[s]"),
                Span::raw(" Rescan  "),
                key("[Esc]"),
                Span::raw(" Close"),
            ]),
            Line::from(Span::styled(
                " Named devices first, strongest signal first",
                Style::default().fg(Color::DarkGray),
            )),
        ]),
        hint_area,
    );
}

// ── Machine configuration overlay ─────────────────────────────────────────────

fn draw_machine_form(frame: &mut Frame, area: Rect, app: &App, row: usize) {
    let inner = popup(frame, area, " Machine Configuration ".into(), 56, 8);

    let mut rows: Vec<(String, String)> = vec![("Type".into(), app.machine.type_name().into())];
    rows.extend(
        app.machine
            .fields()
            .iter()
            .map(|(label, value, _)| ((*label).to_owned(), (*value).to_owned())),
    );

    let mut lines: Vec<Line> = rows
        .into_iter()
        .enumerate()
        .map(|(i, (label, value))| {
            let style = if i == row {
                Style::default().fg(Color::Black).bg(Color::White)
            } else {
                Style::default().fg(Color::White)
            };
            Line::from(vec![
                Span::styled(format!("  {label:10}"), Style::default().fg(Color::DarkGray)),
                Span::styled(format!("◀ {value} ▶"), style),
            ])
        })
        .collect();

    lines.push(Line::raw(""));
    if app.session.is_logging() {
        lines.push(Line::from(Span::styled(
            "  Locked while logging",
            Style::default().fg(Color::Red),
        )));
    } else {
        lines.push(Line::from(vec![
            key("  [↑↓]"),
            Span::raw(" Field  "),
            key("[←→]"),
            Span::raw(" Change  "),
            key("[Esc]"),
            Span::raw(" Done"),
        ]));
    }
    frame.render_widget(Paragraph::new(lines), inner);
}

// ── Calibration overlay ───────────────────────────────────────────────────────

fn draw_calibration(frame: &mut Frame, area: Rect, app: &App, form: &CalForm) {
    let inner = popup(frame, area, " Calibration ".into(), 60, 10);
    let dim = Style::default().fg(Color::DarkGray);

    let mut lines = vec![Line::from(Span::styled(
        "  factor = multimeter reading / sensor reading",
        dim,
    ))];
    for ch in Channel::ALL {
        let selected = ch.index() == form.channel;
        let style = if selected {
            Style::default().fg(Color::Black).bg(Color::White)
        } else {
            Style::default().fg(COLORS[ch.index()])
        };
        let raw = app.live.get(ch);
        lines.push(Line::from(vec![
            Span::styled(format!("  {:9}", ch.label()), style),
            Span::styled(format!("  ×{:.6}", app.calibration.get(ch)), Style::default()),
            Span::styled(format!("   raw {}", fmt_amps(raw)), dim),
        ]));
    }
    lines.push(Line::raw(""));

    let field = |label: &str, text: &str, focus: bool| {
        let style = if focus {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        vec![
            Span::styled(format!("  {label} "), dim),
            Span::styled(format!("[{text:>10}{}]", if focus { "▏" } else { " " }), style),
        ]
    };
    let mut inputs = field("MM", &form.multimeter, !form.sensor_focus);
    inputs.extend(field("Sen", &form.sensor, form.sensor_focus));
    lines.push(Line::from(inputs));
    lines.push(Line::raw(""));
    lines.push(Line::from(vec![
        key("  [↑↓]"),
        Span::raw(" Channel  "),
        key("[Tab]"),
        Span::raw(" MM/Sen  "),
        key("[u]"),
        Span::raw(" Sen=raw  "),
        key("[↵]"),
        Span::raw(" Calc  "),
        key("[Del]"),
        Span::raw(" Reset  "),
        key("[Esc]"),
        Span::raw(" Close"),
    ]));

    frame.render_widget(Paragraph::new(lines), inner);
}

// ── Overlay key handling ──────────────────────────────────────────────────────

fn handle_machine_key(app: &mut App, row: usize, code: KeyCode) -> Overlay {
    if app.session.is_logging() {
        return match code {
            KeyCode::Esc | KeyCode::Enter | KeyCode::Char('m') => Overlay::None,
            _ => Overlay::Machine { row },
        };
    }
    match code {
        KeyCode::Esc | KeyCode::Enter | KeyCode::Char('m') => {
            if let Err(e) = app.machine.validate() {
                app.note(format!("Machine configuration: {e}"));
            }
            return Overlay::None;
        }
        KeyCode::Up => return Overlay::Machine { row: row.saturating_sub(1) },
        KeyCode::Down => return Overlay::Machine { row: (row + 1).min(3) },
        KeyCode::Left | KeyCode::Right if row == 0 => app.machine.toggle_type(),
        KeyCode::Left => app.machine.step(row - 1, false),
        KeyCode::Right => app.machine.step(row - 1, true),
        _ => {}
    }
    Overlay::Machine { row }
}

fn handle_calibration_key(app: &mut App, mut form: CalForm, code: KeyCode) -> Overlay {
    match code {
        KeyCode::Esc => return Overlay::None,
        KeyCode::Up => form.channel = form.channel.saturating_sub(1),
        KeyCode::Down => form.channel = (form.channel + 1).min(Channel::ALL.len() - 1),
        KeyCode::Tab | KeyCode::BackTab => form.sensor_focus = !form.sensor_focus,
        KeyCode::Backspace => {
            form.field_mut().pop();
        }
        KeyCode::Char(c) if c.is_ascii_digit() || c == '.' || c == '-' => {
            form.field_mut().push(c);
        }
        KeyCode::Char('u') => {
            if let Some(raw) = app.live.get(Channel::ALL[form.channel]) {
                form.sensor = format!("{raw}");
            }
        }
        KeyCode::Delete => app.reset_calibration(Channel::ALL[form.channel]),
        KeyCode::Enter => app.apply_calibration(&form),
        _ => {}
    }
    Overlay::Calibration(form)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: laundryiq tui requires a real terminal (TTY).");
        eprintln!("Run it directly in a terminal emulator, not piped or redirected.");
        std::process::exit(1);
    }
    let cli = Cli::parse();

    // ── Logging ─────────────────────────────────────────────────────────────
    // Logs go to laundryiq-tui.log so they never interfere with the display.
    //   RUST_LOG=debug cargo run --bin tui
    {
        use std::fs::File;
        if let Ok(file) = File::create("laundryiq-tui.log") {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_or_default(path)?,
        None => Settings::default(),
    };

    // ── Shared UI state ───────────────────────────────────────────────────────
    let app = Arc::new(Mutex::new(App::new(&settings)));

    // ── Connection state (owned by main task only) ────────────────────────────
    let mut devices: Vec<LiqDevice> = vec![];
    let mut connected_idx: Option<usize> = None;
    let mut handle: Option<Arc<LiqHandle>> = None;
    let mut pending_scan: Option<oneshot::Receiver<ScanResult>> = None;
    let mut pending_connect: Option<oneshot::Receiver<Option<ConnectOutcome>>> = None;

    // ── Start data source ─────────────────────────────────────────────────────
    if cli.simulate {
        let mut s = app.lock().unwrap();
        s.mode = AppMode::Simulated;
        s.note("Simulator running; press [l] to log");
        drop(s);
        spawn_simulator(Arc::clone(&app));
    } else {
        app.lock().unwrap().overlay = Overlay::Picker;
        pending_scan = Some(begin_scan(&app, false));
    }

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33); // ~30 FPS

    // ── Main loop ─────────────────────────────────────────────────────────────
    'main: loop {
        // ── 1. Collect finished scan results ─────────────────────────────────
        if let Some(ref mut rx) = pending_scan {
            if let Ok(scan_result) = rx.try_recv() {
                pending_scan = None;
                devices = scan_result.devices;
                connected_idx = None;

                let mut s = app.lock().unwrap();
                s.picker_entries = devices.iter().map(device_entry).collect();
                s.picker_scanning = false;
                s.picker_cursor = 0;
                s.picker_connected_idx = None;
                if let Some(err) = scan_result.error {
                    s.last_error = Some(err.clone());
                    s.note(format!("Scan failed: {err}"));
                } else {
                    s.note(format!("{} device(s) found", devices.len()));
                }
                if handle.is_none() {
                    s.mode = if devices.is_empty() {
                        AppMode::NoDevices
                    } else {
                        AppMode::Idle
                    };
                }
            }
        }

        // ── 1b. Collect finished connection attempt ───────────────────────────
        if let Some(ref mut rx) = pending_connect {
            if let Ok(result) = rx.try_recv() {
                pending_connect = None;
                if let Some(outcome) = result {
                    let link = {
                        let mut s = app.lock().unwrap();
                        s.note(format!("Connected to {}", outcome.name));
                        s.mode = AppMode::Connected {
                            name: outcome.name,
                            id: outcome.id,
                        };
                        s.last_error = None;
                        s.picker_connected_idx = Some(outcome.device_idx);
                        s.begin_link()
                    };
                    connected_idx = Some(outcome.device_idx);
                    handle = Some(Arc::new(outcome.handle));
                    spawn_event_task(outcome.rx, link, Arc::clone(&app));
                }
            }
        }

        // ── 2. Drop the handle after an unexpected disconnect ────────────────
        //    The event task has already stopped logging.
        {
            let is_disconnected = matches!(app.lock().unwrap().mode, AppMode::Disconnected);
            if is_disconnected {
                if let Some(h) = handle.take() {
                    tokio::spawn(async move { let _ = h.disconnect().await; });
                }
                connected_idx = None;
            }
        }

        // ── 3. Render ─────────────────────────────────────────────────────────
        {
            let mut s = app.lock().unwrap();
            terminal.draw(|f| draw(f, &mut s))?;
        }

        // ── 4. Handle input ───────────────────────────────────────────────────
        if !event::poll(tick)? {
            continue;
        }
        let key = match event::read()? {
            Event::Key(k) if k.kind == KeyEventKind::Press => k,
            Event::Mouse(m) => {
                if matches!(m.kind, MouseEventKind::Moved | MouseEventKind::Drag(_)) {
                    app.lock().unwrap().on_mouse_move(m.column, m.row);
                }
                continue;
            }
            _ => continue,
        };
        let KeyEvent { code, modifiers, .. } = key;

        // Raw mode delivers Ctrl+C as a key event.
        if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
            break 'main;
        }

        let overlay = app.lock().unwrap().overlay.clone();
        match overlay {
            // ── Picker overlay keys ───────────────────────────────────────────
            Overlay::Picker => {
                let mut s = app.lock().unwrap();
                if s.filter_edit.is_some() {
                    match code {
                        KeyCode::Char(c) => s.filter_edit.get_or_insert_with(String::new).push(c),
                        KeyCode::Backspace => {
                            s.filter_edit.get_or_insert_with(String::new).pop();
                        }
                        KeyCode::Esc => s.filter_edit = None,
                        KeyCode::Enter => {
                            let filter = s.filter_edit.take().unwrap_or_default();
                            s.name_filter = filter.trim().to_owned();
                            drop(s);
                            if pending_scan.is_none() {
                                pending_scan = Some(begin_scan(&app, handle.is_some()));
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
                match code {
                    KeyCode::Esc => s.overlay = Overlay::None,
                    KeyCode::Char('q') => break 'main,
                    KeyCode::Char('/') => {
                        let current = s.name_filter.clone();
                        s.filter_edit = Some(current);
                    }
                    KeyCode::Char('s') => {
                        drop(s);
                        if pending_scan.is_none() {
                            pending_scan = Some(begin_scan(&app, handle.is_some()));
                        }
                    }
                    KeyCode::Up => {
                        let cursor = s.picker_cursor.saturating_sub(1);
                        s.picker_cursor = cursor;
                    }
                    KeyCode::Down => {
                        let max = s.picker_entries.len().saturating_sub(1);
                        let cursor = (s.picker_cursor + 1).min(max);
                        s.picker_cursor = cursor;
                    }
                    KeyCode::Enter => {
                        let cursor = s.picker_cursor;
                        drop(s);
                        if cursor < devices.len() && pending_connect.is_none() {
                            if let Some(h) = handle.take() {
                                let mut s = app.lock().unwrap();
                                s.end_link();
                                if s.session.is_logging() {
                                    s.stop_logging("switching device");
                                }
                                drop(s);
                                tokio::spawn(async move { let _ = h.disconnect().await; });
                            }
                            connected_idx = None;
                            pending_connect = Some(start_connect(
                                cursor,
                                devices[cursor].clone(),
                                Arc::clone(&app),
                            ));
                        }
                    }
                    _ => {}
                }
                continue;
            }
            Overlay::Machine { row } => {
                let mut s = app.lock().unwrap();
                let next = handle_machine_key(&mut s, row, code);
                s.overlay = next;
                continue;
            }
            Overlay::Calibration(form) => {
                let mut s = app.lock().unwrap();
                let next = handle_calibration_key(&mut s, form, code);
                s.overlay = next;
                continue;
            }
            Overlay::None => {}
        }

        // ── Main-view keys ────────────────────────────────────────────────────
        let mut s = app.lock().unwrap();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => break 'main,

            KeyCode::Tab => {
                s.overlay = Overlay::Picker;
                if let Some(ci) = connected_idx {
                    s.picker_cursor = ci;
                }
            }
            KeyCode::Char('s') => {
                drop(s);
                if pending_scan.is_none() {
                    pending_scan = Some(begin_scan(&app, handle.is_some()));
                }
            }
            KeyCode::Char('d') => {
                if let Some(h) = handle.take() {
                    s.end_link();
                    s.stop_logging("disconnected by operator");
                    s.mode = AppMode::Idle;
                    s.picker_connected_idx = None;
                    s.note("Disconnected");
                    // Never block the main loop on a BLE call.
                    tokio::spawn(async move { let _ = h.disconnect().await; });
                }
                connected_idx = None;
            }

            KeyCode::Char('m') => s.overlay = Overlay::Machine { row: 0 },
            KeyCode::Char('c') => s.overlay = Overlay::Calibration(CalForm::new()),

            KeyCode::Char('l') => s.start_logging(),
            KeyCode::Char('x') => s.stop_logging("operator"),
            KeyCode::Char(c @ '1'..='8') => {
                let idx = c as usize - '1' as usize;
                s.set_state(MACHINE_STATES[idx]);
            }

            KeyCode::F(n @ 1..=3) => {
                let ch = Channel::ALL[usize::from(n - 1)];
                s.plot.toggle(ch);
                s.hover = None;
            }
            KeyCode::Char('r') => s.cycle_rate(),
            KeyCode::Char('e') => s.export(),
            KeyCode::Char('z') => {
                s.plot.clear();
                s.hover = None;
            }
            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    {
        let mut s = app.lock().unwrap();
        s.stop_logging("quit");
        if let Some(path) = &cli.config {
            let saved = Settings {
                name_filter: s.name_filter.clone(),
                sample_rate_hz: s.rate_hz(),
                machine: s.machine.clone(),
                ..settings
            };
            if let Err(e) = saved.save(path) {
                log::error!("Saving settings failed: {e:#}");
            }
        }
    }
    if let Some(h) = handle {
        let _ = h.disconnect().await;
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    Ok(())
}
