//! # laundryiq-rs
//!
//! Async Rust library and terminal UI for recording current draw from
//! LaundryIQ sensor boards over Bluetooth Low Energy.
//!
//! A LaundryIQ board clamps onto a washer or dryer supply and reports three
//! channels as text lines over the Nordic UART Service:
//!
//! | Channel | Line key | Sensor |
//! |---|---|---|
//! | `ct_clamp` | `CT_A` | current-transformer clamp |
//! | `hall1` | `HALL1_A` | Hall-effect sensor 1 |
//! | `hall2` | `HALL2_A` | Hall-effect sensor 2 |
//!
//! Each logged row carries the wall-clock timestamp, the three calibrated
//! values, the operator's machine-state label (`Wash`, `Rinse`, `Spin`, …)
//! and the seconds since the session started.
//!
//! ## Quick start
//!
//! ```no_run
//! use laundryiq_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = LiqClient::new(LiqClientConfig::default());
//!     let (mut rx, _handle) = client.connect().await?;
//!
//!     let mut parser = LineParser::new();
//!     let mut assembler = ReadingAssembler::new(10.0);
//!     let mut session = LoggingSession::new();
//!     let mut plot = PlotBuffer::default();
//!     session.start(
//!         &MachineConfig::default(),
//!         CalibrationFactors::default(),
//!         std::path::Path::new("."),
//!         chrono::Local::now(),
//!     )?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             LiqEvent::Data(bytes) => {
//!                 let update = parser.push(&bytes);
//!                 let now = std::time::Instant::now();
//!                 if let Some(r) = assembler.push(&update, now, chrono::Local::now()) {
//!                     session.on_reading(&r, &mut plot)?;
//!                 }
//!             }
//!             LiqEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//!     session.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`client`] | BLE scanning, connecting, and the [`client::LiqHandle`] API |
//! | [`types`] | Channel, reading, row and event types |
//! | [`protocol`] | GATT UUIDs, channel tables, states, and CSV header |
//! | [`parse`] | Text-line decoding and sample-rate gating |
//! | [`calibration`] | Per-channel multimeter/sensor scale factors |
//! | [`config`] | Machine configuration and the settings file |
//! | [`export`] | Output filename construction |
//! | [`session`] | The logging session and CSV writer |
//! | [`plot`] | Rolling chart buffer: series, bounds, hover, markers |

pub mod calibration;
pub mod client;
pub mod config;
pub mod export;
pub mod parse;
pub mod plot;
pub mod protocol;
pub mod session;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
///
/// ```no_run
/// use laundryiq_rs::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let devices = LiqClient::new(LiqClientConfig::default()).scan_all().await?;
/// for d in &devices {
///     println!("{}  {}  {:?}", d.name, d.id, d.rssi);
/// }
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::client::{LiqClient, LiqClientConfig, LiqDevice, LiqHandle};

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::types::{Channel, ChannelValues, LiqEvent, LogRow, SensorReading, StateChange};

    // ── Pipeline ──────────────────────────────────────────────────────────────
    pub use crate::parse::{LineParser, ReadingAssembler};
    pub use crate::plot::{HoverPoint, PlotBuffer};
    pub use crate::session::{LoggingSession, RowSink, SessionError, SessionSummary};

    // ── Configuration ─────────────────────────────────────────────────────────
    pub use crate::calibration::{compute_factor, CalibrationError, CalibrationFactors};
    pub use crate::config::{MachineConfig, Settings};
    pub use crate::export::build_filename;

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{MACHINE_STATES, SAMPLE_RATES_HZ};
}
