//! GATT UUIDs, channel labels, timing constants, and wire-format helpers for
//! LaundryIQ current sensors.
//!
//! The device exposes the Nordic UART Service (NUS).  Sensor values arrive as
//! newline-terminated ASCII text on the TX characteristic; see
//! [`crate::parse`] for the line format.

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Nordic UART Service UUID.
///
/// Checked after service discovery; a peripheral without it is rejected even
/// if its advertised name matched the scan filter.
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

// ── Characteristics ───────────────────────────────────────────────────────────

/// NUS RX characteristic (host → device).  Accepts UTF-8 text commands.
pub const NUS_RX_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// NUS TX characteristic (device → host).  Notifies sensor text lines.
pub const NUS_TX_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

// ── Scan defaults ─────────────────────────────────────────────────────────────

/// Default advertised-name filter.  Matched as a case-insensitive substring.
pub const DEFAULT_NAME_FILTER: &str = "LIQ";

/// Default BLE scan duration in seconds.
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 2;

/// Display name used for peripherals that advertise no local name.
pub const UNKNOWN_DEVICE_NAME: &str = "<unknown>";

// ── Sampling ──────────────────────────────────────────────────────────────────

/// Sample rates (Hz) the operator can choose from.
pub const SAMPLE_RATES_HZ: [f64; 4] = [1.0, 2.0, 5.0, 10.0];

/// Default sample rate in Hz.  The device streams faster than this; readings
/// are merged and emitted at most once per `1 / rate` seconds.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 10.0;

// ── Channels ──────────────────────────────────────────────────────────────────

/// Line prefixes the firmware uses for each channel, in [`CHANNEL_NAMES`] order.
pub const CHANNEL_KEYS: [&str; 3] = ["CT_A", "HALL1_A", "HALL2_A"];

/// Column / series names, in channel order.
pub const CHANNEL_NAMES: [&str; 3] = ["ct_clamp", "hall1", "hall2"];

/// Human-readable channel labels, in channel order.
pub const CHANNEL_LABELS: [&str; 3] = ["CT Clamp", "Hall1", "Hall2"];

// ── Machine states ────────────────────────────────────────────────────────────

/// Annotation labels offered to the operator.  Any string is accepted by the
/// session; these are the ones bound to buttons / number keys.
pub const MACHINE_STATES: [&str; 8] = [
    "On", "Off", "Wash", "Rinse", "Spin", "End", "Drying", "Cooling",
];

/// State stamped on rows until the operator picks another one.
pub const INITIAL_STATE: &str = "Off";

// ── CSV ───────────────────────────────────────────────────────────────────────

/// Header row of every log and export file.
pub const CSV_HEADER: [&str; 6] = [
    "timestamp",
    "ct_clamp",
    "hall1",
    "hall2",
    "state",
    "elapsed_time",
];

// ── Commands ──────────────────────────────────────────────────────────────────

/// Encode a text command for the NUS RX characteristic.
///
/// The firmware reads line-oriented input, so a trailing `'\n'` is appended
/// unless the command already ends with one.
///
/// ```
/// # use laundryiq_rs::protocol::encode_line;
/// assert_eq!(encode_line("rate 10"), b"rate 10\n");
/// assert_eq!(encode_line("x\n"), b"x\n");
/// ```
pub fn encode_line(cmd: &str) -> Vec<u8> {
    let mut bytes = cmd.as_bytes().to_vec();
    if !bytes.ends_with(b"\n") {
        bytes.push(b'\n');
    }
    bytes
}
