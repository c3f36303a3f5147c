//! Decoders for the LaundryIQ NUS text stream.
//!
//! The firmware prints one or more `KEY<sep>VALUE` pairs per line:
//!
//! ```text
//! CT_A:1.234 HALL1_A:0.402 HALL2_A:0.398\n
//! CT_A = 1.240\n
//! ```
//!
//! | Key | Channel | Separator |
//! |---|---|---|
//! | `CT_A` | CT clamp | any run of `:`, `=`, whitespace |
//! | `HALL1_A` | Hall sensor 1 | same |
//! | `HALL2_A` | Hall sensor 2 | same |
//!
//! Lines can be split across BLE notifications, so [`LineParser`] keeps the
//! trailing partial line until its newline arrives.  Channels are reported
//! independently; [`ReadingAssembler`] merges them and rate-limits the output
//! into full [`SensorReading`]s.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::protocol::CHANNEL_KEYS;
use crate::types::{Channel, ChannelValues, SensorReading};

// ── Line parsing ──────────────────────────────────────────────────────────────

/// Extract the value following `key` in `line`, e.g. `"CT_A:1.5"` → `1.5`.
///
/// Returns `None` when the key is absent, is not followed by at least one
/// separator, or the number does not parse.
fn find_value(line: &str, key: &str) -> Option<f64> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let value_start = rest
        .find(|c: char| !(c == ':' || c == '=' || c.is_whitespace()))
        .unwrap_or(rest.len());
    if value_start == 0 {
        return None;
    }
    let rest = &rest[value_start..];
    let value_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(rest.len());
    rest[..value_end].parse::<f64>().ok()
}

/// Decode every channel present in a single text line.
pub fn parse_line(line: &str) -> ChannelValues {
    let mut values = ChannelValues::default();
    for ch in Channel::ALL {
        values.set(ch, find_value(line, CHANNEL_KEYS[ch.index()]));
    }
    values
}

/// Reassembles newline-terminated lines from BLE notification payloads.
#[derive(Debug, Default)]
pub struct LineParser {
    buffer: Vec<u8>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification payload and decode all lines it completes.
    ///
    /// When a channel appears on several lines, the last one wins.  Invalid
    /// UTF-8 is replaced, not rejected.
    pub fn push(&mut self, data: &[u8]) -> ChannelValues {
        self.buffer.extend_from_slice(data);
        let mut result = ChannelValues::default();

        let Some(last_nl) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return result;
        };
        let complete: Vec<u8> = self.buffer.drain(..=last_nl).collect();

        for raw in complete.split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            result.merge(&parse_line(line));
        }
        result
    }

    /// Bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ── Reading assembly ──────────────────────────────────────────────────────────

/// Merges per-channel updates and emits a [`SensorReading`] at most once per
/// sample interval.
///
/// Channel values carry forward: a reading always holds the most recent value
/// seen for each channel, even if that channel was not in the latest update.
#[derive(Debug)]
pub struct ReadingAssembler {
    pending: ChannelValues,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ReadingAssembler {
    /// Create an assembler emitting at `rate_hz` (clamped to a sane minimum).
    pub fn new(rate_hz: f64) -> Self {
        Self {
            pending: ChannelValues::default(),
            interval: interval_for(rate_hz),
            last_emit: None,
        }
    }

    /// Change the output rate.  Takes effect on the next update.
    pub fn set_rate(&mut self, rate_hz: f64) {
        self.interval = interval_for(rate_hz);
    }

    /// Current sample interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Latest known value per channel.
    pub fn latest(&self) -> &ChannelValues {
        &self.pending
    }

    /// Merge `update` and return a reading if the interval has elapsed.
    ///
    /// `now` drives the rate gate; `wall` is stamped onto the reading.
    pub fn push(
        &mut self,
        update: &ChannelValues,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Option<SensorReading> {
        self.pending.merge(update);
        if self.pending.is_empty() {
            return None;
        }
        let due = self
            .last_emit
            .map(|t| now.saturating_duration_since(t) >= self.interval)
            .unwrap_or(true);
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(SensorReading {
            values: self.pending,
            timestamp: wall,
        })
    }

    /// Forget all channel values and the rate-gate anchor.
    pub fn reset(&mut self) {
        self.pending = ChannelValues::default();
        self.last_emit = None;
    }
}

fn interval_for(rate_hz: f64) -> Duration {
    let rate = if rate_hz.is_finite() && rate_hz > 0.0 {
        rate_hz
    } else {
        crate::protocol::DEFAULT_SAMPLE_RATE_HZ
    };
    Duration::from_secs_f64(1.0 / rate.min(1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_separators() {
        let v = parse_line("CT_A:1.5 HALL1_A = 2.25 HALL2_A\t-0.5");
        assert_eq!(v.ct_clamp, Some(1.5));
        assert_eq!(v.hall1, Some(2.25));
        assert_eq!(v.hall2, Some(-0.5));
    }

    #[test]
    fn key_without_separator_is_ignored() {
        let v = parse_line("CT_A1.5");
        assert_eq!(v.ct_clamp, None);
    }

    #[test]
    fn garbage_value_is_ignored() {
        let v = parse_line("CT_A: abc HALL1_A: 1..2");
        assert_eq!(v.ct_clamp, None);
        assert_eq!(v.hall1, None);
    }

    #[test]
    fn line_split_across_notifications() {
        let mut p = LineParser::new();
        assert!(p.push(b"CT_A:1.").is_empty());
        assert_eq!(p.pending_len(), 7);
        let v = p.push(b"25\nHALL1");
        assert_eq!(v.ct_clamp, Some(1.25));
        assert_eq!(v.hall1, None);
        let v = p.push(b"_A:3\n");
        assert_eq!(v.hall1, Some(3.0));
        assert_eq!(p.pending_len(), 0);
    }

    #[test]
    fn last_line_wins_within_one_notification() {
        let mut p = LineParser::new();
        let v = p.push(b"CT_A:1\r\n\r\nCT_A:2\n");
        assert_eq!(v.ct_clamp, Some(2.0));
    }

    #[test]
    fn assembler_carries_values_forward() {
        let mut a = ReadingAssembler::new(10.0);
        let t0 = Instant::now();
        let wall = Local::now();

        let ct = ChannelValues { ct_clamp: Some(1.0), ..Default::default() };
        let r = a.push(&ct, t0, wall).expect("first update is emitted");
        assert_eq!(r.values.ct_clamp, Some(1.0));
        assert_eq!(r.values.hall1, None);

        let h1 = ChannelValues { hall1: Some(2.0), ..Default::default() };
        let r = a
            .push(&h1, t0 + Duration::from_millis(150), wall)
            .expect("interval elapsed");
        assert_eq!(r.values.ct_clamp, Some(1.0));
        assert_eq!(r.values.hall1, Some(2.0));
    }

    #[test]
    fn assembler_rate_limits() {
        let mut a = ReadingAssembler::new(2.0);
        let t0 = Instant::now();
        let wall = Local::now();
        let u = ChannelValues { hall2: Some(0.5), ..Default::default() };

        let emitted = (0..10)
            .filter(|i| a.push(&u, t0 + Duration::from_millis(100 * i), wall).is_some())
            .count();
        // 0 ms, 500 ms
        assert_eq!(emitted, 2);
    }

    #[test]
    fn assembler_ignores_empty_updates() {
        let mut a = ReadingAssembler::new(10.0);
        assert!(a
            .push(&ChannelValues::default(), Instant::now(), Local::now())
            .is_none());
    }

    #[test]
    fn invalid_rate_falls_back_to_default() {
        let a = ReadingAssembler::new(0.0);
        assert_eq!(a.interval(), Duration::from_millis(100));
    }
}
