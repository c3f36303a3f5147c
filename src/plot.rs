//! Rolling display buffer behind the live chart.
//!
//! Rendering belongs to the UI; this module owns the data the chart needs:
//! the bounded sample window, per-channel series, axis bounds, hover lookup,
//! and state-change markers.

use std::collections::VecDeque;

use chrono::{DateTime, Local};

use crate::session::RowSink;
use crate::types::{Channel, LogRow, StateChange};

/// Width of the visible time window in seconds.
pub const WINDOW_SECS: f64 = 60.0;

/// Extra room to the right of the newest sample, in seconds.
const LEAD_SECS: f64 = 5.0;

/// Rows retained for display.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Maximum axis-normalised distance at which hovering snaps to a point.
pub const HOVER_RADIUS: f64 = 0.05;

/// The sample under the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct HoverPoint {
    pub channel: Channel,
    pub elapsed: f64,
    pub value: f64,
    pub timestamp: DateTime<Local>,
}

impl HoverPoint {
    /// Tooltip text: channel, elapsed time, current, wall clock.
    pub fn label(&self) -> String {
        format!(
            "{}  t={:.3} s  {:.4} A  @ {}",
            self.channel.label(),
            self.elapsed,
            self.value,
            self.timestamp.format("%H:%M:%S%.3f")
        )
    }
}

#[derive(Debug)]
pub struct PlotBuffer {
    rows: VecDeque<LogRow>,
    markers: VecDeque<StateChange>,
    capacity: usize,
    visible: [bool; 3],
}

impl Default for PlotBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RowSink for PlotBuffer {
    fn push_row(&mut self, row: &LogRow) {
        self.push(row.clone());
    }
}

impl PlotBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            markers: VecDeque::new(),
            capacity,
            visible: [true; 3],
        }
    }

    /// Append a row, evicting the oldest when full.
    pub fn push(&mut self, row: LogRow) {
        while self.rows.len() >= self.capacity {
            self.rows.pop_front();
        }
        self.rows.push_back(row);
    }

    /// Add a state-change marker.  Markers older than the oldest retained row
    /// are dropped.
    pub fn mark_state(&mut self, change: StateChange) {
        self.markers.push_back(change);
        if let Some(oldest) = self.rows.front().map(|r| r.elapsed_time) {
            while self
                .markers
                .front()
                .is_some_and(|m| m.elapsed_time < oldest && self.markers.len() > 1)
            {
                self.markers.pop_front();
            }
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.markers.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&LogRow> {
        self.rows.back()
    }

    // ── Visibility ────────────────────────────────────────────────────────────

    pub fn is_visible(&self, channel: Channel) -> bool {
        self.visible[channel.index()]
    }

    pub fn set_visible(&mut self, channel: Channel, visible: bool) {
        self.visible[channel.index()] = visible;
    }

    pub fn toggle(&mut self, channel: Channel) {
        let v = &mut self.visible[channel.index()];
        *v = !*v;
    }

    // ── Series ────────────────────────────────────────────────────────────────

    /// Every retained `(elapsed, amps)` point of `channel`; missing values are
    /// skipped.
    pub fn series(&self, channel: Channel) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .filter_map(|r| r.values.get(channel).map(|v| (r.elapsed_time, v)))
            .collect()
    }

    /// Points of `channel` inside the current x window.
    pub fn window_series(&self, channel: Channel) -> Vec<(f64, f64)> {
        let [lo, _] = self.x_bounds();
        self.rows
            .iter()
            .filter(|r| r.elapsed_time >= lo)
            .filter_map(|r| r.values.get(channel).map(|v| (r.elapsed_time, v)))
            .collect()
    }

    /// State markers inside the current x window.
    pub fn markers(&self) -> impl Iterator<Item = &StateChange> {
        let [lo, hi] = self.x_bounds();
        self.markers
            .iter()
            .filter(move |m| m.elapsed_time >= lo && m.elapsed_time <= hi)
    }

    // ── Axes ──────────────────────────────────────────────────────────────────

    /// X axis: the last [`WINDOW_SECS`] plus a little lead, never below
    /// `[0, WINDOW_SECS]`.
    pub fn x_bounds(&self) -> [f64; 2] {
        match self.rows.back() {
            None => [0.0, WINDOW_SECS],
            Some(r) => {
                let t = r.elapsed_time;
                [(t - WINDOW_SECS).max(0.0), (t + LEAD_SECS).max(WINDOW_SECS)]
            }
        }
    }

    /// Y axis fitted to visible values in the x window with a 10 % margin.
    ///
    /// Falls back to all retained values when the window has none, and to
    /// `[0, 1]` when there is nothing visible at all.  The lower bound is
    /// clamped at zero unless every value is negative.
    pub fn y_bounds(&self) -> [f64; 2] {
        let lo_t = self.x_bounds()[0];
        let range = self
            .value_range(|r| r.elapsed_time >= lo_t)
            .or_else(|| self.value_range(|_| true));
        let Some((min, max)) = range else {
            return [0.0, 1.0];
        };
        let margin = if max > min { (max - min) * 0.1 } else { 1.0 };
        let upper = max + margin;
        let lower = (min - margin).max(0.0);
        if lower < upper {
            [lower, upper]
        } else {
            [min - margin, upper]
        }
    }

    fn value_range(&self, keep: impl Fn(&LogRow) -> bool) -> Option<(f64, f64)> {
        self.rows
            .iter()
            .filter(|r| keep(r))
            .flat_map(|r| {
                Channel::ALL
                    .into_iter()
                    .filter(|&ch| self.is_visible(ch))
                    .filter_map(|ch| r.values.get(ch))
            })
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    // ── Hover ─────────────────────────────────────────────────────────────────

    /// Nearest visible point to `(x, y)` in data coordinates, measured with
    /// both axes normalised to the current bounds.  `None` when nothing lies
    /// within [`HOVER_RADIUS`].
    pub fn nearest(&self, x: f64, y: f64) -> Option<HoverPoint> {
        let [x0, x1] = self.x_bounds();
        let [y0, y1] = self.y_bounds();
        let (xr, yr) = (x1 - x0, y1 - y0);
        if xr <= 0.0 || yr <= 0.0 {
            return None;
        }

        let mut best: Option<(f64, HoverPoint)> = None;
        for ch in Channel::ALL.into_iter().filter(|&ch| self.is_visible(ch)) {
            for r in &self.rows {
                let Some(v) = r.values.get(ch).filter(|v| v.is_finite()) else {
                    continue;
                };
                let d = (((r.elapsed_time - x) / xr).powi(2) + ((v - y) / yr).powi(2)).sqrt();
                if best.as_ref().map_or(true, |(bd, _)| d < *bd) {
                    best = Some((
                        d,
                        HoverPoint {
                            channel: ch,
                            elapsed: r.elapsed_time,
                            value: v,
                            timestamp: r.timestamp,
                        },
                    ));
                }
            }
        }
        best.filter(|(d, _)| *d < HOVER_RADIUS).map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelValues;

    fn row(t: f64, ct: Option<f64>, h1: Option<f64>, h2: Option<f64>) -> LogRow {
        LogRow {
            timestamp: Local::now(),
            values: ChannelValues { ct_clamp: ct, hall1: h1, hall2: h2 },
            state: "Off".into(),
            elapsed_time: t,
        }
    }

    #[test]
    fn capacity_is_respected() {
        let mut p = PlotBuffer::with_capacity(5);
        for i in 0..12 {
            p.push(row(i as f64, Some(1.0), None, None));
        }
        assert_eq!(p.len(), 5);
        assert_eq!(p.series(Channel::CtClamp).first(), Some(&(7.0, 1.0)));
    }

    #[test]
    fn series_skips_missing_values() {
        let mut p = PlotBuffer::default();
        p.push(row(0.0, Some(1.0), None, Some(3.0)));
        p.push(row(0.1, None, Some(2.0), Some(3.5)));
        assert_eq!(p.series(Channel::CtClamp), vec![(0.0, 1.0)]);
        assert_eq!(p.series(Channel::Hall1), vec![(0.1, 2.0)]);
        assert_eq!(p.series(Channel::Hall2).len(), 2);
    }

    #[test]
    fn x_bounds_scroll_after_one_window() {
        let mut p = PlotBuffer::default();
        assert_eq!(p.x_bounds(), [0.0, 60.0]);
        p.push(row(10.0, Some(1.0), None, None));
        assert_eq!(p.x_bounds(), [0.0, 60.0]);
        p.push(row(100.0, Some(1.0), None, None));
        assert_eq!(p.x_bounds(), [40.0, 105.0]);
        assert_eq!(p.window_series(Channel::CtClamp), vec![(100.0, 1.0)]);
    }

    #[test]
    fn y_bounds_track_visible_window() {
        let mut p = PlotBuffer::default();
        assert_eq!(p.y_bounds(), [0.0, 1.0]);

        p.push(row(0.0, Some(50.0), Some(2.0), None));
        p.push(row(100.0, Some(4.0), Some(2.0), None));
        // The 50 A spike scrolled out of the window.
        let [lo, hi] = p.y_bounds();
        assert!((lo - 1.8).abs() < 1e-9 && (hi - 4.2).abs() < 1e-9, "{lo} {hi}");

        p.set_visible(Channel::CtClamp, false);
        assert_eq!(p.y_bounds(), [1.0, 3.0]);
    }

    #[test]
    fn y_bounds_handle_negative_values() {
        let mut p = PlotBuffer::default();
        p.push(row(0.0, Some(-5.0), None, None));
        let [lo, hi] = p.y_bounds();
        assert!(lo < hi);
        assert_eq!([lo, hi], [-6.0, -4.0]);
    }

    #[test]
    fn nearest_snaps_only_when_close() {
        let mut p = PlotBuffer::default();
        p.push(row(10.0, Some(2.0), Some(1.0), None));
        p.push(row(11.0, Some(2.2), Some(1.1), None));

        let hit = p.nearest(10.9, 2.15).expect("close to ct point");
        assert_eq!(hit.channel, Channel::CtClamp);
        assert_eq!(hit.elapsed, 11.0);
        assert!(hit.label().starts_with("CT Clamp  t=11.000 s  2.2000 A"));

        assert!(p.nearest(45.0, 0.0).is_none());

        p.toggle(Channel::CtClamp);
        let hit = p.nearest(10.9, 2.15);
        assert!(hit.map_or(true, |h| h.channel != Channel::CtClamp));
    }

    #[test]
    fn markers_follow_the_window() {
        let mut p = PlotBuffer::default();
        let change = |t: f64, s: &str| StateChange {
            timestamp: Local::now(),
            state: s.into(),
            elapsed_time: t,
        };
        p.push(row(0.0, Some(1.0), None, None));
        p.mark_state(change(0.0, "Wash"));
        p.push(row(90.0, Some(1.0), None, None));
        p.mark_state(change(85.0, "Rinse"));
        let shown: Vec<&str> = p.markers().map(|m| m.state.as_str()).collect();
        assert_eq!(shown, ["Rinse"]);
    }
}
