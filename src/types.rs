use chrono::{DateTime, Local};

use crate::protocol::{CHANNEL_LABELS, CHANNEL_NAMES};

/// One of the three current-sensing inputs on a LaundryIQ board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Current-transformer clamp (inductive, AC only).
    CtClamp,
    /// First Hall-effect sensor.
    Hall1,
    /// Second Hall-effect sensor.
    Hall2,
}

impl Channel {
    /// All channels in column order.
    pub const ALL: [Channel; 3] = [Channel::CtClamp, Channel::Hall1, Channel::Hall2];

    /// Position of this channel in [`Channel::ALL`] and the protocol tables.
    pub fn index(self) -> usize {
        match self {
            Channel::CtClamp => 0,
            Channel::Hall1 => 1,
            Channel::Hall2 => 2,
        }
    }

    /// CSV column / series name, e.g. `"ct_clamp"`.
    pub fn name(self) -> &'static str {
        CHANNEL_NAMES[self.index()]
    }

    /// Display label, e.g. `"CT Clamp"`.
    pub fn label(self) -> &'static str {
        CHANNEL_LABELS[self.index()]
    }
}

/// Latest value per channel.  `None` means the device has not reported that
/// channel yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelValues {
    pub ct_clamp: Option<f64>,
    pub hall1: Option<f64>,
    pub hall2: Option<f64>,
}

impl ChannelValues {
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::CtClamp => self.ct_clamp,
            Channel::Hall1 => self.hall1,
            Channel::Hall2 => self.hall2,
        }
    }

    pub fn set(&mut self, channel: Channel, value: Option<f64>) {
        match channel {
            Channel::CtClamp => self.ct_clamp = value,
            Channel::Hall1 => self.hall1 = value,
            Channel::Hall2 => self.hall2 = value,
        }
    }

    /// Overwrite channels that are present in `update`, keep the rest.
    pub fn merge(&mut self, update: &ChannelValues) {
        for ch in Channel::ALL {
            if let Some(v) = update.get(ch) {
                self.set(ch, Some(v));
            }
        }
    }

    /// `true` when no channel carries a value.
    pub fn is_empty(&self) -> bool {
        Channel::ALL.iter().all(|&ch| self.get(ch).is_none())
    }
}

/// A raw (uncalibrated) sample of all three channels.
///
/// Produced by [`crate::parse::ReadingAssembler`] from the BLE stream and
/// consumed immediately by [`crate::session::LoggingSession::on_reading`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub values: ChannelValues,
    /// Wall-clock time the reading was assembled.
    pub timestamp: DateTime<Local>,
}

/// One row of the output CSV.  Values are already calibrated (amps).
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: DateTime<Local>,
    pub values: ChannelValues,
    /// Operator annotation in effect when the row was created.
    pub state: String,
    /// Seconds since the session started.
    pub elapsed_time: f64,
}

/// A manual state annotation, journaled by the session and drawn as a marker
/// on the plot.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub timestamp: DateTime<Local>,
    pub state: String,
    pub elapsed_time: f64,
}

/// All events emitted by [`crate::client::LiqClient`].
///
/// Consumers receive these through the `mpsc::Receiver` returned by
/// [`crate::client::LiqClient::connect`] or
/// [`crate::client::LiqClient::connect_to`].
#[derive(Debug, Clone)]
pub enum LiqEvent {
    /// The BLE link is up and the NUS TX characteristic is subscribed.
    /// Carries the advertised device name.
    Connected(String),
    /// Raw bytes of one NUS TX notification, in arrival order.
    ///
    /// A notification may hold several lines or only part of one; feed it to
    /// [`crate::parse::LineParser::push`].
    Data(Vec<u8>),
    /// The link was lost (device powered off, out of range, or disconnected
    /// by the host).  No further events follow.
    Disconnected,
}
