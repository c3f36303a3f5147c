//! Per-channel scale factors converting raw sensor units to amps.
//!
//! A factor is found by measuring the same load with a reference multimeter
//! and the sensor: `factor = multimeter / sensor`.  Factors live for the
//! process lifetime only.

use thiserror::Error;

use crate::types::{Channel, ChannelValues};

/// Reasons a calibration factor cannot be computed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("sensor reading cannot be zero")]
    ZeroSensorReading,
    #[error("readings must be finite numbers")]
    NonFinite,
    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),
}

/// Compute `multimeter_reading / sensor_reading`.
///
/// ```
/// # use laundryiq_rs::calibration::compute_factor;
/// assert_eq!(compute_factor(5.0, 4.0).unwrap(), 1.25);
/// assert!(compute_factor(5.0, 0.0).is_err());
/// ```
pub fn compute_factor(multimeter_reading: f64, sensor_reading: f64) -> Result<f64, CalibrationError> {
    if !multimeter_reading.is_finite() || !sensor_reading.is_finite() {
        return Err(CalibrationError::NonFinite);
    }
    if sensor_reading == 0.0 {
        return Err(CalibrationError::ZeroSensorReading);
    }
    Ok(multimeter_reading / sensor_reading)
}

/// Text-field front end for [`compute_factor`] (the "MM" and "Sen" inputs).
pub fn parse_and_compute(multimeter: &str, sensor: &str) -> Result<f64, CalibrationError> {
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| CalibrationError::InvalidNumber(s.trim().to_owned()))
    };
    compute_factor(parse(multimeter)?, parse(sensor)?)
}

/// The three channel multipliers.  All default to `1.0` (no adjustment).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFactors {
    pub ct_clamp: f64,
    pub hall1: f64,
    pub hall2: f64,
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        Self {
            ct_clamp: 1.0,
            hall1: 1.0,
            hall2: 1.0,
        }
    }
}

impl CalibrationFactors {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::CtClamp => self.ct_clamp,
            Channel::Hall1 => self.hall1,
            Channel::Hall2 => self.hall2,
        }
    }

    pub fn set(&mut self, channel: Channel, factor: f64) {
        match channel {
            Channel::CtClamp => self.ct_clamp = factor,
            Channel::Hall1 => self.hall1 = factor,
            Channel::Hall2 => self.hall2 = factor,
        }
    }

    /// Raw sensor value → amps.
    pub fn apply(&self, raw_value: f64, channel: Channel) -> f64 {
        raw_value * self.get(channel)
    }

    /// Amps → raw sensor value.  Inverse of [`apply`](Self::apply).
    pub fn remove(&self, value: f64, channel: Channel) -> f64 {
        value / self.get(channel)
    }

    /// Calibrate every present channel of `raw`.
    pub fn apply_all(&self, raw: &ChannelValues) -> ChannelValues {
        let mut out = ChannelValues::default();
        for ch in Channel::ALL {
            out.set(ch, raw.get(ch).map(|v| self.apply(v, ch)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sensor_reading_is_an_error() {
        assert_eq!(
            compute_factor(3.2, 0.0),
            Err(CalibrationError::ZeroSensorReading)
        );
        assert_eq!(
            compute_factor(3.2, -0.0),
            Err(CalibrationError::ZeroSensorReading)
        );
    }

    #[test]
    fn non_finite_inputs_are_rejected() {
        assert_eq!(compute_factor(f64::NAN, 1.0), Err(CalibrationError::NonFinite));
        assert_eq!(compute_factor(1.0, f64::INFINITY), Err(CalibrationError::NonFinite));
    }

    #[test]
    fn apply_then_divide_recovers_raw() {
        let readings = [(4.8, 5.1), (0.37, 0.41), (12.0, 9.75), (1.0, 3.0)];
        let raws = [0.0, 0.013, 1.5, 42.42, -3.3];
        for (mm, sen) in readings {
            let factor = compute_factor(mm, sen).unwrap();
            let mut cal = CalibrationFactors::default();
            cal.set(Channel::Hall1, factor);
            for raw in raws {
                let amps = cal.apply(raw, Channel::Hall1);
                assert!((amps / factor - raw).abs() < 1e-9);
                assert!((cal.remove(amps, Channel::Hall1) - raw).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn parse_and_compute_reports_bad_input() {
        assert_eq!(parse_and_compute(" 10 ", "4").unwrap(), 2.5);
        assert_eq!(
            parse_and_compute("ten", "4"),
            Err(CalibrationError::InvalidNumber("ten".into()))
        );
        assert_eq!(
            parse_and_compute("1", "0"),
            Err(CalibrationError::ZeroSensorReading)
        );
    }

    #[test]
    fn apply_all_skips_missing_channels() {
        let cal = CalibrationFactors { ct_clamp: 2.0, hall1: 3.0, hall2: 4.0 };
        let raw = ChannelValues { ct_clamp: Some(1.0), hall1: None, hall2: Some(0.5) };
        let out = cal.apply_all(&raw);
        assert_eq!(out.ct_clamp, Some(2.0));
        assert_eq!(out.hall1, None);
        assert_eq!(out.hall2, Some(2.0));
    }
}
