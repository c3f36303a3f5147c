//! Machine configuration (used to name output files) and application
//! settings (loaded from an optional JSON file).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{DEFAULT_NAME_FILTER, DEFAULT_SAMPLE_RATE_HZ, DEFAULT_SCAN_TIMEOUT_SECS};

// ── Option lists ──────────────────────────────────────────────────────────────

pub const WASHER_CYCLES: &[&str] = &["Normal", "Delicates", "Heavy Duty", "Quick Wash"];
pub const WASHER_TEMPS: &[&str] = &["Hot", "Warm", "Cold"];
pub const WASHER_SPINS: &[&str] = &["High", "Medium", "Low"];

pub const DRYER_LEVELS: &[&str] = &["Very Dry", "More Dry", "Normal Dry", "Damp Dry"];
pub const DRYER_TEMPS: &[&str] = &["High", "Medium", "Low", "Extra Low"];
pub const DRYER_TIMES: &[&str] = &["60min", "40min", "20min"];

// ── Machine config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasherSettings {
    pub cycle: String,
    pub temp: String,
    pub spin: String,
}

impl Default for WasherSettings {
    fn default() -> Self {
        Self {
            cycle: "Normal".into(),
            temp: "Warm".into(),
            spin: "Medium".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryerSettings {
    pub dry_level: String,
    pub temp: String,
    pub time: String,
}

impl Default for DryerSettings {
    fn default() -> Self {
        Self {
            dry_level: "Normal Dry".into(),
            temp: "Medium".into(),
            time: "40min".into(),
        }
    }
}

/// What is being measured.  Only used to build the output filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "machine_type")]
pub enum MachineConfig {
    Washer(WasherSettings),
    Dryer(DryerSettings),
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig::Washer(WasherSettings::default())
    }
}

/// Problems that block Start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is empty")]
    EmptyField(&'static str),
    #[error("{field} contains a path separator: '{value}'")]
    PathSeparator { field: &'static str, value: String },
}

impl MachineConfig {
    /// `"Washer"` or `"Dryer"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            MachineConfig::Washer(_) => "Washer",
            MachineConfig::Dryer(_) => "Dryer",
        }
    }

    /// Switch between washer and dryer, resetting the settings to defaults.
    pub fn toggle_type(&mut self) {
        *self = match self {
            MachineConfig::Washer(_) => MachineConfig::Dryer(DryerSettings::default()),
            MachineConfig::Dryer(_) => MachineConfig::Washer(WasherSettings::default()),
        };
    }

    /// The three settings as `(label, value, options)`, in filename order.
    pub fn fields(&self) -> [(&'static str, &str, &'static [&'static str]); 3] {
        match self {
            MachineConfig::Washer(w) => [
                ("Cycle", w.cycle.as_str(), WASHER_CYCLES),
                ("Temp", w.temp.as_str(), WASHER_TEMPS),
                ("Spin", w.spin.as_str(), WASHER_SPINS),
            ],
            MachineConfig::Dryer(d) => [
                ("Dry level", d.dry_level.as_str(), DRYER_LEVELS),
                ("Temp", d.temp.as_str(), DRYER_TEMPS),
                ("Time", d.time.as_str(), DRYER_TIMES),
            ],
        }
    }

    fn field_mut(&mut self, field: usize) -> Option<&mut String> {
        match (self, field) {
            (MachineConfig::Washer(w), 0) => Some(&mut w.cycle),
            (MachineConfig::Washer(w), 1) => Some(&mut w.temp),
            (MachineConfig::Washer(w), 2) => Some(&mut w.spin),
            (MachineConfig::Dryer(d), 0) => Some(&mut d.dry_level),
            (MachineConfig::Dryer(d), 1) => Some(&mut d.temp),
            (MachineConfig::Dryer(d), 2) => Some(&mut d.time),
            _ => None,
        }
    }

    /// Move setting `field` (0..3) to the next/previous entry of its option
    /// list, wrapping around.  A value not in the list jumps to the first one.
    pub fn step(&mut self, field: usize, forward: bool) {
        let Some(&(_, _, options)) = self.fields().get(field) else {
            return;
        };
        let Some(value) = self.field_mut(field) else {
            return;
        };
        let n = options.len();
        let next = match options.iter().position(|o| *o == value.as_str()) {
            Some(i) if forward => (i + 1) % n,
            Some(i) => (i + n - 1) % n,
            None => 0,
        };
        *value = options[next].to_owned();
    }

    /// Check that every setting can go into a filename.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (label, value, _) in self.fields() {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(label));
            }
            if value.contains(['/', '\\']) {
                return Err(ConfigError::PathSeparator {
                    field: label,
                    value: value.to_owned(),
                });
            }
        }
        Ok(())
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Application settings.  Every field has a default, so a settings file may
/// list only the keys it wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Case-insensitive substring matched against advertised device names.
    pub name_filter: String,
    pub scan_timeout_secs: u64,
    /// Where log files go.  `None` means the user's download directory.
    pub output_dir: Option<PathBuf>,
    pub sample_rate_hz: f64,
    pub machine: MachineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name_filter: DEFAULT_NAME_FILTER.into(),
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            output_dir: None,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            machine: MachineConfig::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing settings in {}", path.display()))
    }

    /// Read settings from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("writing settings to {}", path.display()))
    }

    /// Resolved output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(crate::export::default_output_dir)
    }
}
