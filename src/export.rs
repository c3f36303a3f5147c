//! Output file naming.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::config::MachineConfig;

/// Build the log filename for a session starting at `start_time`.
///
/// | Machine | Pattern |
/// |---|---|
/// | Washer | `YYYYMMDD_HHMMSS_Washer_<Cycle>_<Temp>_<Spin>.csv` |
/// | Dryer  | `YYYYMMDD_HHMMSS_Dryer_<DryLevel>_<Temp>_<Time>.csv` |
///
/// Only the dryer's dry level loses its spaces (`"Normal Dry"` → `NormalDry`);
/// every other value is written as shown in the settings form.
pub fn build_filename<Tz>(machine: &MachineConfig, start_time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let stamp = start_time.format("%Y%m%d_%H%M%S");
    let kind = machine.type_name();
    match machine {
        MachineConfig::Washer(w) => {
            format!("{stamp}_{kind}_{}_{}_{}.csv", w.cycle, w.temp, w.spin)
        }
        MachineConfig::Dryer(d) => {
            format!("{stamp}_{kind}_{}_{}_{}.csv", compact(&d.dry_level), d.temp, d.time)
        }
    }
}

/// `dir` joined with [`build_filename`].
pub fn output_path<Tz>(dir: &Path, machine: &MachineConfig, start_time: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    dir.join(build_filename(machine, start_time))
}

/// Path for a manual export taken at `now`: the session-style name with an
/// `_export` suffix, so it never collides with the live log file.
pub fn export_path<Tz>(dir: &Path, machine: &MachineConfig, now: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let name = build_filename(machine, now);
    let stem = name.strip_suffix(".csv").unwrap_or(&name);
    dir.join(format!("{stem}_export.csv"))
}

/// `path` with `_n` inserted before the extension: `a/b.csv` → `a/b_2.csv`.
pub fn numbered_path(path: &Path, n: u32) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// The user's download directory, falling back to `~/Downloads` and then
/// the current directory.
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn compact(value: &str) -> String {
    value.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DryerSettings, WasherSettings};
    use chrono::{Local, NaiveDate, Utc};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|d| d.and_hms_opt(h, mi, s))
            .unwrap()
            .and_utc()
    }

    #[test]
    fn washer_filename() {
        let m = MachineConfig::Washer(WasherSettings {
            cycle: "Normal".into(),
            temp: "Warm".into(),
            spin: "High".into(),
        });
        assert_eq!(
            build_filename(&m, &at(2024, 6, 1, 10, 0, 0)),
            "20240601_100000_Washer_Normal_Warm_High.csv"
        );
    }

    #[test]
    fn washer_values_keep_their_spaces() {
        let m = MachineConfig::Washer(WasherSettings {
            cycle: "Heavy Duty".into(),
            temp: "Warm".into(),
            spin: "High".into(),
        });
        assert_eq!(
            build_filename(&m, &at(2024, 6, 1, 10, 0, 0)),
            "20240601_100000_Washer_Heavy Duty_Warm_High.csv"
        );
    }

    #[test]
    fn dryer_filename_drops_spaces_from_dry_level_only() {
        let m = MachineConfig::Dryer(DryerSettings {
            dry_level: "Normal Dry".into(),
            temp: "Extra Low".into(),
            time: "60min".into(),
        });
        assert_eq!(
            build_filename(&m, &at(2023, 12, 31, 23, 59, 7)),
            "20231231_235907_Dryer_NormalDry_Extra Low_60min.csv"
        );
    }

    #[test]
    fn numbered_path_goes_before_extension() {
        assert_eq!(
            numbered_path(Path::new("out/20240601_100000_Washer.csv"), 2),
            PathBuf::from("out/20240601_100000_Washer_2.csv")
        );
        assert_eq!(numbered_path(Path::new("log"), 1), PathBuf::from("log_1"));
    }

    #[test]
    fn local_time_is_formatted_as_wall_clock() {
        let naive = NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap();
        let Some(local) = Local.from_local_datetime(&naive).single() else {
            return; // ambiguous in this zone; nothing to check
        };
        assert!(build_filename(&MachineConfig::default(), &local).starts_with("20240601_100000_"));
    }

    #[test]
    fn export_path_has_suffix() {
        let p = export_path(Path::new("out"), &MachineConfig::default(), &at(2024, 1, 2, 3, 4, 5));
        assert_eq!(
            p,
            PathBuf::from("out/20240102_030405_Washer_Normal_Warm_Medium_export.csv")
        );
    }

    #[test]
    fn output_path_joins_dir() {
        let p = output_path(Path::new("/tmp/logs"), &MachineConfig::default(), &at(2024, 1, 2, 3, 4, 5));
        assert_eq!(
            p,
            PathBuf::from("/tmp/logs/20240102_030405_Washer_Normal_Warm_Medium.csv")
        );
    }
}
