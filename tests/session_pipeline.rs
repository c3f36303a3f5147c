//! End-to-end: notification bytes → parser → rate gate → session → CSV and
//! chart.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Local, TimeZone};

use laundryiq_rs::config::{DryerSettings, MachineConfig};
use laundryiq_rs::prelude::*;
use laundryiq_rs::protocol::CSV_HEADER;

fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    let header = rdr.headers().unwrap().iter().map(str::to_owned).collect();
    let rows = rdr
        .records()
        .map(|r| r.unwrap().iter().map(str::to_owned).collect())
        .collect();
    (header, rows)
}

#[test]
fn washer_cycle_is_logged_with_states_and_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = Local.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).single().unwrap();
    let i0 = Instant::now();

    let mut parser = LineParser::new();
    let mut assembler = ReadingAssembler::new(2.0);
    let mut session = LoggingSession::new();
    let mut plot = PlotBuffer::default();

    let mut cal = CalibrationFactors::default();
    cal.set(Channel::CtClamp, compute_factor(5.0, 4.0).unwrap());

    let path = session
        .start(&MachineConfig::default(), cal, dir.path(), t0)
        .unwrap();
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "20240601_100000_Washer_Normal_Warm_Medium.csv"
    );

    // 10 notifications per second for 3 s; lines split across packets.
    let mut emitted = 0;
    for tick in 0..30u64 {
        let ms = tick * 100;
        let wall = t0 + ChronoDuration::milliseconds(ms as i64);
        let now = i0 + Duration::from_millis(ms);

        if tick == 10 {
            session.set_state("Wash", wall).unwrap();
        }
        if tick == 20 {
            let change = session.set_state("Spin", wall).unwrap();
            plot.mark_state(change);
        }

        let text = format!("CT_A: {}\nHALL1_A: 1.0\nHAL", 0.8 + tick as f64 * 0.01);
        let first = parser.push(text.as_bytes());
        let second = parser.push(b"L2_A: 0.25\n");
        let mut update = first;
        update.merge(&second);
        if let Some(reading) = assembler.push(&update, now, wall) {
            session.on_reading(&reading, &mut plot).unwrap();
            emitted += 1;
        }
    }

    // 2 Hz over 3 s.
    assert_eq!(emitted, 6);
    assert_eq!(plot.len(), 6);

    let summary = session.stop().unwrap();
    assert_eq!(summary.rows, 6);
    assert_eq!(summary.state_changes, 2);

    let (header, rows) = read_csv(&path);
    assert_eq!(header, CSV_HEADER);
    assert_eq!(rows.len(), 6);

    let states: Vec<&str> = rows.iter().map(|r| r[4].as_str()).collect();
    assert_eq!(states, ["Off", "Off", "Wash", "Wash", "Spin", "Spin"]);

    let elapsed: Vec<f64> = rows.iter().map(|r| r[5].parse().unwrap()).collect();
    assert_eq!(elapsed, [0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    assert_eq!(rows[1][5], "0.500");

    // CT clamp scaled by 1.25; other channels untouched.
    let ct: f64 = rows[0][1].parse().unwrap();
    assert!((ct - 0.8 * 1.25).abs() < 1e-9);
    assert_eq!(rows[0][2], "1.0");
    assert_eq!(rows[0][3], "0.25");

    let markers: Vec<&str> = plot.markers().map(|m| m.state.as_str()).collect();
    assert_eq!(markers, ["Spin"]);
}

#[test]
fn missing_channels_are_empty_cells() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = Local::now();
    let mut session = LoggingSession::new();
    let mut parser = LineParser::new();
    let mut assembler = ReadingAssembler::new(10.0);
    let machine = MachineConfig::Dryer(DryerSettings::default());
    let path = session
        .start(&machine, CalibrationFactors::default(), dir.path(), t0)
        .unwrap();
    assert!(path
        .to_str()
        .unwrap()
        .ends_with("_Dryer_NormalDry_Medium_40min.csv"));

    let update = parser.push(b"HALL1_A=2.5\n");
    let reading = assembler.push(&update, Instant::now(), t0).unwrap();
    session.on_reading(&reading, &mut Vec::<LogRow>::new()).unwrap();
    session.stop();

    let (_, rows) = read_csv(&path);
    assert_eq!(rows[0][1], "");
    assert_eq!(rows[0][2], "2.5");
    assert_eq!(rows[0][3], "");
    assert_eq!(rows[0][4], "Off");
}

#[test]
fn readings_before_start_and_after_stop_are_not_logged() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = Local::now();
    let mut session = LoggingSession::new();
    let mut plot = PlotBuffer::default();
    let reading = SensorReading {
        values: ChannelValues {
            ct_clamp: Some(1.0),
            hall1: None,
            hall2: None,
        },
        timestamp: t0,
    };

    assert!(session.on_reading(&reading, &mut plot).unwrap().is_none());
    session
        .start(&MachineConfig::default(), CalibrationFactors::default(), dir.path(), t0)
        .unwrap();
    assert!(session.on_reading(&reading, &mut plot).unwrap().is_some());
    session.stop();
    assert!(session.on_reading(&reading, &mut plot).unwrap().is_none());
    assert_eq!(plot.len(), 1);
    assert!(session.set_state("Wash", t0).is_err());
}
