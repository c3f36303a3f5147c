use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use laundryiq_rs::calibration::{compute_factor, CalibrationFactors};
use laundryiq_rs::client::{LiqClient, LiqClientConfig};
use laundryiq_rs::config::{MachineConfig, Settings};
use laundryiq_rs::parse::{LineParser, ReadingAssembler};
use laundryiq_rs::protocol::MACHINE_STATES;
use laundryiq_rs::session::{LoggingSession, RowSink};
use laundryiq_rs::types::{Channel, LiqEvent, LogRow};

/// Headless LaundryIQ logger: connect, record to CSV, annotate from stdin.
#[derive(Parser, Debug)]
#[command(name = "laundryiq", version, about)]
struct Cli {
    /// Settings file (JSON).  Missing file means defaults.
    #[arg(long, default_value = "laundryiq.json")]
    config: PathBuf,
    /// Device name filter (case-insensitive substring).
    #[arg(long)]
    name: Option<String>,
    /// Scan timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Output directory for log files.
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Sample rate in Hz (1, 2, 5 or 10).
    #[arg(long)]
    rate: Option<f64>,
    /// Record a dryer instead of a washer.
    #[arg(long)]
    dryer: bool,
    /// The three machine settings in filename order,
    /// e.g. `--fields Normal Warm High` or `--fields "Damp Dry" Low 20min`.
    #[arg(long, num_args = 3, value_names = ["A", "B", "C"])]
    fields: Option<Vec<String>>,
    /// Only list matching devices and exit.
    #[arg(long)]
    list: bool,
}

// ── Stdin commands ────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Command {
    State(String),
    Calibrate { channel: Channel, multimeter: f64, sensor: f64 },
    Rate(f64),
    Export(PathBuf),
    Send(String),
    Start,
    Stop,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();
    let number = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| format!("'{s}' is not a number"))
    };

    match head.to_lowercase().as_str() {
        "q" | "quit" => Ok(Command::Quit),
        "start" => Ok(Command::Start),
        "stop" => Ok(Command::Stop),
        "state" if !rest.is_empty() => Ok(Command::State(rest.join(" "))),
        "rate" if rest.len() == 1 => number(rest[0]).map(Command::Rate),
        "export" if rest.len() == 1 => Ok(Command::Export(PathBuf::from(rest[0]))),
        "send" if !rest.is_empty() => Ok(Command::Send(rest.join(" "))),
        "cal" if rest.len() == 3 => {
            let channel = Channel::ALL
                .into_iter()
                .find(|c| c.name().eq_ignore_ascii_case(rest[0]))
                .ok_or_else(|| format!("unknown channel '{}'", rest[0]))?;
            Ok(Command::Calibrate {
                channel,
                multimeter: number(rest[1])?,
                sensor: number(rest[2])?,
            })
        }
        word => MACHINE_STATES
            .iter()
            .find(|s| s.eq_ignore_ascii_case(word) && rest.is_empty())
            .map(|s| Command::State((*s).to_owned()))
            .ok_or_else(|| format!("unrecognised command '{line}'")),
    }
}

fn apply_fields(machine: &mut MachineConfig, values: &[String]) {
    let [a, b, c] = match values {
        [a, b, c] => [a.clone(), b.clone(), c.clone()],
        _ => return,
    };
    match machine {
        MachineConfig::Washer(w) => {
            w.cycle = a;
            w.temp = b;
            w.spin = c;
        }
        MachineConfig::Dryer(d) => {
            d.dry_level = a;
            d.temp = b;
            d.time = c;
        }
    }
}

/// Prints every logged row to stdout.
struct ConsoleSink;

impl RowSink for ConsoleSink {
    fn push_row(&mut self, row: &LogRow) {
        let fmt = |v: Option<f64>| v.map_or_else(|| "     –".to_owned(), |v| format!("{v:6.3}"));
        println!(
            "[{:8.3} s] {:8}  CT={} A  H1={} A  H2={} A",
            row.elapsed_time,
            row.state,
            fmt(row.values.ct_clamp),
            fmt(row.values.hall1),
            fmt(row.values.hall2),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=laundryiq_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let cli = Cli::parse();
    let mut settings = Settings::load_or_default(&cli.config)?;
    if let Some(name) = cli.name {
        settings.name_filter = name;
    }
    if let Some(t) = cli.timeout {
        settings.scan_timeout_secs = t;
    }
    if let Some(dir) = cli.dir {
        settings.output_dir = Some(dir);
    }
    if let Some(rate) = cli.rate {
        settings.sample_rate_hz = rate;
    }
    if cli.dryer && matches!(settings.machine, MachineConfig::Washer(_)) {
        settings.machine.toggle_type();
    }
    if let Some(values) = &cli.fields {
        apply_fields(&mut settings.machine, values);
    }
    settings.machine.validate()?;

    let client = LiqClient::new(LiqClientConfig {
        name_filter: settings.name_filter.clone(),
        scan_timeout_secs: settings.scan_timeout_secs,
    });

    if cli.list {
        for d in client.scan_all().await? {
            println!("{:24} {:20} rssi={:?}", d.name, d.id, d.rssi);
        }
        return Ok(());
    }

    // ── Connect ───────────────────────────────────────────────────────────────
    info!("Connecting to LaundryIQ device …");
    let (mut rx, handle) = client.connect().await?;

    // ── Start logging ─────────────────────────────────────────────────────────
    let out_dir = settings.output_dir();
    let mut calibration = CalibrationFactors::default();
    let mut session = LoggingSession::new();
    session.start(&settings.machine, calibration, &out_dir, Local::now())?;

    info!("Commands (type + Enter):");
    info!("  on | off | wash | rinse | spin | end | drying | cooling  – set state");
    info!("  state <label>            – set a custom state");
    info!("  cal <ct_clamp|hall1|hall2> <multimeter> <sensor>  – calibrate");
    info!("  rate <hz>                – change sample rate");
    info!("  export <file.csv>        – write buffered rows to a file");
    info!("  send <text>              – write a line to the device");
    info!("  start | stop             – start / stop logging");
    info!("  q                        – quit\n");

    let mut commands = StdinLines::spawn();

    // ── Main event loop ───────────────────────────────────────────────────────
    let mut parser = LineParser::new();
    let mut assembler = ReadingAssembler::new(settings.sample_rate_hz);
    let mut sink = ConsoleSink;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(LiqEvent::Connected(name)) => info!("✅  Connected to: {name}"),
                Some(LiqEvent::Data(bytes)) => {
                    let update = parser.push(&bytes);
                    if let Some(reading) = assembler.push(&update, Instant::now(), Local::now()) {
                        if let Err(e) = session.on_reading(&reading, &mut sink) {
                            error!("Write failed, stopping session: {e}");
                            session.stop();
                        }
                    }
                }
                Some(LiqEvent::Disconnected) | None => {
                    info!("❌  Disconnected from device.");
                    break;
                }
            },
            line = commands.next() => {
                match parse_command(&line) {
                    Ok(Command::Quit) => {
                        info!("Quit requested.");
                        break;
                    }
                    Ok(Command::Start) => {
                        match session.start(&settings.machine, calibration, &out_dir, Local::now()) {
                            Ok(path) => info!("Logging to {}", path.display()),
                            Err(e) => error!("Start failed: {e}"),
                        }
                    }
                    Ok(Command::Stop) => {
                        if session.stop().is_none() {
                            warn!("Not logging.");
                        }
                    }
                    Ok(Command::State(s)) => match session.set_state(&s, Local::now()) {
                        Ok(change) => info!("State → {} at {:.3} s", change.state, change.elapsed_time),
                        Err(e) => warn!("State not set: {e}"),
                    },
                    Ok(Command::Calibrate { channel, multimeter, sensor }) => {
                        match compute_factor(multimeter, sensor) {
                            Ok(factor) => {
                                calibration.set(channel, factor);
                                session.set_calibration(calibration);
                                info!("{} factor = {factor:.6}", channel.label());
                            }
                            Err(e) => error!("Calibration failed: {e}"),
                        }
                    }
                    Ok(Command::Rate(hz)) => {
                        assembler.set_rate(hz);
                        info!("Sample interval now {:?}", assembler.interval());
                    }
                    Ok(Command::Export(path)) => match session.export(&path) {
                        Ok(n) => info!("Exported {n} row(s) to {}", path.display()),
                        Err(e) => error!("Export failed: {e}"),
                    },
                    Ok(Command::Send(text)) => {
                        if let Err(e) = handle.send_line(&text).await {
                            error!("Send error: {e}");
                        }
                    }
                    Err(msg) => warn!("{msg}"),
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted.");
                break;
            }
        }
    }

    session.stop();
    if handle.is_connected().await {
        handle.disconnect().await.ok();
    }
    info!("Event loop finished – exiting.");
    Ok(())
}

// ── Stdin relay ───────────────────────────────────────────────────────────────

/// Lines typed on stdin, read on an OS thread (StdinLock is not Send).
struct StdinLines {
    rx: UnboundedReceiver<String>,
    open: bool,
}

impl StdinLines {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(l) = line else { break };
                if tx.send(l.trim().to_owned()).is_err() {
                    break;
                }
            }
        });
        Self { rx, open: true }
    }

    /// Next non-empty line.  Once stdin reaches EOF this never resolves, so a
    /// `select!` branch on it simply goes quiet.
    async fn next(&mut self) -> String {
        while self.open {
            match self.rx.recv().await {
                Some(line) if line.is_empty() => continue,
                Some(line) => return line,
                None => {
                    self.open = false;
                    info!("stdin closed; press Ctrl-C to stop.");
                }
            }
        }
        std::future::pending().await
    }
}
