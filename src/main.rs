//! telemvis - headless entry point
//!
//! Drives the ingest backend from the command line: replay a CSV log, run
//! the synthetic source, or stream from a serial device. Chart updates are
//! traced rather than drawn; a graphical shell attaches its own
//! [`ChartSurface`] implementations the same way.

use std::time::{Duration, Instant};

use telemvis::backend::{list_ports, TelemetryBackend};
use telemvis::config::{AppConfig, AppState};
use telemvis::csv::{load_csv_file, TimestampUnit};
use telemvis::protocol::{FlightConfig, SourceMode};
use telemvis::render::{ChartSurface, ScaleWindow};
use telemvis::session::SessionContext;
use telemvis::types::SeriesId;
use telemvis::BackendMessage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Chart surface that traces updates instead of drawing them
struct TraceSurface {
    name: String,
    pushes: u64,
}

impl ChartSurface for TraceSurface {
    fn set_data(&mut self, time: &[f64], _columns: &[(SeriesId, &[Option<f64>])]) {
        self.pushes += 1;
        if self.pushes % 20 == 0 {
            tracing::debug!("chart '{}': {} points", self.name, time.len());
        }
    }

    fn set_scale(&mut self, window: ScaleWindow) {
        tracing::debug!(
            "chart '{}': window [{:.2}, {:.2}]",
            self.name,
            window.min,
            window.max
        );
    }
}

fn options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optopt(
        "m",
        "mode",
        "source mode: random, csv, motor-test, hydrostatic-test, rocket-flight",
        "MODE",
    );
    opts.optopt("p", "port", "serial port name", "PORT");
    opts.optopt("f", "file", "CSV file to replay (mode csv)", "FILE");
    opts.optopt("u", "unit", "CSV timestamp unit: ms or s (default ms)", "UNIT");
    opts.optopt(
        "c",
        "columns",
        "column mapping for hydrostatic-test, e.g. pressure,temperature",
        "LIST",
    );
    opts.optopt(
        "g",
        "groups",
        "flight column groups, e.g. pressure,acceleration,gyroscope",
        "LIST",
    );
    opts.optopt("d", "duration", "seconds to run live sources (default 30)", "SECS");
    opts.optflag("l", "list-ports", "list serial ports and exit");
    opts.optflag("h", "help", "print this help");
    opts
}

fn parse_mode(matches: &getopts::Matches) -> anyhow::Result<SourceMode> {
    let mode = matches
        .opt_str("m")
        .unwrap_or_else(|| "random".to_string());
    Ok(match mode.as_str() {
        "motor-test" => SourceMode::MotorTest,
        "hydrostatic-test" => {
            let columns = matches
                .opt_str("c")
                .ok_or_else(|| anyhow::anyhow!("hydrostatic-test needs --columns"))?;
            let columns: Vec<SeriesId> = columns
                .split(',')
                .map(|name| {
                    SeriesId::from_name(name)
                        .ok_or_else(|| anyhow::anyhow!("unknown series '{}'", name))
                })
                .collect::<anyhow::Result<_>>()?;
            SourceMode::hydrostatic_test(columns)?
        }
        "rocket-flight" => {
            let groups = matches.opt_str("g").unwrap_or_default();
            let config = FlightConfig {
                pressure: groups.contains("pressure"),
                acceleration: groups.contains("acceleration"),
                gyroscope: groups.contains("gyroscope"),
                delimiter: ',',
            };
            if !config.any_selected() {
                anyhow::bail!("rocket-flight needs --groups with at least one of pressure, acceleration, gyroscope");
            }
            SourceMode::RocketFlight(config)
        }
        other => anyhow::bail!("'{}' is not a serial mode", other),
    })
}

fn main() -> anyhow::Result<()> {
    // Optional file logging next to stderr, for post-mortems of live sessions
    let file_layer = std::env::var("TELEMVIS_LOG_DIR").ok().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "telemvis.log");
        tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
    });
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,telemvis=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let opts = options();
    let matches = opts.parse(&args[1..])?;
    if matches.opt_present("h") {
        print!("{}", opts.usage("Usage: telemvis [options]"));
        return Ok(());
    }
    if matches.opt_present("l") {
        for port in list_ports() {
            match port.identity {
                Some(id) => println!("{}  [{}]", port.name, id),
                None => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    tracing::info!("Starting telemvis");
    let config = AppConfig::load_or_default();
    let app_state = AppState::load_or_default();

    let (backend, frontend) = TelemetryBackend::new(config.clone(), app_state);
    let backend_handle = std::thread::spawn(move || backend.run());

    let mode = matches.opt_str("m").unwrap_or_else(|| "random".to_string());
    let is_replay = mode == "csv";
    match mode.as_str() {
        "random" => frontend.start_synthetic(),
        "csv" => {
            let file = matches
                .opt_str("f")
                .ok_or_else(|| anyhow::anyhow!("csv mode needs --file"))?;
            let unit = match matches.opt_str("u").as_deref() {
                Some("s") => TimestampUnit::Seconds,
                _ => TimestampUnit::Milliseconds,
            };
            let table = load_csv_file(std::path::Path::new(&file), unit)?;
            tracing::info!("loaded {} rows ({} series)", table.len(), table.series.len());
            frontend.start_replay(table);
        }
        _ => {
            let source_mode = parse_mode(&matches)?;
            frontend.connect(source_mode, matches.opt_str("p"));
        }
    }

    let duration = matches
        .opt_str("d")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(30);
    let deadline = Instant::now() + Duration::from_secs(duration);

    let mut session: Option<SessionContext> = None;
    let mut finished = false;
    while !finished && Instant::now() < deadline {
        for msg in frontend.drain() {
            if let Some(mut ctx) = SessionContext::for_message(&msg) {
                ctx.attach_default_layout(|| {
                    Box::new(TraceSurface {
                        name: "main".to_string(),
                        pushes: 0,
                    })
                });
                tracing::info!("session '{}' started ({} series)", ctx.label, ctx.series.len());
                session = Some(ctx);
            }
            if let Some(ctx) = session.as_mut() {
                ctx.apply(&msg);
            }
            if is_replay && matches!(msg, BackendMessage::ReplayFinished) {
                finished = true;
            }
        }
        if let Some(ctx) = session.as_mut() {
            ctx.render();
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if let Some(ctx) = &session {
        if let Some(stats) = &ctx.stats {
            for series in &ctx.series {
                let max = stats.max(*series);
                if max.is_set() {
                    tracing::info!(
                        "max {}: {:.2} {} @ {:.2}s",
                        series,
                        max.value,
                        series.unit(),
                        max.at_secs.unwrap_or(0.0)
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    frontend.shutdown();
    let _ = backend_handle.join();
    Ok(())
}
