//! Trackside ground station
//!
//! Command-line daemon around the trackside-link library. It adds:
//! - TOML configuration with command-line overrides
//! - One worker thread per transport (radio, TCP, UDP, discovery)
//! - Ctrl-C shutdown that joins every worker
//! - A console report of live signals and device health
//! - A clock-sync self check over a simulated link

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use trackside_link::clock::MonotonicClock;
use trackside_link::net::{DiscoveryResponder, LineHandler, TcpServer, UdpListener};
use trackside_link::radio::run_supervised;
use trackside_link::sync::{ChannelTransport, SyncClient, SyncServer};
use trackside_link::transport::SerialTransport;
use trackside_link::{LinkEvent, SyncConfig, TelemetryHub};

mod config;
mod report;

use config::AppConfig;

/// Trackside ground station - LoRa and LAN telemetry receiver
#[derive(Parser, Debug)]
#[command(name = "trackside")]
#[command(about = "Receive race telemetry over LoRa, TCP and UDP", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial port of the LoRa module (overrides radio.port)
    #[arg(short, long, value_name = "PATH")]
    port: Option<String>,

    /// Serial baud rate (overrides radio.baud)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Do not open the radio even if a port is configured
    #[arg(long)]
    no_radio: bool,

    /// Arm the timing gate at startup
    #[arg(long)]
    arm_gate: bool,

    /// Print reports and events as JSON lines
    #[arg(long)]
    json: bool,

    /// Run the clock-sync exchange over a simulated link and exit
    #[arg(long)]
    sync_check: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Trackside ground station v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using link library v{}", trackside_link::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    if args.sync_check {
        return sync_check(&config.sync);
    }

    run(config, &args)
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(port) = &args.port {
        config.radio.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.radio.baud = baud;
    }
    if args.no_radio {
        config.radio.port = None;
    }
    if args.json {
        config.report.json = true;
    }
}

/// Ground station main loop
fn run(config: AppConfig, args: &Args) -> Result<()> {
    let link_config = config.link_config();
    let clock = MonotonicClock::shared();
    let (events, rx) = crossbeam_channel::unbounded();
    let hub = Arc::new(TelemetryHub::new(&link_config, clock.clone(), events));

    if let Some(path) = &config.signals.name_cache {
        if path.exists() {
            let loaded = hub
                .names()
                .load_from(path)
                .with_context(|| format!("Failed to load name cache: {:?}", path))?;
            log::info!("Loaded {} signal names from {:?}", loaded, path);
        }
    }

    if args.arm_gate {
        hub.arm_gate();
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            log::info!("Shutdown requested");
            running.store(false, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let handler: Arc<dyn LineHandler> = hub.clone();

    let tcp = TcpServer::bind(config.network.tcp_addr())
        .with_context(|| format!("Failed to bind TCP {}", config.network.tcp_addr()))?;
    workers.push(spawn_worker("tcp", {
        let handler = Arc::clone(&handler);
        let running = Arc::clone(&running);
        move || tcp.run(handler, running)
    })?);

    let udp = UdpListener::bind(config.network.udp_addr())
        .with_context(|| format!("Failed to bind UDP {}", config.network.udp_addr()))?;
    workers.push(spawn_worker("udp", {
        let handler = Arc::clone(&handler);
        let running = Arc::clone(&running);
        move || udp.run(handler, running)
    })?);

    if config.network.discovery {
        let responder = DiscoveryResponder::bind(
            config.network.discovery_addr(),
            config.network.tcp_port,
            config.network.udp_port,
        )
        .with_context(|| {
            format!("Failed to bind discovery {}", config.network.discovery_addr())
        })?;
        workers.push(spawn_worker("discovery", {
            let running = Arc::clone(&running);
            move || responder.run(running)
        })?);
    }

    match config.radio.port.clone() {
        Some(port) => {
            let baud = config.radio.baud;
            let radio = config.radio.link.clone();
            let hub = Arc::clone(&hub);
            let running = Arc::clone(&running);
            let clock = clock.clone();
            workers.push(spawn_worker("radio", move || {
                let read_timeout = radio.poll_interval();
                run_supervised(
                    || SerialTransport::open(&port, baud, read_timeout),
                    &radio,
                    hub.tx().clone(),
                    clock,
                    &running,
                    &*hub,
                )
            })?);
        }
        None => log::info!("No radio port configured, LAN only"),
    }

    consume_events(&hub, &rx, &config, &running)?;

    log::info!("Waiting for {} workers", workers.len());
    for worker in workers {
        if worker.join().is_err() {
            log::error!("A worker thread panicked");
        }
    }

    if let Some(path) = &config.signals.name_cache {
        hub.names()
            .save_to(path)
            .with_context(|| format!("Failed to save name cache: {:?}", path))?;
        log::info!("Saved {} signal names to {:?}", hub.names().len(), path);
    }

    Ok(())
}

fn spawn_worker<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("Failed to spawn {} worker", name))
}

/// Print events as they arrive and a status block every report interval
fn consume_events(
    hub: &TelemetryHub,
    rx: &crossbeam_channel::Receiver<LinkEvent>,
    config: &AppConfig,
    running: &AtomicBool,
) -> Result<()> {
    let json = config.report.json;
    let interval = config.report.interval();
    let stale_after = config.signals.stale_after();
    let mut next_report = interval.map(|i| Instant::now() + i);

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => println!("{}", report::render_event(&event, json)?),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let (Some(due), Some(interval)) = (next_report, interval) {
            if Instant::now() >= due {
                let status = report::render_status(
                    chrono::Utc::now(),
                    &hub.snapshot(stale_after),
                    &hub.devices().devices(),
                    json,
                )?;
                println!("{}", status);
                next_report = Some(due + interval);
            }
        }
    }
    Ok(())
}

/// Exchange sync frames with an in-process server over a lossy, slow link
fn sync_check(config: &SyncConfig) -> Result<()> {
    let (client_end, server_end) = ChannelTransport::pair();
    let latency = config.simulated_latency();

    // Separate clocks so the estimate has a real offset to find
    let server = SyncServer::new(server_end.with_latency(latency), MonotonicClock::shared());
    thread::sleep(Duration::from_millis(25));
    let mut client = SyncClient::new(
        client_end.with_latency(latency).with_drop_every(5),
        MonotonicClock::shared(),
    );

    let running = Arc::new(AtomicBool::new(true));
    let server_thread = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("sync-server".to_string())
            .spawn(move || server.serve(&running, Duration::from_millis(50)))
            .context("Failed to spawn sync server")?
    };

    let estimate = client.sync(config.exchanges, config.timeout())?;
    running.store(false, Ordering::SeqCst);
    match server_thread.join() {
        Ok(Ok(served)) => log::debug!("Sync server answered {} requests", served),
        Ok(Err(e)) => log::warn!("Sync server stopped: {}", e),
        Err(_) => log::error!("Sync server panicked"),
    }

    println!(
        "{}/{} exchanges valid",
        estimate.samples.len(),
        estimate.attempts
    );
    match (estimate.offset_us, estimate.delay_us) {
        (Some(offset), Some(delay)) => {
            println!("offset: {} us", offset);
            println!("delay:  {} us", delay);
            Ok(())
        }
        _ => anyhow::bail!("every sync exchange timed out"),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let args = Args::parse_from([
            "trackside",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "57600",
            "--json",
        ]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.radio.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.radio.baud, 57600);
        assert!(config.report.json);
    }

    #[test]
    fn test_no_radio_clears_port() {
        let args = Args::parse_from(["trackside", "-p", "/dev/ttyUSB0", "--no-radio"]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &args);
        assert!(config.radio.port.is_none());
    }
}
