//! UWB Console - host-side runner for the UWB control plane
//!
//! Runs the command console of a UWB board against the simulated radio,
//! ranging stack and UCI core from `uwb-sim`.
//!
//! # Architecture
//!
//! ```text
//! stdin/stdout ──link──► RxSender(USB)  ──┐
//! serial port  ──link──► RxSender(UART) ──┼─► Controller (blocking thread) ──► TxRing
//!                                         │                                     │
//!        ChannelSink(USB/UART) ◄── flush task ◄──────────────────────────────────┘
//! ```
//!
//! Logs go to stderr so stdout stays a clean transport.

mod link;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uwb_ctl::flush::{drain, run_flush_task};
use uwb_ctl::{
    rx_channel, ConfigStore, ControlConfig, ControlHandle, Controller, ErrorReporter, JsonFileStore, Registry,
    SystemContext, TransportKind, TxRing,
};
use uwb_detect::{probe_port, PortScanner, ProbeConfig};
use uwb_sim::{run_traffic_task, MemoryStore, SimBoard};

use crate::link::{run_link_task, ChannelSink, LinkEnd};

/// Time allowed for blocked stdin reads once everything else stopped
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "uwb-console", version, about = "UWB command console on a simulated board")]
struct Args {
    /// Also serve the console on this serial port (the UART transport)
    #[arg(long)]
    port: Option<String>,

    /// Baud rate for --port and --probe
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Stored configuration file, JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep the configuration in memory only
    #[arg(long, conflicts_with = "config")]
    volatile: bool,

    /// Engine settings file, JSON
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Feed the simulated receiver a frame every N ms
    #[arg(long, value_name = "MS")]
    sim_traffic: Option<u64>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Ask the console on a serial port to identify itself and exit
    #[arg(long, value_name = "PORT")]
    probe: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "uwb_console=info,uwb_ctl=info,uwb_wire=info,uwb_sim=info,uwb_detect=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_ports {
        return list_ports();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start the async runtime")?;

    let result = match args.probe.clone() {
        Some(port) => runtime.block_on(probe(&port, args.baud)),
        None => runtime.block_on(run(args)),
    };
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

fn list_ports() -> Result<()> {
    let ports = PortScanner::new()
        .enumerate_ports()
        .context("cannot enumerate serial ports")?;
    for port in ports {
        println!("{:<24} {:?} {}", port.port, port.classification(), port.hint());
    }
    Ok(())
}

async fn probe(port: &str, baud: u32) -> Result<()> {
    let info = probe_port(port, baud, &ProbeConfig::default())
        .await
        .with_context(|| format!("no UWB console answered on {}", port))?;
    println!("{}: {} running {} (version {})", port, info.device, info.current_app, info.version);
    Ok(())
}

fn load_engine(path: Option<&PathBuf>) -> Result<ControlConfig> {
    let Some(path) = path else {
        return Ok(ControlConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let engine: ControlConfig =
        serde_json::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))?;
    if !engine.tx_capacity.is_power_of_two() {
        bail!("tx_capacity must be a power of two, got {}", engine.tx_capacity);
    }
    Ok(engine)
}

fn open_store(args: &Args) -> Result<Box<dyn ConfigStore>> {
    if args.volatile {
        return Ok(Box::new(MemoryStore::new()));
    }
    let path = match &args.config {
        Some(path) => path.clone(),
        None => JsonFileStore::default_path().context("no configuration directory, use --config or --volatile")?,
    };
    info!("configuration file {}", path.display());
    Ok(Box::new(JsonFileStore::new(path)))
}

async fn run(args: Args) -> Result<()> {
    let engine = load_engine(args.engine.as_ref())?;
    let store = open_store(&args)?;

    let sim = SimBoard::new();
    let errors = Arc::new(ErrorReporter::new());
    let tx = Arc::new(TxRing::new(engine.tx_capacity, engine.chunk_size, Arc::clone(&errors)));
    let (control, signals) = ControlHandle::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut ports = Vec::new();
    let mut links: Vec<JoinHandle<LinkEnd>> = Vec::new();

    // stdin/stdout play the USB CDC port
    {
        let (sender, port) = rx_channel(TransportKind::Usb, control.clone(), Arc::clone(&errors));
        let (sink, outgoing) = ChannelSink::new();
        tx.set_usb_sink(Some(Box::new(sink)));
        ports.push(port);
        let stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
        links.push(tokio::spawn(run_link_task("stdio", stdio, sender, outgoing, shutdown_rx.clone())));
    }

    if let Some(name) = &args.port {
        let serial = tokio_serial::new(name, args.baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("cannot open {}", name))?;
        let (sender, port) = rx_channel(TransportKind::Uart, control.clone(), Arc::clone(&errors));
        let (sink, outgoing) = ChannelSink::new();
        tx.set_uart_sink(Some(Box::new(sink)));
        ports.push(port);
        links.push(tokio::spawn(run_link_task("uart", serial, sender, outgoing, shutdown_rx.clone())));
    }

    let flush = tokio::spawn(run_flush_task(Arc::clone(&tx), engine.flush_period(), shutdown_rx.clone()));
    let traffic = args
        .sim_traffic
        .map(|ms| tokio::spawn(run_traffic_task(sim.radio.clone(), Duration::from_millis(ms.max(1)), shutdown_rx.clone())));

    let ctx = SystemContext::new(
        Arc::new(Registry::standard()),
        sim.board.clone(),
        store,
        Arc::clone(&tx),
        Arc::clone(&errors),
        control.clone(),
        engine,
    );
    info!("{} ready", ctx.device.project_name);
    let controller = tokio::task::spawn_blocking(move || Controller::new(ctx, ports, signals).run());

    // stdin EOF or Ctrl-C ends the session
    let mut stdio_link = links.remove(0);
    tokio::select! {
        end = &mut stdio_link => {
            info!("console input ended ({:?})", end.unwrap_or(LinkEnd::Error));
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("cannot listen for Ctrl-C: {}", e);
            }
            info!("interrupted");
        }
    }
    control.shutdown();

    let ctx = controller.await.context("control task panicked")?;
    if ctx.errors.is_fatal() {
        warn!("last error code {}", ctx.last_error());
    }
    drain(&tx);
    let _ = shutdown_tx.send(true);

    let _ = flush.await;
    if let Some(traffic) = traffic {
        let _ = traffic.await;
    }
    for link in links {
        let _ = link.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["uwb-console"]);
        assert_eq!(args.baud, 115_200);
        assert!(args.port.is_none());
        assert!(!args.list_ports);
        assert!(!args.volatile);
    }

    #[test]
    fn test_volatile_conflicts_with_config() {
        assert!(Args::try_parse_from(["uwb-console", "--volatile", "--config", "x.json"]).is_err());
    }

    #[test]
    fn test_engine_file_loads_partial() {
        let dir = std::env::temp_dir().join(format!("uwb-console-engine-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("engine.json");
        std::fs::write(&path, r#"{"flush_period_ms": 5}"#).unwrap();

        let engine = load_engine(Some(&path)).unwrap();
        assert_eq!(engine.flush_period(), Duration::from_millis(5));
        assert_eq!(engine.chunk_size, ControlConfig::default().chunk_size);

        std::fs::write(&path, r#"{"tx_capacity": 1000}"#).unwrap();
        assert!(load_engine(Some(&path)).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
