//! `cellbridge` – digital-twin gateway for a pick-and-place robot cell.
//!
//! ```text
//! cellbridge              run the gateway until Ctrl-C
//! cellbridge watch [url]  print the twin's busy flag and queue depth
//! cellbridge init         write a default config file if none exists
//! cellbridge config       print the effective configuration
//! ```
//!
//! On `run` the binary:
//!
//! 1. Loads `~/.cellbridge/config.toml` (or `$CELLBRIDGE_CONFIG`) and the
//!    `CELLBRIDGE_*` overrides, then starts tracing from that config.
//! 2. Optionally starts a simulated robot cell on `sim_port` and points the
//!    robot link at it.
//! 3. Serves the digital twin on `listen_port` and runs the state mirror.
//! 4. Stops on **Ctrl-C**.  Queued jobs are dropped; a dispatch in flight is
//!    abandoned.

mod config;
mod telemetry;
mod twin_watch;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cellbridge_link::{RobotLink, WsConnector};
use cellbridge_server::{BridgeServer, NodeSpaceEndpoint, SimulatedCell};
use cellbridge_types::BridgeError;
use colored::Colorize;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::twin_watch::{TwinReading, TwinWatcher};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str);

    // `init` must work even when an existing file no longer parses.
    if command == Some("init") {
        return init();
    }

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {} ({})", "Config error".red(), e, config::config_path().display());
            return ExitCode::FAILURE;
        }
    };
    let _telemetry = telemetry::init_tracing("cellbridge", &cfg);

    match command {
        None | Some("run") => run(cfg),
        Some("watch") => watch_twin(&cfg, args.get(1).cloned()),
        Some("config") => print_config(&cfg),
        Some(other) => {
            eprintln!("{}: unknown command `{}`", "error".red().bold(), other);
            eprintln!("usage: cellbridge [run|watch [url]|init|config]");
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn run(cfg: config::Config) -> ExitCode {
    print_banner();

    if let Err(e) = cfg.validate() {
        error!(error = %e, path = %config::config_path().display(), "invalid configuration");
        return ExitCode::FAILURE;
    }
    let Some((runtime, shutdown)) = start_runtime() else {
        return ExitCode::FAILURE;
    };

    match runtime.block_on(serve(cfg, shutdown)) {
        Ok(()) => {
            println!("{}", "  ✓ Gateway stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

fn watch_twin(cfg: &config::Config, url: Option<String>) -> ExitCode {
    let Some((runtime, shutdown)) = start_runtime() else {
        return ExitCode::FAILURE;
    };
    let watcher = TwinWatcher::new(cfg, url);
    println!("  Watching {} (Ctrl-C to stop)", watcher.endpoint().bold());

    let mut last: Option<TwinReading> = None;
    runtime.block_on(watcher.run(shutdown, |reading| {
        let state = if reading.busy { "busy".yellow() } else { "idle".green() };
        let marker = if last.is_some_and(|prev| prev != reading) { "*" } else { " " };
        println!("  {marker} robot {state}  queued jobs {}", reading.queue_depth);
        last = Some(reading);
    }));
    ExitCode::SUCCESS
}

fn init() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!("  Config already present at {}", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save_to(&config::Config::default(), &path) {
        Ok(()) => {
            println!("  {} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_config(cfg: &config::Config) -> ExitCode {
    match toml::to_string_pretty(cfg) {
        Ok(text) => {
            println!("# {}", config::config_path().display());
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// Tokio runtime plus a shutdown flag that Ctrl-C turns `true`.
fn start_runtime() -> Option<(Runtime, watch::Receiver<bool>)> {
    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return None;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process with SIGKILL");
    }
    Some((runtime, shutdown_rx))
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

async fn serve(cfg: config::Config, shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
    let mut robot_url = cfg.robot_url.clone();
    let mut background = Vec::new();

    if cfg.simulate_robot {
        let cell = SimulatedCell::new(cfg.robot_nodes.clone(), Duration::from_millis(cfg.sim_cycle_ms));
        let endpoint = NodeSpaceEndpoint::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, cfg.sim_port))).await?;
        robot_url = format!("ws://{}", endpoint.local_addr()?);
        info!(robot_url = %robot_url, "using simulated robot cell");
        background.push(tokio::spawn(endpoint.run(Arc::clone(cell.space()), shutdown.clone())));
        background.push(tokio::spawn(cell.run(shutdown.clone())));
    }

    let connector = WsConnector::new(robot_url)
        .with_io_timeout(cfg.io_timeout())
        .with_batch_reads(cfg.batch_reads);
    let link = Arc::new(RobotLink::new(Arc::new(connector), cfg.link_mode()));
    info!(
        robot = %link.endpoint(),
        link_mode = %cfg.link_mode,
        listen_port = cfg.listen_port,
        poll_interval_ms = cfg.poll_interval_ms,
        "gateway configured"
    );

    BridgeServer::new(cfg.bridge_config(), link)?.run(shutdown).await?;

    for task in background {
        let _ = task.await;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}", "cellbridge".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Digital-twin gateway for the robot cell");
    println!();
}
