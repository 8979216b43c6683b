//! # launcherctl
//!
//! Drives a launcher turret through the device-file contract, against the
//! simulated backend.
//!
//! # Usage
//!
//! ```bash
//! # Pan left for half a second, then stop
//! launcherctl -c left
//!
//! # Sweep, fire, and dump the session state
//! launcherctl --config config/launcher.toml -c up-left -c right -c fire --status
//!
//! # Verbose JSON logs
//! launcherctl -c down -v --json
//! ```

use clap::Parser;
use launcher_common::prelude::*;
use launcher_driver::transport::SIMULATION_BACKEND;
use launcher_driver::{LifecycleController, SimulatedLauncher, SimulationConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// launcherctl - command a USB launcher turret
#[derive(Parser, Debug)]
#[command(name = "launcherctl")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Send motion and fire commands to a launcher turret")]
#[command(long_about = None)]
struct Args {
    /// Path to launcher.toml (built-in defaults when absent)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Command to send: up, down, left, right, up-left, up-right,
    /// down-left, down-right, fire, stop or a raw byte (0xNN).
    /// May be given multiple times.
    #[arg(short, long = "command", value_name = "NAME", action = clap::ArgAction::Append)]
    commands: Vec<String>,

    /// Time to hold each command before the next one
    #[arg(long, default_value_t = 500)]
    hold_ms: u64,

    /// Pause after FIRE before the next command
    #[arg(long, default_value_t = 5000)]
    fire_settle_ms: u64,

    /// Print the session snapshot as JSON before exit
    #[arg(long)]
    status: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("launcherctl failed: {}", e);
        eprintln!("launcherctl: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => LauncherConfig::load(path)?,
        None => LauncherConfig::default(),
    };
    config.validate()?;
    setup_tracing(&args, config.shared.log_level);

    info!(
        "{} v{} starting",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION")
    );

    let commands = args
        .commands
        .iter()
        .map(|name| {
            Command::parse_name(name).ok_or_else(|| format!("unknown command '{name}'"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            info!("Received interrupt, stopping");
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    let sim_config: SimulationConfig = config.transport_config(SIMULATION_BACKEND)?;
    let controller = LifecycleController::new(config.driver.clone())?;
    let launcher = Arc::new(SimulatedLauncher::new(sim_config)?);
    let session = controller.attach(launcher.clone())?;
    let file = controller.open(session.minor())?;

    for command in commands {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        let rc = file.write(&[command.bits()]);
        if rc < 0 {
            warn!("command {:#04x} failed (errno {})", command.bits(), -rc);
            continue;
        }
        info!("sent {:#04x}", command.bits());

        let pause = if command.contains(Command::FIRE) {
            args.fire_settle_ms
        } else {
            args.hold_ms
        };
        sleep_unless(&interrupted, Duration::from_millis(pause));
    }

    // Always leave the turret stationary.
    let rc = file.write(&[Command::STOP.bits()]);
    if rc < 0 {
        warn!("final stop failed (errno {})", -rc);
    }

    let (pan, tilt) = launcher.position();
    info!(
        "turret at pan {:.1}, tilt {:.1}; {} shot(s) fired",
        pan,
        tilt,
        launcher.shots()
    );

    if args.status {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    }

    controller.close(file);
    controller.shutdown();
    info!("launcherctl done");
    Ok(())
}

fn sleep_unless(flag: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !flag.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Install the `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-v` means debug and the configured
/// `shared.log_level` applies.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose { LogLevel::Debug } else { configured };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    }
}
