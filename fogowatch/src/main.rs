//! fogowatch - wildfire incident monitor
//!
//! Polls the active-incidents feed, keeps the incidents of the configured
//! municipalities, and pushes new incidents and their changes to ntfy.
//!
//! Uses XDG Base Directory specification for file locations:
//! - State: $XDG_DATA_HOME/fogowatch/last_ids.json (~/.local/share/fogowatch/last_ids.json)
//! - Logs: $XDG_STATE_HOME/fogowatch/fogowatch.log (~/.local/state/fogowatch/fogowatch.log)
//! - Config: $XDG_CONFIG_HOME/fogowatch/config.toml (~/.config/fogowatch/config.toml)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use fogowatch_core::{feed, notify, Config, IncidentFeed, Monitor, Notifier};
use fogowatch_core::{Scheduler, Shutdown, StateStore};

#[derive(Parser)]
#[command(name = "fogowatch")]
#[command(about = "Watch wildfire incidents and push notifications")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/fogowatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Seconds between cycles (0 = single cycle)
    #[arg(long)]
    interval: Option<i64>,

    /// State file path
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Municipality to watch (repeatable, replaces the configured list)
    #[arg(long = "area")]
    areas: Vec<String>,

    /// Incident feed URL (https:// or file://)
    #[arg(long)]
    feed_url: Option<String>,

    /// Print notifications instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Send a test notification and exit
    #[arg(long)]
    test_notification: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    // Initialize logging
    let _log_guard =
        fogowatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fogowatch starting");

    let feed = feed::from_config(&config.feed).context("failed to create incident feed")?;
    let notifier = notify::from_config(&config.notify).context("failed to create notifier")?;
    let store = StateStore::new(config.state.resolved_path());

    tracing::info!(
        feed = %feed.describe(),
        transport = notifier.name(),
        state = %store.path().display(),
        logs = %fogowatch_core::logging::log_file_path().display(),
        "Collaborators ready"
    );

    let mut monitor =
        Monitor::new(&config, feed, notifier, store).context("failed to create monitor")?;

    if args.test_notification {
        monitor
            .send_test_notification()
            .context("failed to send test notification")?;
        println!("Test notification sent");
        return Ok(());
    }

    if config.notify.send_test_on_start {
        if let Err(e) = monitor.send_test_notification() {
            tracing::warn!(error = %e, "Start-up test notification failed");
        }
    }

    // Set up signal handler for graceful shutdown
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        trigger.trigger();
    })
    .context("failed to set Ctrl+C handler")?;

    let scheduler = Scheduler::new(config.schedule.poll_seconds, shutdown);
    if let Some(interval) = scheduler.interval() {
        println!(
            "Watching {} municipalities (poll every {}s). Press Ctrl+C to stop.",
            monitor.areas().len(),
            interval.as_secs()
        );
    }

    let summary = scheduler
        .run(|| monitor.run_cycle(chrono::Utc::now()))
        .context("cycle failed")?;

    tracing::info!(
        cycles = summary.cycles,
        failed = summary.failed,
        active = monitor.state().active_count(),
        "fogowatch stopped"
    );

    Ok(())
}

/// Command-line flags win over the config file.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(interval) = args.interval {
        config.schedule.poll_seconds = interval;
    }
    if args.once {
        config.schedule.poll_seconds = 0;
    }
    if let Some(path) = &args.state_file {
        config.state.path = Some(path.clone());
    }
    if !args.areas.is_empty() {
        config.areas.wanted = args.areas.clone();
    }
    if let Some(url) = &args.feed_url {
        config.feed.url = url.clone();
    }
    if args.dry_run {
        config.notify.dry_run = true;
    }
    match args.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
}
