//! # fogowatch-core
//!
//! Core library for fogowatch - a wildfire incident monitor.
//!
//! This library provides:
//! - Area-name normalization and synonym expansion
//! - Feed adapter for the shape-varying incident API
//! - Filter pipeline (area, administrative, nature/status, radius)
//! - Durable incident state with key canonicalization and pruning
//! - Change detection (new incidents, status, resources, annotations)
//! - Notification rendering and delivery (ntfy)
//! - Configuration, logging and scheduling
//!
//! ## Cycle
//!
//! ```text
//! feed ─► filter ─► detect (reads/writes state) ─► render ─► notify ─► save
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use fogowatch_core::{feed, notify, Config, Monitor, StateStore};
//!
//! let config = Config::load().expect("failed to load config");
//! let feed = feed::from_config(&config.feed).expect("failed to build feed");
//! let notifier = notify::from_config(&config.notify).expect("failed to build notifier");
//! let store = StateStore::new(config.state.resolved_path());
//!
//! let mut monitor = Monitor::new(&config, feed, notifier, store).expect("bad config");
//! monitor.run_cycle(chrono::Utc::now()).expect("feed unavailable");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use detect::{ChangeDetector, DetectOutcome, Event};
pub use error::{Error, Result};
pub use feed::IncidentFeed;
pub use filter::{FilterPipeline, FilterStats};
pub use monitor::{CycleReport, Monitor};
pub use normalize::AreaSet;
pub use notify::{Notification, Notifier};
pub use schedule::{Scheduler, Shutdown};
pub use state::{IncidentState, StateStore};
pub use types::*;

// Public modules
pub mod coerce;
pub mod config;
pub mod detect;
pub mod error;
pub mod feed;
pub mod filter;
pub mod format;
pub mod logging;
pub mod monitor;
pub mod normalize;
pub mod notify;
pub mod schedule;
pub mod state;
pub mod types;
