//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/fogowatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/fogowatch/` (~/.config/fogowatch/)
//! - Data: `$XDG_DATA_HOME/fogowatch/` (~/.local/share/fogowatch/)
//! - State/Logs: `$XDG_STATE_HOME/fogowatch/` (~/.local/state/fogowatch/)

use crate::error::{Error, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Municipalities watched when no `[areas]` section is configured.
pub const DEFAULT_AREAS: &[&str] = &[
    "Sertã",
    "Oleiros",
    "Castanheira de Pera",
    "Proença-a-Nova",
    "Vila de Rei",
    "Vila Velha de Ródão",
    "Sardoal",
    "Figueiró dos Vinhos",
    "Pedrógão Grande",
    "Pampilhosa da Serra",
    "Ferreira do Zêzere",
    "Fundão",
    "Castelo Branco",
    "Idanha-a-Nova",
    "Penamacor",
    "Belmonte",
    "Covilhã",
];

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Upstream incident feed
    #[serde(default)]
    pub feed: FeedConfig,

    /// Areas to monitor
    #[serde(default)]
    pub areas: AreasConfig,

    /// Attribute filters
    #[serde(default)]
    pub filters: FilterConfig,

    /// Optional radius filter around a point
    #[serde(default)]
    pub radius: Option<RadiusConfig>,

    /// State file location and retention
    #[serde(default)]
    pub state: StateConfig,

    /// Periodic summaries
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Push notifications
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Polling schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Incident feed configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    /// Primary endpoint. A `file://` URL replays a local JSON document.
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Endpoints tried in order when the primary fails
    #[serde(default)]
    pub fallback_urls: Vec<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Bearer token sent as `Authorization` (optional)
    pub api_key: Option<String>,

    /// User-Agent header
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            fallback_urls: vec![],
            timeout_secs: default_http_timeout(),
            api_key: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_feed_url() -> String {
    "https://api.fogos.pt/v2/incidents/active?geojson=true".to_string()
}

fn default_user_agent() -> String {
    format!("fogowatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_http_timeout() -> u64 {
    20
}

/// Areas (municipalities) to monitor
#[derive(Debug, Deserialize, Clone)]
pub struct AreasConfig {
    /// Municipality names as free text; accents and case do not matter
    #[serde(default = "default_wanted_areas")]
    pub wanted: Vec<String>,
}

impl Default for AreasConfig {
    fn default() -> Self {
        Self {
            wanted: default_wanted_areas(),
        }
    }
}

fn default_wanted_areas() -> Vec<String> {
    DEFAULT_AREAS.iter().map(|s| s.to_string()).collect()
}

/// Attribute filters applied after area membership.
///
/// All comparisons are case- and accent-insensitive. Empty lists impose no
/// constraint.
///
/// `include_status`, `exclude_status` and `include_nature` match on
/// substrings of the free text, so a short entry can match more than
/// intended ("curso" matches "Em Curso" and "Recurso"). Prefer full words.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct FilterConfig {
    /// Allowed districts (exact match)
    #[serde(default)]
    pub districts: Vec<String>,
    /// Allowed regions (exact match)
    #[serde(default)]
    pub regions: Vec<String>,
    /// Allowed sub-regions (exact match)
    #[serde(default)]
    pub sub_regions: Vec<String>,
    /// Allowed parishes (exact match)
    #[serde(default)]
    pub parishes: Vec<String>,
    /// Numeric status codes to drop
    #[serde(default)]
    pub exclude_status_codes: Vec<i64>,
    /// Required nature codes (exact match)
    #[serde(default)]
    pub include_nature_codes: Vec<String>,
    /// Nature codes to drop (exact match)
    #[serde(default)]
    pub exclude_nature_codes: Vec<String>,
    /// Required status text (substring match)
    #[serde(default)]
    pub include_status: Vec<String>,
    /// Status text to drop (substring match)
    #[serde(default)]
    pub exclude_status: Vec<String>,
    /// Required nature: exact match on nature or nature code, or substring of nature
    #[serde(default)]
    pub include_nature: Vec<String>,
}

/// Keep only incidents within `km` of a center point.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RadiusConfig {
    pub center_lat: f64,
    pub center_lon: f64,
    /// Radius in kilometres; 0 disables the filter
    pub km: f64,
}

/// State file configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StateConfig {
    /// State file path (default: `$XDG_DATA_HOME/fogowatch/last_ids.json`)
    pub path: Option<PathBuf>,

    /// Forget incidents not seen for this many hours; 0 keeps them forever
    #[serde(default)]
    pub ttl_hours: f64,
}

/// Longest accepted `state.ttl_hours` (ten years).
pub const MAX_TTL_HOURS: f64 = 24.0 * 366.0 * 10.0;

impl StateConfig {
    /// Configured path, or the XDG default.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::default_state_path)
    }

    /// Retention window; zero or negative disables pruning.
    pub fn ttl(&self) -> Result<Duration> {
        let invalid = || {
            Error::Config(format!(
                "state.ttl_hours must be a finite number of at most {}",
                MAX_TTL_HOURS
            ))
        };
        if !self.ttl_hours.is_finite() || self.ttl_hours > MAX_TTL_HOURS {
            return Err(invalid());
        }
        if self.ttl_hours <= 0.0 {
            return Ok(Duration::zero());
        }
        Duration::try_seconds((self.ttl_hours * 3600.0).round() as i64).ok_or_else(invalid)
    }
}

/// Periodic summary configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    /// Send a summary at the first cycle of every hour
    #[serde(default = "default_true")]
    pub hourly: bool,

    /// Send a summary once a day at `daily_hour`
    #[serde(default = "default_true")]
    pub daily: bool,

    /// Local hour (0-23) of the daily summary
    #[serde(default = "default_daily_hour")]
    pub daily_hour: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            hourly: true,
            daily: true,
            daily_hour: default_daily_hour(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_daily_hour() -> u32 {
    8
}

/// Push notification (ntfy) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    /// ntfy server URL
    #[serde(default = "default_ntfy_url")]
    pub url: String,

    /// ntfy topic; required unless `dry_run` is set
    pub topic: Option<String>,

    /// Base priority for new incidents (1 = min, 5 = max)
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Base tags for every notification
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Collapse new incidents into one summary when at least this many
    /// arrive in one cycle; 0 disables aggregation
    #[serde(default)]
    pub summary_threshold: usize,

    /// Local quiet hours as `"start-end"` (e.g. `"23-7"`)
    pub quiet_hours: Option<String>,

    /// Print notifications instead of sending them
    #[serde(default)]
    pub dry_run: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Resource thresholds that tag and raise priority; 0 disables
    #[serde(default)]
    pub min_personnel: u32,
    #[serde(default)]
    pub min_ground_vehicles: u32,
    #[serde(default)]
    pub min_aircraft: u32,
    #[serde(default)]
    pub min_water_vehicles: u32,

    /// Send a test notification at start-up
    #[serde(default)]
    pub send_test_on_start: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: default_ntfy_url(),
            topic: None,
            priority: default_priority(),
            tags: default_tags(),
            summary_threshold: 0,
            quiet_hours: None,
            dry_run: false,
            timeout_secs: default_http_timeout(),
            min_personnel: 0,
            min_ground_vehicles: 0,
            min_aircraft: 0,
            min_water_vehicles: 0,
            send_test_on_start: false,
        }
    }
}

impl NotifyConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.priority) {
            return Err(Error::Config(
                "notify.priority must be between 1 and 5".to_string(),
            ));
        }
        if !self.dry_run
            && self
                .topic
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(Error::Config(
                "notify.topic is required unless notify.dry_run is set".to_string(),
            ));
        }
        if let Some(window) = &self.quiet_hours {
            QuietHours::parse(window)?;
        }
        Ok(())
    }
}

fn default_ntfy_url() -> String {
    "https://ntfy.sh".to_string()
}

fn default_priority() -> u8 {
    5
}

fn default_tags() -> Vec<String> {
    vec!["fire".to_string(), "rotating_light".to_string()]
}

/// Local-time window during which notifications are toned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    /// Parses `"23-7"`, `"22-07"` or `"22:00-07:30"` (minutes are ignored).
    pub fn parse(window: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid quiet_hours window: {:?}", window));
        let (start, end) = window.trim().split_once('-').ok_or_else(invalid)?;
        let hour = |s: &str| -> Option<u32> {
            let h = s.trim().split(':').next()?.trim().parse::<u32>().ok()?;
            (h <= 23).then_some(h)
        };
        Ok(Self {
            start_hour: hour(start).ok_or_else(invalid)?,
            end_hour: hour(end).ok_or_else(invalid)?,
        })
    }

    /// Whether `hour` (0-23) falls inside the window.
    ///
    /// A window whose start equals its end covers the whole day; windows may
    /// wrap past midnight.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour == self.end_hour {
            return true;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Polling schedule
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Seconds between cycles; 0 or less runs a single cycle and exits
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_seconds: default_poll_seconds(),
        }
    }
}

fn default_poll_seconds() -> i64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.areas.wanted.iter().all(|a| a.trim().is_empty()) {
            return Err(Error::Config(
                "areas.wanted must name at least one municipality".to_string(),
            ));
        }
        if let Some(radius) = &self.radius {
            if !radius.km.is_finite() || radius.km < 0.0 {
                return Err(Error::Config(
                    "radius.km must be a non-negative number".to_string(),
                ));
            }
        }
        if self.summary.daily_hour > 23 {
            return Err(Error::Config(
                "summary.daily_hour must be between 0 and 23".to_string(),
            ));
        }
        self.state.ttl()?;
        self.notify.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/fogowatch/config.toml` (~/.config/fogowatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("fogowatch").join("config.toml")
    }

    /// Returns the data directory path (for the state file)
    ///
    /// `$XDG_DATA_HOME/fogowatch/` (~/.local/share/fogowatch/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("fogowatch")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/fogowatch/` (~/.local/state/fogowatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("fogowatch")
    }

    /// Returns the default state file path
    ///
    /// `$XDG_DATA_HOME/fogowatch/last_ids.json`
    pub fn default_state_path() -> PathBuf {
        Self::data_dir().join("last_ids.json")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/fogowatch/fogowatch.log` (~/.local/state/fogowatch/fogowatch.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("fogowatch.log")
    }
}
