use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often the liveness sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sync_sweep_interval_secs: u64,

    /// Idle time after which a connection is flagged stale
    #[serde(default = "default_idle_threshold_secs")]
    pub sync_idle_threshold_secs: u64,

    /// Idle time after which a connection is closed
    #[serde(default = "default_hard_timeout_secs")]
    pub sync_hard_timeout_secs: u64,

    /// Lifetime of an edit lock
    #[serde(default = "default_lock_ttl_secs")]
    pub sync_lock_ttl_secs: u64,

    /// How often the session reaper runs
    #[serde(default = "default_reaper_interval_secs")]
    pub sync_reaper_interval_secs: u64,

    /// Inactivity window after which the reaper drops a session
    #[serde(default = "default_session_idle_secs")]
    pub sync_session_idle_secs: u64,

    /// Keep empty sessions around this long. Unset drops them on last departure.
    pub sync_empty_session_grace_secs: Option<u64>,

    /// Per-connection outbound queue capacity
    #[serde(default = "default_outbound_queue")]
    pub sync_outbound_queue: usize,

    /// Let an edit take over a lock held by another member
    #[serde(default)]
    pub sync_edit_overrides_lock: bool,
}

/// Tunables of the synchronization core, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sweep_interval: Duration,
    pub idle_threshold: TimeDelta,
    pub hard_timeout: TimeDelta,
    pub lock_ttl: TimeDelta,
    pub reaper_interval: Duration,
    pub session_idle: TimeDelta,
    pub empty_session_grace: Option<TimeDelta>,
    pub outbound_queue: usize,
    pub edit_overrides_lock: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(default_sweep_interval_secs()),
            idle_threshold: TimeDelta::seconds(default_idle_threshold_secs() as i64),
            hard_timeout: TimeDelta::seconds(default_hard_timeout_secs() as i64),
            lock_ttl: TimeDelta::seconds(default_lock_ttl_secs() as i64),
            reaper_interval: Duration::from_secs(default_reaper_interval_secs()),
            session_idle: TimeDelta::seconds(default_session_idle_secs() as i64),
            empty_session_grace: None,
            outbound_queue: default_outbound_queue(),
            edit_overrides_lock: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy.
        // Runs before tracing is initialised, so the caller reports the outcome.
        envy::from_env::<Config>().map_err(ConfigError::EnvError)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Allowed CORS origins, if any were configured
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve and validate the synchronization tunables
    pub fn sync_settings(&self) -> Result<SyncSettings, ConfigError> {
        let idle_threshold = seconds("SYNC_IDLE_THRESHOLD_SECS", self.sync_idle_threshold_secs)?;
        let hard_timeout = seconds("SYNC_HARD_TIMEOUT_SECS", self.sync_hard_timeout_secs)?;
        if idle_threshold >= hard_timeout {
            return Err(ConfigError::Invalid(format!(
                "SYNC_IDLE_THRESHOLD_SECS ({}) must be below SYNC_HARD_TIMEOUT_SECS ({})",
                self.sync_idle_threshold_secs, self.sync_hard_timeout_secs
            )));
        }
        if self.sync_sweep_interval_secs == 0 || self.sync_reaper_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep and reaper intervals must be non-zero".to_string()));
        }
        if self.sync_outbound_queue == 0 {
            return Err(ConfigError::Invalid("SYNC_OUTBOUND_QUEUE must be non-zero".to_string()));
        }

        let empty_session_grace = match self.sync_empty_session_grace_secs {
            Some(0) | None => None,
            Some(secs) => Some(seconds("SYNC_EMPTY_SESSION_GRACE_SECS", secs)?),
        };

        Ok(SyncSettings {
            sweep_interval: Duration::from_secs(self.sync_sweep_interval_secs),
            idle_threshold,
            hard_timeout,
            lock_ttl: seconds("SYNC_LOCK_TTL_SECS", self.sync_lock_ttl_secs)?,
            reaper_interval: Duration::from_secs(self.sync_reaper_interval_secs),
            session_idle: seconds("SYNC_SESSION_IDLE_SECS", self.sync_session_idle_secs)?,
            empty_session_grace,
            outbound_queue: self.sync_outbound_queue,
            edit_overrides_lock: self.sync_edit_overrides_lock,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            sync_sweep_interval_secs: default_sweep_interval_secs(),
            sync_idle_threshold_secs: default_idle_threshold_secs(),
            sync_hard_timeout_secs: default_hard_timeout_secs(),
            sync_lock_ttl_secs: default_lock_ttl_secs(),
            sync_reaper_interval_secs: default_reaper_interval_secs(),
            sync_session_idle_secs: default_session_idle_secs(),
            sync_empty_session_grace_secs: None,
            sync_outbound_queue: default_outbound_queue(),
            sync_edit_overrides_lock: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

fn seconds(name: &str, secs: u64) -> Result<TimeDelta, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
    }
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| ConfigError::Invalid(format!("{} is out of range: {}", name, secs)))
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_idle_threshold_secs() -> u64 {
    60
}

fn default_hard_timeout_secs() -> u64 {
    5 * 60
}

fn default_lock_ttl_secs() -> u64 {
    5 * 60
}

fn default_reaper_interval_secs() -> u64 {
    10 * 60
}

fn default_session_idle_secs() -> u64 {
    60 * 60
}

fn default_outbound_queue() -> usize {
    256
}
