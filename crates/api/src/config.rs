use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

use domain::models::ServerRole;

use crate::jobs::JobSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub farm: FarmConfig,
    #[serde(default)]
    pub main_dom: MainDomConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Upper bound on a blocking named-lock acquisition.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
            lock_timeout_ms: config.lock_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Farm membership of this node.
#[derive(Debug, Clone, Deserialize)]
pub struct FarmConfig {
    /// Explicit role (`single`, `scheduling_publisher`, `subscriber`).
    /// When unset the role is resolved from the topology.
    #[serde(default)]
    pub role: Option<String>,

    /// Whether several nodes serve the application behind a load balancer.
    #[serde(default)]
    pub load_balanced: bool,

    /// Identity used in server registrations; defaults to the host name.
    #[serde(default)]
    pub server_identity: Option<String>,

    /// A registration not refreshed within this window is inactive.
    #[serde(default = "default_registration_window")]
    pub registration_window_secs: u64,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            role: None,
            load_balanced: false,
            server_identity: None,
            registration_window_secs: default_registration_window(),
        }
    }
}

impl FarmConfig {
    /// The explicit role override, if any.
    pub fn explicit_role(&self) -> Result<Option<ServerRole>, ConfigValidationError> {
        match self.role.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(role) => role
                .parse()
                .map(Some)
                .map_err(|e| ConfigValidationError::InvalidValue(format!("farm.role: {e}"))),
        }
    }

    pub fn registration_window(&self) -> Duration {
        Duration::from_secs(self.registration_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainDomConfig {
    /// Identity shared by all process instances of this application on a machine.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// How long a new instance waits for the current holder before taking over.
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,

    #[serde(default = "default_main_dom_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for MainDomConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            claim_timeout_secs: default_claim_timeout(),
            poll_interval_ms: default_main_dom_poll_interval(),
        }
    }
}

impl MainDomConfig {
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Delay before a job's first run when no first-run time applies.
    #[serde(default = "default_delay")]
    pub default_delay_secs: u64,

    /// How often an idle job re-checks its gate.
    #[serde(default = "default_idle_recheck")]
    pub idle_recheck_secs: u64,

    /// How long in-flight invocations may run on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_delay_secs: default_delay(),
            idle_recheck_secs: default_idle_recheck(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub keep_alive: KeepAliveJobConfig,
    #[serde(default)]
    pub temp_file_cleanup: TempFileCleanupJobConfig,
    #[serde(default = "default_touch_server")]
    pub touch_server: JobConfig,
    #[serde(default)]
    pub server_prune: ServerPruneJobConfig,
    #[serde(default = "default_pool_metrics")]
    pub pool_metrics: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            keep_alive: KeepAliveJobConfig::default(),
            temp_file_cleanup: TempFileCleanupJobConfig::default(),
            touch_server: default_touch_server(),
            server_prune: ServerPruneJobConfig::default(),
            pool_metrics: default_pool_metrics(),
        }
    }
}

/// Schedule of a job without job-specific options.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub period_secs: u64,
    #[serde(default)]
    pub first_run_time: Option<String>,
}

impl JobConfig {
    pub fn settings(&self) -> JobSettings {
        JobSettings::new(self.enabled, Duration::from_secs(self.period_secs), self.first_run_time.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepAliveJobConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_keep_alive_period")]
    pub period_secs: u64,
    #[serde(default)]
    pub first_run_time: Option<String>,
    /// URL pinged on every run.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_keep_alive_timeout")]
    pub timeout_secs: u64,
}

impl Default for KeepAliveJobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: default_keep_alive_period(),
            first_run_time: None,
            url: String::new(),
            timeout_secs: default_keep_alive_timeout(),
        }
    }
}

impl KeepAliveJobConfig {
    pub fn settings(&self) -> JobSettings {
        JobSettings::new(self.enabled, Duration::from_secs(self.period_secs), self.first_run_time.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TempFileCleanupJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_temp_cleanup_period")]
    pub period_secs: u64,
    #[serde(default)]
    pub first_run_time: Option<String>,
    /// Directories to clean; empty means `<system temp>/farmhand`.
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default = "default_temp_max_age")]
    pub max_age_secs: u64,
}

impl Default for TempFileCleanupJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: default_temp_cleanup_period(),
            first_run_time: None,
            directories: Vec::new(),
            max_age_secs: default_temp_max_age(),
        }
    }
}

impl TempFileCleanupJobConfig {
    pub fn settings(&self) -> JobSettings {
        JobSettings::new(self.enabled, Duration::from_secs(self.period_secs), self.first_run_time.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerPruneJobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_server_prune_period")]
    pub period_secs: u64,
    #[serde(default)]
    pub first_run_time: Option<String>,
    /// Registrations not refreshed for this long are deleted.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for ServerPruneJobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: default_server_prune_period(),
            first_run_time: None,
            stale_after_secs: default_stale_after(),
        }
    }
}

impl ServerPruneJobConfig {
    pub fn settings(&self) -> JobSettings {
        JobSettings::new(self.enabled, Duration::from_secs(self.period_secs), self.first_run_time.clone())
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_lock_timeout_ms() -> u64 {
    20_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_registration_window() -> u64 {
    120
}
fn default_app_id() -> String {
    "farmhand".to_string()
}
fn default_claim_timeout() -> u64 {
    40
}
fn default_main_dom_poll_interval() -> u64 {
    2000
}
fn default_delay() -> u64 {
    180
}
fn default_idle_recheck() -> u64 {
    60
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_touch_server() -> JobConfig {
    JobConfig {
        enabled: true,
        period_secs: 60,
        first_run_time: None,
    }
}
fn default_pool_metrics() -> JobConfig {
    JobConfig {
        enabled: true,
        period_secs: 10,
        first_run_time: None,
    }
}
fn default_keep_alive_period() -> u64 {
    300
}
fn default_keep_alive_timeout() -> u64 {
    10
}
fn default_temp_cleanup_period() -> u64 {
    3600
}
fn default_temp_max_age() -> u64 {
    86_400
}
fn default_server_prune_period() -> u64 {
    300
}
fn default_stale_after() -> u64 {
    600
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with FARMHAND__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FARMHAND").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Defaults are embedded so tests do not depend on the working directory.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 10
            min_connections = 2
            connect_timeout_secs = 10
            idle_timeout_secs = 600
            lock_timeout_ms = 20000

            [logging]
            level = "info"
            format = "pretty"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        // Validation is left to the caller so tests can build partial configs.
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "FARMHAND__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.main_dom.claim_timeout_secs == 0 || self.main_dom.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "main_dom timings must be greater than 0".to_string(),
            ));
        }

        let periods = [
            ("keep_alive", self.jobs.keep_alive.period_secs),
            ("temp_file_cleanup", self.jobs.temp_file_cleanup.period_secs),
            ("touch_server", self.jobs.touch_server.period_secs),
            ("server_prune", self.jobs.server_prune.period_secs),
            ("pool_metrics", self.jobs.pool_metrics.period_secs),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| *period == 0) {
            return Err(ConfigValidationError::InvalidValue(format!(
                "jobs.{name}.period_secs must be greater than 0"
            )));
        }

        if self.jobs.keep_alive.enabled && self.jobs.keep_alive.url.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "jobs.keep_alive.url must be set when the keep-alive job is enabled".to_string(),
            ));
        }

        self.farm.explicit_role()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    pub fn scheduler_default_delay(&self) -> Duration {
        Duration::from_secs(self.scheduler.default_delay_secs)
    }

    pub fn idle_recheck(&self) -> Duration {
        Duration::from_secs(self.scheduler.idle_recheck_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.scheduler.shutdown_grace_secs)
    }
}
