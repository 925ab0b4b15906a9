// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Every field has a default so a missing file still yields a runnable config

use crate::paths;
use anyhow::{Context, Result};
use burrow_core::scheduler::parse_interval;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the reverse WebSocket listens on, e.g. "ws://127.0.0.1:8080"
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Bearer token remote gateways must present; unset disables the check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    /// Delay before re-binding after the listener fails
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Serve Prometheus text at /metrics on the same listener
    #[serde(default)]
    pub metrics: bool,
}

// Custom Debug impl to redact access_token
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("ws_url", &self.ws_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            access_token: None,
            api_timeout_secs: default_api_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            metrics: false,
        }
    }
}

impl GatewayConfig {
    /// `host:port` to bind, taken from `ws_url`.
    pub fn listen_addr(&self) -> Result<String> {
        let rest = self
            .ws_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.ws_url);
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            anyhow::bail!("gateway.ws_url has no host: {}", self.ws_url);
        }
        if authority.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            Ok(authority.to_string())
        } else {
            Ok(format!("{}:8080", authority))
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Names that address the bot when they start a group message
    #[serde(default)]
    pub nicknames: Vec<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Account ids with bot-admin permission
    #[serde(default)]
    pub admins: Vec<i64>,
    /// Per-sender window, e.g. "5s" or "1m30s"
    #[serde(default = "default_command_cooldown")]
    pub command_cooldown: String,
    #[serde(default = "default_queue_size")]
    pub command_queue_size: usize,
    /// Modules to load at startup, by name
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nicknames: Vec::new(),
            command_prefix: default_command_prefix(),
            admins: Vec::new(),
            command_cooldown: default_command_cooldown(),
            command_queue_size: default_queue_size(),
            modules: default_modules(),
        }
    }
}

impl BotConfig {
    /// Falls back to five seconds when the configured value cannot be parsed.
    pub fn cooldown(&self) -> Duration {
        parse_interval(&self.command_cooldown).unwrap_or_else(|e| {
            tracing::warn!(
                value = %self.command_cooldown,
                error = %e,
                "Invalid command_cooldown, using 5s"
            );
            Duration::from_secs(5)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Ring slots; 0 dispatches every event immediately
    #[serde(default)]
    pub ring_len: usize,
    /// Ring drain interval, or a fixed delay before direct dispatch
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "default_max_process_time_secs")]
    pub max_process_time_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            ring_len: 0,
            latency_ms: 0,
            max_process_time_secs: default_max_process_time_secs(),
        }
    }
}

impl EventsConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn max_process_time(&self) -> Duration {
        Duration::from_secs(self.max_process_time_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// SQLite file name, relative to data_dir
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database(),
            queue_size: default_queue_size(),
        }
    }
}

impl StorageConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_path().join(&self.database)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBackend {
    File,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timezone for interpreting task times (e.g., "Asia/Shanghai", "UTC")
    /// Uses IANA timezone names. Defaults to system local timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_task_backend")]
    pub backend: TaskBackend,
    /// Task file name, relative to storage.data_dir
    #[serde(default = "default_task_file")]
    pub file: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            backend: default_task_backend(),
            file: default_task_file(),
        }
    }
}

impl SchedulerConfig {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone.parse::<chrono_tz::Tz>().map_err(|_| {
            anyhow::anyhow!(
                "Invalid timezone '{}'. Use IANA timezone names like 'Asia/Shanghai', 'Europe/London', 'UTC'",
                self.timezone
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub record_to_file: bool,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            record_to_file: true,
            max_log_files: default_max_log_files(),
        }
    }
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8080".to_string()
}

fn default_api_timeout_secs() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_command_prefix() -> String {
    ".".to_string()
}

fn default_command_cooldown() -> String {
    "5s".to_string()
}

fn default_queue_size() -> usize {
    100
}

fn default_modules() -> Vec<String> {
    vec!["schedule".to_string()]
}

fn default_max_process_time_secs() -> u64 {
    240 // 4 minutes
}

fn default_data_dir() -> String {
    paths::data_dir().to_string_lossy().to_string()
}

fn default_database() -> String {
    "burrow.db".to_string()
}

fn default_task_backend() -> TaskBackend {
    TaskBackend::File
}

fn default_task_file() -> String {
    "scheduler.toml".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_log_files() -> usize {
    100
}

fn default_timezone() -> String {
    // Always validate that the timezone is parseable by chrono-tz
    if let Ok(tz) = std::env::var("TZ") {
        if tz.parse::<chrono_tz::Tz>().is_ok() {
            return tz;
        }
    }
    // On Unix systems, try to read /etc/localtime symlink
    #[cfg(unix)]
    {
        if let Ok(link) = std::fs::read_link("/etc/localtime") {
            if let Some(tz) = link.to_str() {
                // Extract timezone from path like /usr/share/zoneinfo/Asia/Shanghai
                if let Some(pos) = tz.find("zoneinfo/") {
                    let detected = tz[pos + 9..].to_string();
                    if detected.parse::<chrono_tz::Tz>().is_ok() {
                        return detected;
                    }
                }
            }
        }
    }
    "UTC".to_string()
}

/// Expand tilde (~) to home directory in paths
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs
                .home_dir()
                .join(stripped)
                .to_string_lossy()
                .to_string();
        }
        tracing::warn!(
            path = %path,
            "Failed to expand tilde in path: could not determine home directory"
        );
    }
    path.to_string()
}

fn parse_list<T: std::str::FromStr>(var: &str, val: &str) -> Result<Vec<T>> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|_| anyhow::anyhow!("{} contains an invalid entry: {}", var, s))
        })
        .collect()
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. BURROW_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/burrow/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("BURROW_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration with environment variable overrides.
    /// A missing file means defaults.
    pub fn load() -> Result<Self> {
        let config = match Self::find_config_file() {
            Some(path) => Self::read_file(&path)?,
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };
        config.finish()
    }

    /// Load a specific file with environment variable overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::read_file(path)?.finish()
    }

    fn read_file(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn finish(mut self) -> Result<Self> {
        self.apply_env()?;
        self.storage.data_dir = expand_tilde(&self.storage.data_dir);
        self.validate()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("BURROW_WS_URL") {
            self.gateway.ws_url = val;
        }
        if let Ok(val) = std::env::var("BURROW_ACCESS_TOKEN") {
            self.gateway.access_token = Some(val).filter(|v| !v.is_empty());
        }
        if let Ok(val) = std::env::var("BURROW_COMMAND_PREFIX") {
            self.bot.command_prefix = val;
        }
        if let Ok(val) = std::env::var("BURROW_ADMINS") {
            self.bot.admins = parse_list("BURROW_ADMINS", &val)?;
        }
        if let Ok(val) = std::env::var("BURROW_NICKNAMES") {
            self.bot.nicknames = parse_list("BURROW_NICKNAMES", &val)?;
        }
        if let Ok(val) = std::env::var("BURROW_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("BURROW_RING_LEN") {
            self.events.ring_len = val.parse().with_context(|| {
                format!("BURROW_RING_LEN must be a valid number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("SCHEDULER_TIMEZONE") {
            self.scheduler.timezone = val;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.listen_addr()?;
        self.scheduler.tz()?;
        if self.bot.command_prefix.is_empty() {
            anyhow::bail!("bot.command_prefix must not be empty");
        }
        parse_interval(&self.bot.command_cooldown).with_context(|| {
            format!("bot.command_cooldown is invalid: {}", self.bot.command_cooldown)
        })?;
        if self.bot.command_queue_size == 0 {
            anyhow::bail!("bot.command_queue_size must be at least 1");
        }
        if self.storage.queue_size == 0 {
            anyhow::bail!("storage.queue_size must be at least 1");
        }
        if self.gateway.api_timeout_secs == 0 {
            anyhow::bail!("gateway.api_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Default config as TOML, for `init-config`.
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).context("Failed to serialize default config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.gateway.ws_url, "ws://127.0.0.1:8080");
        assert_eq!(config.gateway.api_timeout_secs, 60);
        assert_eq!(config.bot.command_prefix, ".");
        assert_eq!(config.bot.command_queue_size, 100);
        assert_eq!(config.bot.cooldown(), Duration::from_secs(5));
        assert_eq!(config.events.ring_len, 0);
        assert_eq!(config.events.max_process_time(), Duration::from_secs(240));
        assert_eq!(config.storage.queue_size, 100);
        assert_eq!(config.scheduler.backend, TaskBackend::File);
        assert_eq!(config.bot.modules, vec!["schedule"]);
    }

    #[test]
    fn test_listen_addr() {
        let mut gw = GatewayConfig::default();
        assert_eq!(gw.listen_addr().unwrap(), "127.0.0.1:8080");
        gw.ws_url = "ws://0.0.0.0:6700/onebot".to_string();
        assert_eq!(gw.listen_addr().unwrap(), "0.0.0.0:6700");
        gw.ws_url = "localhost".to_string();
        assert_eq!(gw.listen_addr().unwrap(), "localhost:8080");
        gw.ws_url = "ws://".to_string();
        assert!(gw.listen_addr().is_err());
    }

    #[test]
    fn test_access_token_redacted_in_debug() {
        let gw = GatewayConfig {
            access_token: Some("hunter2".to_string()),
            ..GatewayConfig::default()
        };
        let debug = format!("{:?}", gw);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_bad_cooldown_falls_back() {
        let bot = BotConfig {
            command_cooldown: "soon".to_string(),
            ..BotConfig::default()
        };
        assert_eq!(bot.cooldown(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_toml_parses_back() {
        let text = Config::default_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.bot.command_prefix, ".");
        assert_eq!(parsed.gateway.ws_url, "ws://127.0.0.1:8080");
    }
}
