use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::engagement::cooldown::CooldownPolicy;
use crate::workflows::tagging::RetryPolicy;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineSettings::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs governing sweep cooldowns, tag-service retries, and mirror retention.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub rule_cooldown_hours: i64,
    pub recipient_cooldown_days: i64,
    pub tag_retry_attempts: usize,
    pub tag_retry_base_ms: u64,
    pub mirror_retention_days: i64,
}

impl EngineSettings {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            rule_cooldown_hours: read_numeric("ENGINE_RULE_COOLDOWN_HOURS", 1)?,
            recipient_cooldown_days: read_numeric("ENGINE_RECIPIENT_COOLDOWN_DAYS", 30)?,
            tag_retry_attempts: read_numeric("ENGINE_TAG_RETRY_ATTEMPTS", 3)?,
            tag_retry_base_ms: read_numeric("ENGINE_TAG_RETRY_BASE_MS", 250)?,
            mirror_retention_days: read_numeric("ENGINE_MIRROR_RETENTION_DAYS", 90)?,
        })
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy::new(self.rule_cooldown_hours, self.recipient_cooldown_days)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.tag_retry_attempts,
            Duration::from_millis(self.tag_retry_base_ms),
        )
    }

    pub fn mirror_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.mirror_retention_days.max(0))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rule_cooldown_hours: 1,
            recipient_cooldown_days: 30,
            tag_retry_attempts: 3,
            tag_retry_base_ms: 250,
            mirror_retention_days: 90,
        }
    }
}

fn read_numeric<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidEngineValue { name }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidEngineValue { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidEngineValue { name } => {
                write!(f, "{name} must be a non-negative number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidEngineValue { .. } => None,
        }
    }
}
