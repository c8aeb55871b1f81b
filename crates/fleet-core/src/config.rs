//! Daemon configuration file parser.
//!
//! The file is TOML. Every key has a default except the ones that name
//! the repository, the asset pattern and the commands to run, which
//! `FleetConfig::validate` insists on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{format_duration, serde_str};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// `owner/name` of the repository whose releases are tracked.
    pub repo: String,
    pub github_token: Option<String>,
    pub github_api: String,
    /// Upper bound on a single release-source API call.
    #[serde(with = "serde_str")]
    pub github_timeout: Duration,
    pub save_assets_path: PathBuf,
    /// Regex matched against release asset names.
    pub package_name_pattern: String,
    pub include_prerelease: bool,

    pub deploy_command: String,
    pub rollback_command: Option<String>,
    pub healthcheck_command: String,
    pub version_command: String,

    #[serde(with = "serde_str")]
    pub healthcheck_interval: Duration,
    pub healthcheck_retries: u32,
    #[serde(with = "serde_str")]
    pub healthcheck_timeout: Duration,
    #[serde(with = "serde_str")]
    pub canary_rollout_window: Duration,
    #[serde(with = "serde_str")]
    pub rollout_window: Duration,
    #[serde(with = "serde_str")]
    pub repository_polling_interval: Duration,
    #[serde(with = "serde_str")]
    pub deploy_timeout: Duration,
    #[serde(with = "serde_str")]
    pub version_timeout: Duration,

    pub log_level: String,
    pub log_format: LogFormat,
    /// Member identity override. Defaults to the host name.
    pub member_name: Option<String>,

    pub redis: RedisConfig,
    pub locks: LockConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            repo: String::new(),
            github_token: None,
            github_api: "https://api.github.com".to_string(),
            github_timeout: Duration::from_secs(30),
            save_assets_path: PathBuf::from("/usr/local/src"),
            package_name_pattern: String::new(),
            include_prerelease: false,
            deploy_command: String::new(),
            rollback_command: None,
            healthcheck_command: String::new(),
            version_command: String::new(),
            healthcheck_interval: Duration::from_secs(60),
            healthcheck_retries: 3,
            healthcheck_timeout: Duration::from_secs(30),
            canary_rollout_window: Duration::from_secs(5 * 60),
            rollout_window: Duration::from_secs(60),
            repository_polling_interval: Duration::from_secs(5 * 60),
            deploy_timeout: Duration::from_secs(5 * 60),
            version_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            member_name: None,
            redis: RedisConfig::default(),
            locks: LockConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Prefix for every key. Falls back to `repo` when unset.
    pub key_prefix: Option<String>,
    /// Upper bound on a single store round trip.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 1,
            key_prefix: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Lock and member-record TTLs, as multiples of the window they guard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub canary_ttl_factor: u32,
    pub rollout_ttl_factor: u32,
    pub member_ttl_factor: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            canary_ttl_factor: 2,
            rollout_ttl_factor: 1,
            member_ttl_factor: 2,
        }
    }
}

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Upper bound for every configured duration and every value derived from
/// one (lock TTLs, the health-check burst deadline).
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Prefix applied to every shared-store key.
    pub fn key_prefix(&self) -> &str {
        match self.redis.key_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => &self.repo,
        }
    }

    /// Split `repo` into `(owner, name)`.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.repo.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }

    /// Rollback command, treating an empty string as unset.
    pub fn rollback_command(&self) -> Option<&str> {
        self.rollback_command.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner_and_name().is_none() {
            return Err(invalid(format!(
                "repo must be `owner/name`, got {:?}",
                self.repo
            )));
        }

        let required = [
            ("package_name_pattern", &self.package_name_pattern),
            ("deploy_command", &self.deploy_command),
            ("healthcheck_command", &self.healthcheck_command),
            ("version_command", &self.version_command),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(invalid(format!("{key} is required")));
            }
        }

        if self.save_assets_path.as_os_str().is_empty() {
            return Err(invalid("save_assets_path is required".to_string()));
        }

        let durations = [
            ("healthcheck_interval", self.healthcheck_interval),
            ("healthcheck_timeout", self.healthcheck_timeout),
            ("canary_rollout_window", self.canary_rollout_window),
            ("rollout_window", self.rollout_window),
            ("repository_polling_interval", self.repository_polling_interval),
            ("deploy_timeout", self.deploy_timeout),
            ("version_timeout", self.version_timeout),
            ("github_timeout", self.github_timeout),
            ("redis.timeout", self.redis.timeout),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(invalid(format!("{key} must be greater than zero")));
            }
            if value > MAX_DURATION {
                return Err(invalid(format!(
                    "{key} must not exceed {}",
                    format_duration(MAX_DURATION)
                )));
            }
        }

        if self.healthcheck_retries == 0 {
            return Err(invalid("healthcheck_retries must be at least 1".to_string()));
        }

        let factors = [
            ("locks.canary_ttl_factor", self.locks.canary_ttl_factor),
            ("locks.rollout_ttl_factor", self.locks.rollout_ttl_factor),
            ("locks.member_ttl_factor", self.locks.member_ttl_factor),
        ];
        for (key, value) in factors {
            if value == 0 {
                return Err(invalid(format!("{key} must be at least 1")));
            }
        }

        let derived = [
            (
                "canary lock TTL",
                self.canary_rollout_window
                    .checked_mul(self.locks.canary_ttl_factor),
            ),
            (
                "rollout lock TTL",
                self.rollout_window.checked_mul(self.locks.rollout_ttl_factor),
            ),
            (
                "member record TTL",
                self.rollout_window.checked_mul(self.locks.member_ttl_factor),
            ),
            (
                "health-check burst deadline",
                self.healthcheck_timeout
                    .checked_add(self.healthcheck_interval)
                    .and_then(|d| d.checked_mul(self.healthcheck_retries)),
            ),
        ];
        for (what, value) in derived {
            if value.is_none_or(|d| d > MAX_DURATION) {
                return Err(invalid(format!(
                    "{what} must not exceed {}; lower the window, factor or retries",
                    format_duration(MAX_DURATION)
                )));
            }
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(invalid(format!("invalid log level: {}", self.log_level)));
        }

        if self.redis.host.trim().is_empty() {
            return Err(invalid("redis.host is required".to_string()));
        }
        if self.redis.port == 0 {
            return Err(invalid("redis.port must not be 0".to_string()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
repo = "acme/widget"
package_name_pattern = "linux_amd64\\.tar\\.gz$"
deploy_command = "tar xzf $ASSET_FILE -C /opt/widget"
healthcheck_command = "curl -fsS localhost:8080/healthz"
version_command = "cat /opt/widget/VERSION"
"#;

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.repo, "acme/widget");
        assert_eq!(config.healthcheck_retries, 3);
        assert_eq!(config.canary_rollout_window, Duration::from_secs(300));
        assert_eq!(config.rollout_window, Duration::from_secs(60));
        assert_eq!(config.deploy_timeout, Duration::from_secs(300));
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.locks.canary_ttl_factor, 2);
        assert_eq!(config.locks.rollout_ttl_factor, 1);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.rollback_command().is_none());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = format!(
            r#"{MINIMAL}
rollback_command = "widget-rollback"
healthcheck_interval = "10s"
healthcheck_timeout = 5
canary_rollout_window = "15m"
log_level = "debug"
log_format = "text"

[redis]
host = "redis.internal"
key_prefix = "widget"
timeout = "250ms"

[locks]
canary_ttl_factor = 3
"#
        );
        let config = FleetConfig::from_toml_str(&toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.rollback_command(), Some("widget-rollback"));
        assert_eq!(config.healthcheck_interval, Duration::from_secs(10));
        assert_eq!(config.healthcheck_timeout, Duration::from_secs(5));
        assert_eq!(config.canary_rollout_window, Duration::from_secs(900));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.redis.timeout, Duration::from_millis(250));
        assert_eq!(config.key_prefix(), "widget");
        assert_eq!(config.locks.canary_ttl_factor, 3);
        assert_eq!(config.locks.member_ttl_factor, 2);
    }

    #[test]
    fn key_prefix_falls_back_to_repo() {
        let config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.key_prefix(), "acme/widget");
    }

    #[test]
    fn rejects_bad_repo() {
        for repo in ["widget", "acme/", "/widget", "a/b/c"] {
            let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
            config.repo = repo.to_string();
            assert!(config.validate().is_err(), "{repo} should be rejected");
        }
    }

    #[test]
    fn rejects_missing_commands() {
        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.healthcheck_command = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("healthcheck_command"));
    }

    #[test]
    fn rejects_zero_retries_and_factors() {
        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.healthcheck_retries = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.locks.rollout_ttl_factor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overflowing_derived_durations() {
        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.canary_rollout_window = Duration::from_secs(u64::MAX / 2);
        assert!(config.validate().is_err());

        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.locks.canary_ttl_factor = u32::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("canary lock TTL"), "{err}");

        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.healthcheck_retries = u32::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("burst deadline"), "{err}");

        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.rollout_window = Duration::from_secs(200 * 24 * 60 * 60);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("member record TTL"), "{err}");
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_duration_string() {
        let toml_str = format!("{MINIMAL}\nrollout_window = \"soon\"\n");
        assert!(matches!(
            FleetConfig::from_toml_str(&toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn empty_rollback_command_is_unset() {
        let mut config = FleetConfig::from_toml_str(MINIMAL).unwrap();
        config.rollback_command = Some(String::new());
        assert!(config.rollback_command().is_none());
    }
}
