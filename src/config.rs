use crate::engine::queue::DEFAULT_QUEUE_CAPACITY;
use crate::executor::DEFAULT_MAX_CONCURRENCY;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "GEO_BATCH_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Work units the queue holds before producers wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Lookups allowed to run at once, across all batches
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
    #[serde(default = "default_geoip_base_url")]
    pub geoip_base_url: String,
    /// Prefix for the status URL handed back on submission
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrency: default_max_concurrency(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            geoip_base_url: default_geoip_base_url(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl EngineConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.lookup_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "lookup_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_lookup_timeout_secs() -> u64 {
    10
}

fn default_geoip_base_url() -> String {
    "https://freegeoip.app/".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/geo-batch.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_key: &str,
    repo_default: PathBuf,
) -> Option<PathBuf> {
    if let Some(path) = raw_path {
        return Some(path);
    }

    if let Ok(value) = std::env::var(env_key) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    repo_default.exists().then_some(repo_default)
}

/// CLI path first, then `GEO_BATCH_CONFIG`, then `config/geo-batch.toml`
/// if present. `None` means run on defaults.
pub fn resolve_config_path(raw_path: Option<PathBuf>) -> Option<PathBuf> {
    resolve_config_path_with_overrides(raw_path, CONFIG_ENV_VAR, repo_default_config_path())
}

pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: EngineConfig = toml::from_str(&content)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_config(contents: &str, label: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "geo-batch-config-{label}-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time after unix epoch")
                .as_nanos()
        ));
        std::fs::write(&path, contents).expect("write temp config");
        path
    }

    #[test]
    fn defaults_match_engine_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.max_concurrency, 5);
        assert_eq!(cfg.lookup_timeout(), Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = write_temp_config("max_concurrency = 2\n", "partial");
        let cfg = load_config(&path).expect("config should parse");
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.max_concurrency, 2);
        assert_eq!(cfg.queue_capacity, 1000);
        assert_eq!(cfg.geoip_base_url, "https://freegeoip.app/");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let path = write_temp_config("workers = 3\n", "unknown");
        let err = load_config(&path).expect_err("unknown key should fail");
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, ConfigError::Parse(_)), "unexpected error: {err}");
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let path = write_temp_config("max_concurrency = 0\n", "zero");
        let err = load_config(&path).expect_err("zero concurrency should fail");
        std::fs::remove_file(&path).ok();

        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn missing_file_reports_path() {
        let path = std::env::temp_dir().join("geo-batch-missing-config-does-not-exist.toml");
        let err = load_config(&path).expect_err("missing config path should fail");
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn cli_path_wins() {
        let chosen = resolve_config_path_with_overrides(
            Some(PathBuf::from("/tmp/cli.toml")),
            "GEO_BATCH_CONFIG_TEST_UNSET",
            PathBuf::from("/tmp/repo.toml"),
        );
        assert_eq!(chosen, Some(PathBuf::from("/tmp/cli.toml")));
    }

    #[test]
    fn absent_files_fall_back_to_defaults() {
        let chosen = resolve_config_path_with_overrides(
            None,
            "GEO_BATCH_CONFIG_TEST_UNSET",
            PathBuf::from("/nonexistent/geo-batch.toml"),
        );
        assert_eq!(chosen, None);
    }
}
