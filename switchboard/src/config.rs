use resolver::config::{
    LocalCacheConfig, ProjectConfig, RedisConfig, SyncConfig, ValidationError, validate_projects,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub redis: RedisConfig,
    pub local_cache: LocalCacheConfig,
    pub projects: HashMap<String, ProjectConfig>,
    pub sync: SyncConfig,
    /// No statsd endpoint configured means metrics are discarded.
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.redis.validate()?;
        self.local_cache.validate()?;
        self.sync.validate()?;
        validate_projects(&self.projects)?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    Load(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_YAML: &str = r#"
listener:
    host: 0.0.0.0
    port: 8080
redis:
    url: "redis://127.0.0.1:6379/0"
    pool_size: 8
    min_idle: 2
local_cache:
    max_size: 10000
    ttl_secs: 300
sync:
    enabled: true
    interval_secs: 30
    batch_size: 200
projects:
    acme:
        backends:
            - "http://10.0.0.1:8080"
            - "http://10.0.0.2:8080"
        database:
            host: db.acme.internal
            port: 5432
            user: router
            password: hunter2
            dbname: acme
metrics:
    statsd_host: 127.0.0.1
    statsd_port: 8125
"#;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn test_load_valid_config() {
        let tmp = write_tmp_file(VALID_YAML);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.redis.pool_size, 8);
        assert_eq!(config.local_cache.max_size, 10000);
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.projects["acme"].backends.len(), 2);
        assert_eq!(config.metrics.unwrap().statsd_port, 8125);
    }

    #[test]
    fn test_listener_and_metrics_are_optional() {
        let yaml = r#"
redis: {url: "redis://127.0.0.1:6379"}
local_cache: {max_size: 100, ttl_secs: 60}
sync: {enabled: false}
projects:
    acme:
        backends: ["http://10.0.0.1:8080"]
        database: {host: h, port: 5432, user: u, dbname: d}
"#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.listener.port, 8080);
        assert!(config.metrics.is_none());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let tmp = write_tmp_file("listener: [not, a, mapping");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_failure_is_fatal() {
        let yaml = r#"
redis: {url: "redis://127.0.0.1:6379"}
local_cache: {max_size: 0, ttl_secs: 60}
sync: {enabled: false}
projects:
    acme:
        backends: ["http://10.0.0.1:8080"]
        database: {host: h, port: 5432, user: u, dbname: d}
"#;
        let tmp = write_tmp_file(yaml);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(ValidationError::ZeroCacheSize))
        ));
    }
}
