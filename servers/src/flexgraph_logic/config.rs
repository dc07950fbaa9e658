use anyhow::{Context, Result};
use clap::Parser;
use lib_flexgraph::{EngineConfig, WindowAnchor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_flexgraph.json";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live multi-instrument graph data service", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FLEXGRAPH_PORT", help = "Port to listen on for HTTP clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "FLEXGRAPH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FLEXGRAPH_DISPLAY_DIR", help = "Directory holding axes/modes/markers/lines/tooltip JSON tables.")]
    pub display_dir: Option<PathBuf>,

    #[clap(long, env = "FLEXGRAPH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FLEXGRAPH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FLEXGRAPH_REDIS_URL", help = "Redis connection URL.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "FLEXGRAPH_KEY_PATTERN", help = "Key glob in the form prefix:instrument:timestamp.")]
    pub key_pattern: Option<String>,

    #[clap(long, env = "FLEXGRAPH_BUFFER_CAPACITY", help = "Records kept per instrument.")]
    pub buffer_capacity: Option<usize>,

    #[clap(long, env = "FLEXGRAPH_POLL_INTERVAL_MS", help = "Delay between poll cycles in milliseconds.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "FLEXGRAPH_STORE_TIMEOUT_MS", help = "Timeout of a single store call in milliseconds.")]
    pub store_timeout_ms: Option<u64>,

    #[clap(long, env = "FLEXGRAPH_FETCH_BATCH_SIZE", help = "Keys fetched per round trip.")]
    pub fetch_batch_size: Option<usize>,

    #[clap(long, env = "FLEXGRAPH_SEEN_HORIZON_SECONDS", help = "Seen-key horizon in seconds (0 keeps every key).")]
    pub seen_horizon_seconds: Option<u64>,

    #[clap(long, env = "FLEXGRAPH_BACKOFF_BASE_MS", help = "First retry delay after a store failure.")]
    pub backoff_base_ms: Option<u64>,

    #[clap(long, env = "FLEXGRAPH_BACKOFF_MAX_MS", help = "Maximum retry delay after store failures.")]
    pub backoff_max_ms: Option<u64>,

    #[clap(long, env = "FLEXGRAPH_WINDOW_ANCHOR", help = "Time window anchor: wallClock or latestRecord.")]
    pub window_anchor: Option<String>,

    #[clap(long, env = "FLEXGRAPH_STALL_CHECK_INTERVAL_SECONDS", help = "Interval in seconds between dataflow checks.")]
    pub stall_check_interval_seconds: Option<u64>,

    #[clap(long, env = "FLEXGRAPH_STALL_THRESHOLD_SECONDS", help = "Seconds without accepted records before warning.")]
    pub stall_threshold_seconds: Option<u64>,
}

impl Config {
    /// Built-in defaults, the lowest precedence layer.
    pub fn defaults() -> Config {
        Config {
            port: Some(9010),
            display_dir: Some(PathBuf::from("./config")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            redis_url: Some("redis://127.0.0.1/".to_string()),
            stall_check_interval_seconds: Some(10),
            stall_threshold_seconds: Some(60),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            display_dir: other.display_dir.or(self.display_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            redis_url: other.redis_url.or(self.redis_url),
            key_pattern: other.key_pattern.or(self.key_pattern),
            buffer_capacity: other.buffer_capacity.or(self.buffer_capacity),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            store_timeout_ms: other.store_timeout_ms.or(self.store_timeout_ms),
            fetch_batch_size: other.fetch_batch_size.or(self.fetch_batch_size),
            seen_horizon_seconds: other.seen_horizon_seconds.or(self.seen_horizon_seconds),
            backoff_base_ms: other.backoff_base_ms.or(self.backoff_base_ms),
            backoff_max_ms: other.backoff_max_ms.or(self.backoff_max_ms),
            window_anchor: other.window_anchor.or(self.window_anchor),
            stall_check_interval_seconds: other.stall_check_interval_seconds.or(self.stall_check_interval_seconds),
            stall_threshold_seconds: other.stall_threshold_seconds.or(self.stall_threshold_seconds),
        }
    }

    /// Engine settings: library defaults overlaid with whatever this config sets.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = EngineConfig::default();
        if let Some(pattern) = &self.key_pattern {
            engine.key_pattern = pattern.clone();
        }
        if let Some(v) = self.buffer_capacity {
            engine.buffer_capacity = v;
        }
        if let Some(v) = self.poll_interval_ms {
            engine.poll_interval_ms = v;
        }
        if let Some(v) = self.store_timeout_ms {
            engine.store_timeout_ms = v;
        }
        if let Some(v) = self.fetch_batch_size {
            engine.fetch_batch_size = v;
        }
        if let Some(v) = self.seen_horizon_seconds {
            engine.seen_horizon_seconds = v;
        }
        if let Some(v) = self.backoff_base_ms {
            engine.backoff_base_ms = v;
        }
        if let Some(v) = self.backoff_max_ms {
            engine.backoff_max_ms = v;
        }
        if let Some(anchor) = &self.window_anchor {
            engine.window_anchor = parse_anchor(anchor)?;
        }
        engine.validate().context("Invalid engine configuration")?;
        Ok(engine)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9010)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }
}

fn parse_anchor(raw: &str) -> Result<WindowAnchor> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("Unknown window anchor '{}', expected wallClock or latestRecord", raw))
}

/// Reads a JSON config file. A missing file is not an error.
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(Some(file_config))
}

/// Layers defaults < config file < `cli` (which already carries env vars).
pub fn load_config_from(cli: Config) -> Result<Config> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }
    Ok(current_config.merge(cli))
}

/// Loads `.env`, then parses CLI flags and environment variables.
pub fn load_config() -> Result<Config> {
    dotenvy::dotenv().ok();
    load_config_from(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flexgraph.json");
        fs::write(
            &path,
            r#"{"port": 8000, "logLevel": "debug", "keyPattern": "tick:*:*", "bufferCapacity": 50}"#,
        )
        .unwrap();

        let cli = Config {
            config_path: Some(path),
            port: Some(9100),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();

        assert_eq!(config.port(), 9100);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.key_pattern, "tick:*:*");
        assert_eq!(engine.buffer_capacity, 50);
        assert_eq!(engine.poll_interval_ms, 500);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cli = Config {
            config_path: Some(PathBuf::from("/definitely/not/here.json")),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();
        assert_eq!(config.port(), 9010);
        assert_eq!(config.engine_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let cli = Config {
            config_path: Some(path),
            ..Default::default()
        };
        assert!(load_config_from(cli).is_err());
    }

    #[test]
    fn window_anchor_and_validation() {
        let config = Config {
            window_anchor: Some("latestRecord".to_string()),
            ..Default::default()
        };
        assert_eq!(config.engine_config().unwrap().window_anchor, WindowAnchor::LatestRecord);

        let bad_anchor = Config {
            window_anchor: Some("sundial".to_string()),
            ..Default::default()
        };
        assert!(bad_anchor.engine_config().is_err());

        let zero_capacity = Config {
            buffer_capacity: Some(0),
            ..Default::default()
        };
        assert!(zero_capacity.engine_config().is_err());
    }
}
