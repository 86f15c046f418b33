use crate::filter::FilterSpec;
use std::env;
use std::path::PathBuf;

/// Dashboard settings loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// Seconds of silence before a row is timed out
    pub timeout_secs: i64,
    pub tick_interval_ms: u64,
    /// Delay step between staggered child subscriptions
    pub stagger_ms: u64,
    /// Latest runs watched per port
    pub run_window: usize,
    /// Cap on range-mode run queries
    pub page_size: usize,
    pub channel_buffer: usize,
    /// JSONL document feed replayed into the local store
    pub feed_path: Option<PathBuf>,
    pub rust_log: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 500,
            tick_interval_ms: 1000,
            stagger_ms: 100,
            run_window: 3,
            page_size: 100,
            channel_buffer: 1000,
            feed_path: None,
            rust_log: "info".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeout_secs = positive(&lookup, "GRID_TIMEOUT_SECS", defaults.timeout_secs as u64)? as i64;
        let tick_interval_ms = positive(&lookup, "GRID_TICK_INTERVAL_MS", defaults.tick_interval_ms)?;
        let stagger_ms = positive(&lookup, "SUBSCRIPTION_STAGGER_MS", defaults.stagger_ms)?;
        let run_window = positive(&lookup, "RUN_WINDOW", defaults.run_window as u64)? as usize;
        let page_size = positive(&lookup, "QUERY_PAGE_SIZE", defaults.page_size as u64)? as usize;
        let channel_buffer =
            positive(&lookup, "GRID_CHANNEL_BUFFER", defaults.channel_buffer as u64)? as usize;

        let feed_path = lookup("GRID_FEED_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let rust_log = lookup("RUST_LOG").unwrap_or(defaults.rust_log);

        Ok(Self {
            timeout_secs,
            tick_interval_ms,
            stagger_ms,
            run_window,
            page_size,
            channel_buffer,
            feed_path,
            rust_log,
        })
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!("{} must be greater than zero", key))),
        Ok(value) => Ok(value),
        Err(_) => Err(ConfigError::InvalidValue(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}

/// Parse `key=value` command line arguments into a filter.
///
/// Arguments without `=` are ignored.
pub fn filter_from_args<I>(args: I) -> FilterSpec
where
    I: IntoIterator<Item = String>,
{
    let pairs: Vec<(String, String)> = args
        .into_iter()
        .filter_map(|arg| {
            let (key, value) = arg.split_once('=')?;
            Some((key.trim_start_matches('-').to_string(), value.to_string()))
        })
        .collect();
    FilterSpec::from_params(pairs)
}
