/// Configuration management
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum chat message length accepted by the relay.
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 255;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay endpoint URL (POST target for sync requests)
    pub relay_url: String,

    /// Interval between sync cycles
    pub sync_interval: Duration,

    /// Connect/read timeout for a single relay request
    pub request_timeout: Duration,

    /// Base delay for exponential backoff after a failed sync
    pub backoff_base: Duration,

    /// Cap for the backoff delay
    pub backoff_max: Duration,

    /// Peer locations older than this are pruned
    pub peer_stale_timeout: Duration,

    /// Cached own location older than this is not used as a fallback
    pub location_max_age: Duration,

    /// Fix accuracy (meters) at or below which GPS counts as high accuracy
    pub accuracy_threshold_meters: f64,

    /// Maximum chat message length, in characters
    pub max_message_length: usize,

    /// Optional data directory for the persisted last-known-location cache
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "https://relay.ridelink.example/sync".to_string(),
            sync_interval: Duration::from_secs(8),
            request_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            peer_stale_timeout: Duration::from_secs(5 * 60),
            location_max_age: Duration::from_secs(5 * 60),
            accuracy_threshold_meters: 20.0,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            data_dir: None,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(EngineError::Config(format!(
                "Usage: {} <relay-url> [--interval-secs <n>] [--timeout-secs <n>] [--stale-secs <n>] [--data-dir <path>]",
                args.first().unwrap_or(&"ridelink".to_string())
            )));
        }

        let mut config = Config {
            relay_url: args[1].clone(),
            ..Default::default()
        };

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--interval-secs" => {
                    config.sync_interval = Duration::from_secs(parse_secs(args.get(i + 1), "--interval-secs")?);
                    i += 2;
                }
                "--timeout-secs" => {
                    config.request_timeout = Duration::from_secs(parse_secs(args.get(i + 1), "--timeout-secs")?);
                    i += 2;
                }
                "--stale-secs" => {
                    let secs = parse_secs(args.get(i + 1), "--stale-secs")?;
                    config.peer_stale_timeout = Duration::from_secs(secs);
                    config.location_max_age = Duration::from_secs(secs);
                    i += 2;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        EngineError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                other => {
                    return Err(EngineError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("RIDELINK_RELAY_URL") {
            config.relay_url = url;
        }
        if let Ok(dir) = std::env::var("RIDELINK_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("http://") && !self.relay_url.starts_with("https://") {
            return Err(EngineError::Config(format!(
                "Relay URL must be http(s): {}",
                self.relay_url
            )));
        }
        if self.sync_interval.is_zero() {
            return Err(EngineError::Config("Sync interval must be non-zero".to_string()));
        }
        if self.max_message_length == 0 {
            return Err(EngineError::Config("Max message length must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn parse_secs(arg: Option<&String>, flag: &str) -> Result<u64> {
    let raw = arg.ok_or_else(|| {
        EngineError::Config(format!("{} requires a seconds argument", flag))
    })?;
    raw.parse::<u64>()
        .map_err(|_| EngineError::Config(format!("{} must be a whole number of seconds", flag)))
}
