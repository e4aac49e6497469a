//! Environment-backed runtime configuration for `applypath-smoke`.

use std::{
    env,
    error::Error,
    fmt,
    path::PathBuf,
    time::Duration,
};

use resilience_core::{DispatcherConfig, ReplayConfig, RetryPolicy};
use url::Url;

const DEFAULT_DATA_DIR: &str = "./.applypath-smoke-store";
const SNAPSHOT_FILENAME: &str = ".applypath-session-snapshot.json";
const DEFAULT_OP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_READ_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_READ_BASE_DELAY_MS: u64 = 500;
const DEFAULT_REPLAY_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_REPLAY_BASE_DELAY_MS: u64 = 1_000;

/// Runtime configuration used by the smoke harness.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Backend endpoint the harness pretends to talk to.
    pub endpoint: String,
    /// Local data directory for the session snapshot.
    pub data_dir: PathBuf,
    /// Wait budget for gate-deferred operations.
    pub op_timeout_ms: u64,
    /// Read retry attempts.
    pub read_max_attempts: u32,
    /// Read retry base delay.
    pub read_base_delay_ms: u64,
    /// Replay budget for queued mutations.
    pub replay_max_attempts: u32,
    /// Replay backoff base delay.
    pub replay_base_delay_ms: u64,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let endpoint_raw = optional_trimmed_env("APPLYPATH_ENDPOINT", &mut lookup)
            .unwrap_or_else(|| "https://api.applypath.example".to_owned());
        let endpoint = normalize_endpoint(&endpoint_raw).map_err(|reason| {
            ConfigError::InvalidValue {
                key: "APPLYPATH_ENDPOINT",
                value: endpoint_raw,
                reason,
            }
        })?;

        let data_dir = optional_trimmed_env("APPLYPATH_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let op_timeout_ms =
            parse_optional_u64("APPLYPATH_OP_TIMEOUT_MS", DEFAULT_OP_TIMEOUT_MS, &mut lookup)?;
        let read_max_attempts = parse_optional_u32(
            "APPLYPATH_READ_MAX_ATTEMPTS",
            DEFAULT_READ_MAX_ATTEMPTS,
            &mut lookup,
        )?;
        let read_base_delay_ms = parse_optional_u64(
            "APPLYPATH_READ_BASE_DELAY_MS",
            DEFAULT_READ_BASE_DELAY_MS,
            &mut lookup,
        )?;
        let replay_max_attempts = parse_optional_u32(
            "APPLYPATH_REPLAY_MAX_ATTEMPTS",
            DEFAULT_REPLAY_MAX_ATTEMPTS,
            &mut lookup,
        )?;
        let replay_base_delay_ms = parse_optional_u64(
            "APPLYPATH_REPLAY_BASE_DELAY_MS",
            DEFAULT_REPLAY_BASE_DELAY_MS,
            &mut lookup,
        )?;

        if op_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "APPLYPATH_OP_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if read_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "APPLYPATH_READ_MAX_ATTEMPTS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            endpoint,
            data_dir,
            op_timeout_ms,
            read_max_attempts,
            read_base_delay_ms,
            replay_max_attempts,
            replay_base_delay_ms,
        })
    }

    /// Location of the persisted session snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILENAME)
    }

    /// Dispatcher tuning derived from the environment.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            default_op_timeout: Duration::from_millis(self.op_timeout_ms),
            replay: ReplayConfig::new(
                self.replay_max_attempts,
                self.replay_base_delay_ms,
                60_000,
            ),
        }
    }

    /// Retry policy used by the harness's read call sites.
    pub fn read_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.read_max_attempts, self.read_base_delay_ms, 30_000)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

/// Normalize a backend endpoint to a canonical https URL.
pub fn normalize_endpoint(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("endpoint is required".to_owned());
    }

    let candidate = if let Some(rest) = raw.strip_prefix("https://") {
        format!("https://{}", rest.trim())
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("https://{}", rest.trim())
    } else if raw.contains("://") {
        return Err("only https endpoints are supported".to_owned());
    } else {
        format!("https://{raw}")
    };

    let parsed = Url::parse(&candidate).map_err(|err| format!("invalid endpoint URL: {err}"))?;
    if parsed.host_str().is_none() {
        return Err("endpoint must include a host".to_owned());
    }

    Ok(parsed.as_str().trim_end_matches('/').to_owned())
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u32<F>(key: &'static str, default: u32, lookup: &mut F) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value.parse::<u32>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_optional_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value.parse::<u64>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}
