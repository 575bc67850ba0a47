use std::str::FromStr;
use std::time::Duration;

use showrunner_core::MediaPolicy;

/// What to do when a frame update names a frame the document lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFramePolicy {
    /// Log and return the document unchanged. Suits deployments where such
    /// updates are races with frame creation.
    #[default]
    Skip,
    /// Fail the update with [`SyncError::UnknownFrame`](crate::SyncError::UnknownFrame).
    Reject,
}

impl FromStr for UnknownFramePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::invalid(
                "SYNC_UNKNOWN_FRAME_POLICY",
                "one of: skip, reject",
                other,
            )),
        }
    }
}

/// Sync engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for a store with sub-second read
/// propagation. Tune the two timings to the store's real latency.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pause between a persist and its verification read.
    pub verify_delay: Duration,
    /// How long a confirmed write keeps lagging snapshots out.
    pub pending_write_ttl: Duration,
    /// Bound of the write serializer's mailbox.
    pub queue_capacity: usize,
    pub unknown_frame_policy: UnknownFramePolicy,
    /// Which media references count as durable.
    pub media: MediaPolicy,
    /// Identity stamped into `updatedBy` on every persist.
    pub editor: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            verify_delay: Duration::from_millis(250),
            pending_write_ttl: Duration::from_millis(5_000),
            queue_capacity: 1024,
            unknown_frame_policy: UnknownFramePolicy::Skip,
            media: MediaPolicy::default(),
            editor: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `SYNC_VERIFY_DELAY_MS`      | `250`   |
    /// | `SYNC_PENDING_WRITE_TTL_MS` | `5000`  |
    /// | `SYNC_QUEUE_CAPACITY`       | `1024`  |
    /// | `SYNC_UNKNOWN_FRAME_POLICY` | `skip`  |
    /// | `SYNC_DURABLE_HOSTS`        | (any)   |
    /// | `SYNC_ALLOW_INSECURE_MEDIA` | `false` |
    /// | `SYNC_EDITOR`               | (none)  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let verify_delay = match lookup("SYNC_VERIFY_DELAY_MS") {
            Some(v) => Duration::from_millis(parse_u64("SYNC_VERIFY_DELAY_MS", &v)?),
            None => defaults.verify_delay,
        };

        let pending_write_ttl = match lookup("SYNC_PENDING_WRITE_TTL_MS") {
            Some(v) => Duration::from_millis(parse_u64("SYNC_PENDING_WRITE_TTL_MS", &v)?),
            None => defaults.pending_write_ttl,
        };

        let queue_capacity = match lookup("SYNC_QUEUE_CAPACITY") {
            Some(v) => match parse_u64("SYNC_QUEUE_CAPACITY", &v)? {
                0 => {
                    return Err(ConfigError::invalid(
                        "SYNC_QUEUE_CAPACITY",
                        "a positive integer",
                        &v,
                    ))
                }
                n => n as usize,
            },
            None => defaults.queue_capacity,
        };

        let unknown_frame_policy = match lookup("SYNC_UNKNOWN_FRAME_POLICY") {
            Some(v) => v.parse()?,
            None => defaults.unknown_frame_policy,
        };

        let durable_hosts: Vec<String> = lookup("SYNC_DURABLE_HOSTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let allow_insecure = match lookup("SYNC_ALLOW_INSECURE_MEDIA") {
            Some(v) => parse_bool("SYNC_ALLOW_INSECURE_MEDIA", &v)?,
            None => false,
        };

        let editor = lookup("SYNC_EDITOR")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            verify_delay,
            pending_write_ttl,
            queue_capacity,
            unknown_frame_policy,
            media: MediaPolicy {
                durable_hosts,
                allow_insecure,
            },
            editor,
        })
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(var, "a non-negative integer", value))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(var, "a boolean", value)),
    }
}

/// An environment variable held a value that could not be used.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be {expected}, got '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub expected: &'static str,
    pub value: String,
}

impl ConfigError {
    fn invalid(var: &'static str, expected: &'static str, value: &str) -> Self {
        Self {
            var,
            expected,
            value: value.to_string(),
        }
    }
}
