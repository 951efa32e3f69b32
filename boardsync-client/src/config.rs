//! Configuration for a boardsync session.
//!
//! Configuration is loaded from a TOML file; every field has a default, so an
//! empty file (or no file) is valid.
//!
//! ```toml
//! [reconnect]
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! jitter_ratio = 0.25
//!
//! [heartbeat]
//! interval_ms = 5000
//! timeout_multiplier = 3
//! handshake_timeout_ms = 10000
//! write_timeout_ms = 10000
//!
//! [sequencer]
//! gap_window_ms = 2000
//! max_buffered_events = 1024
//! max_pending_actions = 1024
//! resync_policy = "resubmit"
//!
//! [codec]
//! max_consecutive_decode_errors = 3
//! ```

use boardsync_core::{BackoffPolicy, PipelineConfig, ResyncPolicy, SequencerLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Liveness detection.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Inbound ordering and outbound queue.
    #[serde(default)]
    pub sequencer: SequencerConfig,
    /// Frame decoding.
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First reconnect delay in milliseconds (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay ceiling in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random jitter as a fraction of the exponential delay (default: 0.25).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

/// Liveness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval while Live, in milliseconds (default: 5000).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// Silence longer than `interval_ms * timeout_multiplier` drops the
    /// connection (default: 3).
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: u32,
    /// Time allowed for the server to acknowledge the Hello, in
    /// milliseconds (default: 10000).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// A single write blocked longer than this drops the connection, in
    /// milliseconds (default: 10000).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Sequencer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// How long a gap may stay open before a resync, in milliseconds
    /// (default: 2000).
    #[serde(default = "default_gap_window_ms")]
    pub gap_window_ms: u64,
    /// Maximum events buffered behind a gap (default: 1024).
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
    /// Maximum unresolved local actions (default: 1024).
    #[serde(default = "default_max_pending_actions")]
    pub max_pending_actions: usize,
    /// What to do with unacknowledged actions after a reconnect
    /// (default: resubmit).
    #[serde(default)]
    pub resync_policy: ResyncPolicy,
}

/// Codec configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Consecutive undecodable frames tolerated before the connection is
    /// treated as broken (default: 3).
    #[serde(default = "default_max_consecutive_decode_errors")]
    pub max_consecutive_decode_errors: u32,
}

// Default value functions
fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ratio() -> f64 {
    0.25
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_timeout_multiplier() -> u32 {
    3
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_gap_window_ms() -> u64 {
    2_000
}

fn default_max_buffered_events() -> usize {
    1_024
}

fn default_max_pending_actions() -> usize {
    1_024
}

fn default_max_consecutive_decode_errors() -> u32 {
    3
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            timeout_multiplier: default_timeout_multiplier(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            gap_window_ms: default_gap_window_ms(),
            max_buffered_events: default_max_buffered_events(),
            max_pending_actions: default_max_pending_actions(),
            resync_policy: ResyncPolicy::default(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_consecutive_decode_errors: default_max_consecutive_decode_errors(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Check that the values make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconnect;
        if r.base_delay_ms == 0 {
            return Err(invalid("reconnect.base_delay_ms must be greater than 0"));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return Err(invalid(
                "reconnect.base_delay_ms must not exceed reconnect.max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&r.jitter_ratio) {
            return Err(invalid("reconnect.jitter_ratio must be between 0.0 and 1.0"));
        }
        check_timer("reconnect.max_delay_ms", r.max_delay_ms)?;

        let h = &self.heartbeat;
        if h.interval_ms == 0 {
            return Err(invalid("heartbeat.interval_ms must be greater than 0"));
        }
        if h.timeout_multiplier == 0 {
            return Err(invalid("heartbeat.timeout_multiplier must be greater than 0"));
        }
        if h.handshake_timeout_ms == 0 {
            return Err(invalid("heartbeat.handshake_timeout_ms must be greater than 0"));
        }
        if h.write_timeout_ms == 0 {
            return Err(invalid("heartbeat.write_timeout_ms must be greater than 0"));
        }
        check_timer("heartbeat.interval_ms", h.interval_ms)?;
        check_timer("heartbeat.handshake_timeout_ms", h.handshake_timeout_ms)?;
        check_timer("heartbeat.write_timeout_ms", h.write_timeout_ms)?;
        let silence = h
            .interval_ms
            .checked_mul(u64::from(h.timeout_multiplier))
            .filter(|ms| *ms <= MAX_TIMER_MS);
        if silence.is_none() {
            return Err(invalid(
                "heartbeat.interval_ms * heartbeat.timeout_multiplier must not exceed 24 hours",
            ));
        }

        let s = &self.sequencer;
        if s.gap_window_ms == 0 {
            return Err(invalid("sequencer.gap_window_ms must be greater than 0"));
        }
        check_timer("sequencer.gap_window_ms", s.gap_window_ms)?;
        if s.max_buffered_events == 0 {
            return Err(invalid("sequencer.max_buffered_events must be greater than 0"));
        }
        if s.max_pending_actions == 0 {
            return Err(invalid("sequencer.max_pending_actions must be greater than 0"));
        }

        if self.codec.max_consecutive_decode_errors == 0 {
            return Err(invalid(
                "codec.max_consecutive_decode_errors must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Backoff policy for reconnects.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.reconnect.base_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
            self.reconnect.jitter_ratio,
        )
    }

    /// Settings for the synchronization pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sequencer: SequencerLimits {
                gap_window_ms: self.sequencer.gap_window_ms,
                max_buffered: self.sequencer.max_buffered_events,
            },
            max_pending_actions: self.sequencer.max_pending_actions,
            resync_policy: self.sequencer.resync_policy,
        }
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    /// Maximum inbound silence while Live.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval()
            .saturating_mul(self.heartbeat.timeout_multiplier)
    }

    /// Time allowed for the handshake.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.handshake_timeout_ms)
    }

    /// Longest a single transport write may take.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.write_timeout_ms)
    }

    /// How often the gap window is checked.
    pub fn gap_check_interval(&self) -> Duration {
        // A quarter of the window keeps the overshoot small
        Duration::from_millis((self.sequencer.gap_window_ms / 4).max(1))
    }
}

/// Upper bound for every timer, so deadlines stay representable.
const MAX_TIMER_MS: u64 = 24 * 60 * 60 * 1_000;

fn check_timer(name: &str, ms: u64) -> Result<(), ConfigError> {
    if ms > MAX_TIMER_MS {
        return Err(ConfigError::Invalid(format!(
            "{name} must not exceed 24 hours ({MAX_TIMER_MS} ms)"
        )));
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] toml::ser::Error),
    /// Values are out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}
