//! Configuration management for the HAIP engine
//!
//! This module handles loading, parsing, validating, and managing the
//! engine's configuration from a YAML file, with environment variable and
//! CLI overrides layered on top (spec.md §6.5).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::Channel;
use crate::error::{HaipError, Result};
use crate::flow::ChannelCredit;

/// Main configuration structure for the HAIP engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port the server binds to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host/interface the server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Seconds of transport idle before a `PING` is emitted.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Seconds after a pending `PING` before the session is unhealthy.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Maximum simultaneous transport connections across all sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum simultaneously active runs per session.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Maximum number of entries retained in a session's replay window.
    #[serde(default = "default_replay_window_size")]
    pub replay_window_size: usize,
    /// Seconds an acked replay entry is retained regardless of count pressure.
    #[serde(default = "default_replay_window_time")]
    pub replay_window_time_secs: u64,
    /// `seq` gap width, in entries, that triggers a `REPLAY_REQUEST`.
    #[serde(default = "default_replay_gap_window")]
    pub replay_gap_window: u64,
    /// Seconds a `TOOL_CALL` may run before it is force-completed as errored.
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_secs: u64,
    /// Flow control tuning.
    #[serde(default)]
    pub flow_control: FlowControlConfig,
    /// Per-channel initial/maximum credit overrides.
    #[serde(default)]
    pub channel_credits: HashMap<Channel, ChannelCreditConfig>,
    /// Ambient feature toggles.
    #[serde(default)]
    pub features: FeatureToggles,
}

/// Flow control tuning knobs (spec.md §6.5 `flowControl.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowControlConfig {
    /// Whether flow control is enforced at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Default initial message credit, per channel, absent an override.
    #[serde(default = "default_initial_messages")]
    pub initial_messages: u64,
    /// Default initial byte credit, per channel, absent an override.
    #[serde(default = "default_initial_bytes")]
    pub initial_bytes: u64,
    /// Floor below which a channel's credit may never be driven.
    #[serde(default)]
    pub min_credits: u64,
    /// Ceiling a `FLOW_UPDATE` grant saturates at, absent an override.
    #[serde(default = "default_max_credits")]
    pub max_credits: u64,
    /// Fraction of `max` below which a grant request is triggered.
    #[serde(default = "default_low_water_threshold")]
    pub low_water_threshold: f64,
    /// Whether grant sizing adapts to observed throughput/latency.
    #[serde(default)]
    pub adaptive: bool,
    /// Bound on the per-channel deferred-send queue before `FLOW_CONTROL_VIOLATION`.
    #[serde(default = "default_max_pending_per_channel")]
    pub max_pending_per_channel: usize,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            initial_messages: default_initial_messages(),
            initial_bytes: default_initial_bytes(),
            min_credits: 0,
            max_credits: default_max_credits(),
            low_water_threshold: default_low_water_threshold(),
            adaptive: false,
            max_pending_per_channel: default_max_pending_per_channel(),
        }
    }
}

/// A per-channel override of the default initial/maximum credit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelCreditConfig {
    /// Initial message credit for this channel.
    pub initial_messages: u64,
    /// Initial byte credit for this channel.
    pub initial_bytes: u64,
    /// Maximum message credit a grant may raise this channel to.
    #[serde(default = "default_max_credits")]
    pub max_messages: u64,
    /// Maximum byte credit a grant may raise this channel to.
    #[serde(default = "default_max_bytes_credit")]
    pub max_bytes: u64,
}

impl From<ChannelCreditConfig> for ChannelCredit {
    fn from(c: ChannelCreditConfig) -> Self {
        ChannelCredit {
            messages: c.initial_messages,
            bytes: c.initial_bytes,
        }
    }
}

/// Ambient feature toggles (spec.md §6.5 `{cors, compression, logging}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// Enable permissive CORS on the HTTP-based transports.
    #[serde(default = "default_true")]
    pub cors: bool,
    /// Enable response compression on the HTTP-based transports.
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Enable structured request/response tracing spans.
    #[serde(default = "default_true")]
    pub logging: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            cors: true,
            compression: true,
            logging: true,
        }
    }
}

fn default_port() -> u16 {
    8420
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    5
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_concurrent_runs() -> usize {
    16
}

fn default_replay_window_size() -> usize {
    1_000
}

fn default_replay_window_time() -> u64 {
    300
}

fn default_replay_gap_window() -> u64 {
    crate::sequence::DEFAULT_REPLAY_GAP_WINDOW
}

fn default_tool_call_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_initial_messages() -> u64 {
    32
}

fn default_initial_bytes() -> u64 {
    262_144
}

fn default_max_credits() -> u64 {
    1_000
}

fn default_max_bytes_credit() -> u64 {
    10_485_760
}

fn default_low_water_threshold() -> f64 {
    0.25
}

fn default_max_pending_per_channel() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            max_connections: default_max_connections(),
            max_concurrent_runs: default_max_concurrent_runs(),
            replay_window_size: default_replay_window_size(),
            replay_window_time_secs: default_replay_window_time(),
            replay_gap_window: default_replay_gap_window(),
            tool_call_timeout_secs: default_tool_call_timeout(),
            flow_control: FlowControlConfig::default(),
            channel_credits: HashMap::new(),
            features: FeatureToggles::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, falling back to defaults when
    /// the file is absent, then apply environment variable overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(target: "haip::config", "config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| HaipError::ProtocolViolation {
            field: format!("config: {e}"),
        })
    }

    fn apply_env_vars(&mut self) {
        if let Ok(port) = std::env::var("HAIP_PORT") {
            match port.parse() {
                Ok(value) => self.port = value,
                Err(_) => tracing::warn!(target: "haip::config", "invalid HAIP_PORT: {}", port),
            }
        }
        if let Ok(host) = std::env::var("HAIP_HOST") {
            self.host = host;
        }
        if let Ok(value) = std::env::var("HAIP_MAX_CONCURRENT_RUNS") {
            match value.parse() {
                Ok(parsed) => self.max_concurrent_runs = parsed,
                Err(_) => tracing::warn!(target: "haip::config", "invalid HAIP_MAX_CONCURRENT_RUNS: {}", value),
            }
        }
        if let Ok(value) = std::env::var("HAIP_MAX_CONNECTIONS") {
            match value.parse() {
                Ok(parsed) => self.max_connections = parsed,
                Err(_) => tracing::warn!(target: "haip::config", "invalid HAIP_MAX_CONNECTIONS: {}", value),
            }
        }
    }

    /// The replay window's age-based retention as a [`Duration`].
    pub fn replay_window_time(&self) -> Duration {
        Duration::from_secs(self.replay_window_time_secs)
    }

    /// The heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// The heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// The tool-call execution timeout as a [`Duration`].
    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }

    /// Reject non-sensical configuration values.
    ///
    /// # Errors
    /// Returns [`HaipError::ProtocolViolation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(HaipError::ProtocolViolation {
                field: "host".to_string(),
            });
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(HaipError::ProtocolViolation {
                field: "heartbeat_interval_secs".to_string(),
            });
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(HaipError::ProtocolViolation {
                field: "heartbeat_timeout_secs".to_string(),
            });
        }
        if self.tool_call_timeout_secs == 0 {
            return Err(HaipError::ProtocolViolation {
                field: "tool_call_timeout_secs".to_string(),
            });
        }
        if self.max_concurrent_runs == 0 {
            return Err(HaipError::ProtocolViolation {
                field: "max_concurrent_runs".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(HaipError::ProtocolViolation {
                field: "max_connections".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.flow_control.low_water_threshold) {
            return Err(HaipError::ProtocolViolation {
                field: "flow_control.low_water_threshold".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let mut config = Config::default();
        config.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut config = Config::default();
        config.host = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_low_water_threshold_is_rejected() {
        let mut config = Config::default();
        config.flow_control.low_water_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let config = Config::load("/nonexistent/haip-config.yaml").unwrap();
        assert_eq!(config.port, default_port());
    }

    #[test]
    fn channel_credit_config_converts_to_channel_credit() {
        let over = ChannelCreditConfig {
            initial_messages: 5,
            initial_bytes: 500,
            max_messages: 10,
            max_bytes: 1000,
        };
        let credit: ChannelCredit = over.into();
        assert_eq!(credit.messages, 5);
        assert_eq!(credit.bytes, 500);
    }
}
