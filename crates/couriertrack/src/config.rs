//! Subsystem configuration.
//!
//! Layered the usual way: defaults, then an optional TOML file, then
//! `COURIERTRACK__`-prefixed environment variables (`__` separates nesting,
//! e.g. `COURIERTRACK__RELAY__URL`). Every struct carries serde defaults so
//! a partial file is fine.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::session::SessionConfig;

const ENV_PREFIX: &str = "COURIERTRACK";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub relay: RelayConfig,
    pub tracking: TrackerConfig,
    pub animation: AnimationConfig,
}

/// Relay connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket URL of the tracking relay.
    pub url: String,
    /// Handshake deadline in seconds.
    pub handshake_timeout_secs: u64,
    /// Liveness ping cadence in seconds while connected.
    pub heartbeat_interval_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001/track".to_string(),
            handshake_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Bounded-reconnect policy for spontaneous disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before the session gives up and reports an error.
    pub max_attempts: u32,
    /// Base delay for exponential backoff, milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap, milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Customer-side tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds without an accepted sample before the courier is presumed
    /// offline.
    pub staleness_threshold_secs: u64,
    /// Request GPS-grade fixes from the device provider.
    pub high_accuracy: bool,
    /// Suppress publishing fixes that moved less than this many meters.
    /// `None` publishes every fix, matching the device cadence.
    pub min_move_meters: Option<f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 60,
            high_accuracy: true,
            min_move_meters: None,
        }
    }
}

/// Marker animation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Duration of one marker animation between samples, milliseconds.
    pub duration_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self { duration_ms: 1000 }
    }
}

impl TrackingConfig {
    /// Load configuration from an optional TOML file plus environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        let built = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        built.try_deserialize()
    }

    /// Session-manager view of this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            url: self.relay.url.clone(),
            handshake_timeout: Duration::from_secs(self.relay.handshake_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.relay.heartbeat_interval_secs),
            max_reconnect_attempts: self.relay.reconnect.max_attempts,
            base_reconnect_delay: Duration::from_millis(self.relay.reconnect.base_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.relay.reconnect.max_delay_ms),
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.tracking.staleness_threshold_secs)
    }

    pub fn animation_duration(&self) -> Duration {
        Duration::from_millis(self.animation.duration_ms)
    }
}
