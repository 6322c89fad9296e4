//! Daemon configuration loaded from TOML
//!
//! Every field has a default so an empty file (or no file at all) is a valid
//! configuration.

use crate::error::ConfigError;
use crate::types::BYTES_PER_SAMPLE_PAIR;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub audio: AudioSettings,
    pub activity: ActivitySettings,
    pub discovery: DiscoverySettings,
    pub control: ControlSettings,
    pub storage: StorageSettings,
}

/// HTTP listener and per-client buffering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    /// Frames buffered per client before the oldest is dropped
    pub client_queue_frames: usize,
    /// Upper bound on bytes handed to the transport per write
    pub send_buffer_bytes: usize,
    /// How long a broadcast may wait for room in a full client queue
    pub enqueue_wait_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 80)),
            client_queue_frames: 10,
            send_buffer_bytes: 10 * 1024,
            enqueue_wait_ms: 0,
        }
    }
}

impl ServerSettings {
    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }
}

/// Geometry of the incoming sample stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    /// Sample pairs per frame (480 = 10 ms at 48 kHz)
    pub frame_samples: usize,
    /// How long the frame task waits on the source before checking its mailbox
    pub read_timeout_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_samples: 480,
            read_timeout_ms: 50,
        }
    }
}

impl AudioSettings {
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * BYTES_PER_SAMPLE_PAIR
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Silence detection tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySettings {
    pub evaluate_every_ms: u64,
    /// Consecutive non-silent evaluations needed to declare activity
    pub activate_ticks: u32,
    /// Consecutive silent evaluations needed to declare silence
    pub deactivate_ticks: u32,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            evaluate_every_ms: 250,
            activate_ticks: 20,
            deactivate_ticks: 60,
        }
    }
}

impl ActivitySettings {
    pub fn evaluate_every(&self) -> Duration {
        Duration::from_millis(self.evaluate_every_ms)
    }
}

/// SSDP search schedule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    /// MX value advertised in M-SEARCH requests
    pub mx_secs: u8,
    /// Number of M-SEARCH requests sent per search
    pub burst: u32,
    pub multicast_ttl: u32,
    pub description_timeout_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: 5,
            interval_secs: 300,
            mx_secs: 3,
            burst: 3,
            multicast_ttl: 2,
            description_timeout_secs: 5,
        }
    }
}

impl DiscoverySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Replies may arrive up to MX seconds after the request; allow one more for transit
    pub fn search_window(&self) -> Duration {
        Duration::from_secs(self.mx_secs as u64 + 1)
    }

    pub fn description_timeout(&self) -> Duration {
        Duration::from_secs(self.description_timeout_secs)
    }
}

/// Renderer control
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub queue_capacity: usize,
    pub soap_timeout_secs: u64,
    /// Host put in the stream URI handed to renderers; detected per renderer when unset
    pub advertised_host: Option<String>,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            soap_timeout_secs: 10,
            advertised_host: None,
        }
    }
}

impl ControlSettings {
    pub fn soap_timeout(&self) -> Duration {
        Duration::from_secs(self.soap_timeout_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database holding the selection; the daemon picks a per-user default when unset
    pub db_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.client_queue_frames == 0 {
            return Err(ConfigError::Invalid("server.client_queue_frames must be at least 1".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".into()));
        }
        if self.audio.frame_samples == 0 {
            return Err(ConfigError::Invalid("audio.frame_samples must be positive".into()));
        }
        if self.activity.activate_ticks == 0 || self.activity.deactivate_ticks == 0 {
            return Err(ConfigError::Invalid("activity thresholds must be positive".into()));
        }
        if self.control.queue_capacity < 3 {
            return Err(ConfigError::Invalid("control.queue_capacity must be at least 3".into()));
        }
        if self.discovery.enabled && self.discovery.search_window() >= self.discovery.interval() {
            return Err(ConfigError::Invalid(
                "discovery.interval_secs must be longer than the search window".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.audio.frame_bytes(), 1920);
        assert_eq!(settings.audio.frame_duration(), Duration::from_millis(10));
        assert_eq!(settings.discovery.search_window(), Duration::from_secs(4));
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml_str(
            r#"
            [server]
            bind = "127.0.0.1:8080"
            client_queue_frames = 4

            [control]
            advertised_host = "192.168.1.50"
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.bind.port(), 8080);
        assert_eq!(settings.server.client_queue_frames, 4);
        assert_eq!(settings.server.send_buffer_bytes, 10 * 1024);
        assert_eq!(settings.control.advertised_host.as_deref(), Some("192.168.1.50"));
    }

    #[test]
    fn test_rejects_zero_queue() {
        let err = Settings::from_toml_str("[server]\nclient_queue_frames = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_search_window_longer_than_interval() {
        let err = Settings::from_toml_str("[discovery]\ninterval_secs = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unparseable_toml() {
        let err = Settings::from_toml_str("[server\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
