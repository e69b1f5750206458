//! Centralized configuration for Tidecast.
//!
//! Settings are layered from defaults, an optional config file and
//! `TIDECAST_`-prefixed environment variables. The CLI applies its flags on
//! top and hands the result to each component at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::CastError;

/// Central configuration for all Tidecast components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastConfig {
    pub controller: ControllerConfig,
    pub server: ServerConfig,
    pub stream: StreamConfig,
}

/// Remote playback controller endpoint and RPC behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller address (IP or hostname). Required.
    pub host: String,
    /// JSON-RPC HTTP port
    pub port: u16,
    /// JSON-RPC login configured on the controller
    pub username: Option<String>,
    /// JSON-RPC password configured on the controller
    pub password: Option<String>,
    /// Per-request deadline; unset means no deadline
    pub request_timeout_ms: Option<u64>,
    /// Extra attempts on transport failures; 0 keeps fail-fast behaviour
    pub retries: u32,
    /// Pause between retry attempts
    pub retry_backoff_ms: u64,
    /// Interval between active-player status queries
    pub poll_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 80,
            username: None,
            password: None,
            request_timeout_ms: None,
            retries: 0,
            retry_backoff_ms: 500,
            poll_interval_ms: 1000,
        }
    }
}

impl ControllerConfig {
    /// JSON-RPC endpoint URL.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}/jsonrpc", self.host, self.port)
        } else {
            format!("http://{}:{}/jsonrpc", self.host, self.port)
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Origin server listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub bind_host: String,
    /// Local port to bind; 0 picks an ephemeral port
    pub port: u16,
    /// Host announced to the controller instead of the detected local address
    pub advertise_host: Option<String>,
    /// Port announced to the controller instead of the bound port
    pub advertise_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            advertise_host: None,
            advertise_port: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Live stream pipeline and readiness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes read from the live producer per chunk
    pub chunk_size: usize,
    /// Chunks buffered between the producer and the response
    pub buffer_chunks: usize,
    /// Metadata sampling interval of the readiness detector
    pub readiness_interval_ms: u64,
    /// Delay between readiness and announcing the origin
    pub settle_delay_ms: u64,
    /// Give up waiting for data after this long; unset waits forever
    pub readiness_timeout_ms: Option<u64>,
    /// Logical name of a live stream in the origin address
    pub stream_name: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            buffer_chunks: 64,
            readiness_interval_ms: 250,
            settle_delay_ms: 1000,
            readiness_timeout_ms: None,
            stream_name: "out.mp4".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_ms.map(Duration::from_millis)
    }
}

const EXAMPLE_CONFIG: &str = r#"# Tidecast configuration
#
# Every key can also be set from the environment, for example
# TIDECAST_CONTROLLER__HOST=192.168.1.20

[controller]
# Address of the playback controller (required)
host = "192.168.1.20"
# JSON-RPC port
port = 80
# Credentials configured in the controller's remote control settings
# username = "kodi"
# password = "secret"
# Extra attempts on network failures (0 = fail immediately)
retries = 0
poll_interval_ms = 1000

[server]
bind_host = "0.0.0.0"
port = 8080
# Announce a different address, e.g. the local end of a port forward
# advertise_host = "127.0.0.1"
# advertise_port = 9000

[stream]
chunk_size = 2048
buffer_chunks = 64
readiness_interval_ms = 250
settle_delay_ms = 1000
# readiness_timeout_ms = 60000
stream_name = "out.mp4"
"#;

impl CastConfig {
    /// Loads configuration from defaults, a config file and the environment.
    ///
    /// When `config_file` is `None` the default locations are searched and
    /// silently skipped if absent. An explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// - `CastError::Configuration` - Named file missing, unreadable or malformed
    pub fn load(config_file: Option<&Path>) -> Result<Self, CastError> {
        let mut builder = ConfigBuilder::builder();

        match config_file {
            Some(path) if !path.exists() => {
                return Err(CastError::Configuration {
                    reason: format!("config file {} does not exist", path.display()),
                });
            }
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path));
            }
            None => {
                if let Some(path) = default_config_paths().into_iter().find(|p| p.exists()) {
                    tracing::debug!("Loading configuration from {}", path.display());
                    builder = builder.add_source(File::from(path.as_path()));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TIDECAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(|e| CastError::Configuration {
            reason: e.to_string(),
        })?;

        config.try_deserialize().map_err(|e| CastError::Configuration {
            reason: e.to_string(),
        })
    }

    /// Checks settings that have no usable default.
    ///
    /// # Errors
    ///
    /// - `CastError::Configuration` - Controller host missing or pipeline sizes zero
    pub fn validate(&self) -> Result<(), CastError> {
        if self.controller.host.trim().is_empty() {
            return Err(CastError::Configuration {
                reason: "controller address is not set (use --target or controller.host)"
                    .to_string(),
            });
        }
        if self.stream.chunk_size == 0 || self.stream.buffer_chunks == 0 {
            return Err(CastError::Configuration {
                reason: "stream.chunk_size and stream.buffer_chunks must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Commented example configuration file.
    pub fn example() -> &'static str {
        EXAMPLE_CONFIG
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("tidecast.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("tidecast").join("config.toml"));
    }
    paths
}
