//! Stream-ready detection for live sources.
//!
//! Pipes and terminals often report a size of zero long after data starts
//! flowing, but their modification time moves as soon as the producer writes.
//! The detector samples that timestamp until it changes, then waits a fixed
//! settle delay so the controller finds something buffered when it connects.
//!
//! A source whose timestamp never moves keeps the detector waiting forever
//! unless a timeout is configured.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;

/// Samples the modification time of a live source.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    /// Current last-modified timestamp of the source.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Metadata of the source cannot be read
    async fn modified(&self) -> io::Result<SystemTime>;
}

/// Probe backed by filesystem metadata of a path (e.g. `/dev/stdin`).
#[derive(Debug, Clone)]
pub struct PathProbe {
    path: PathBuf,
}

impl PathProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetadataProbe for PathProbe {
    async fn modified(&self) -> io::Result<SystemTime> {
        tokio::fs::metadata(&self.path).await?.modified()
    }
}

/// Errors raised while waiting for a live source.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("cannot sample live source metadata: {0}")]
    Probe(#[from] io::Error),

    #[error("live source produced no data within {0:?}")]
    TimedOut(Duration),

    #[error("wait for live source was cancelled")]
    Cancelled,
}

/// Blocking gate that opens once a live source has produced data.
#[derive(Debug, Clone)]
pub struct StreamReadyDetector {
    interval: Duration,
    settle: Duration,
    timeout: Option<Duration>,
}

impl StreamReadyDetector {
    pub fn new(interval: Duration, settle: Duration) -> Self {
        Self {
            interval,
            settle,
            timeout: None,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            interval: config.readiness_interval(),
            settle: config.settle_delay(),
            timeout: config.readiness_timeout(),
        }
    }

    /// Bounds the detection phase; the settle delay is not counted.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Waits until the probe reports a new timestamp, then settles.
    ///
    /// Returns the time spent before the change was observed.
    ///
    /// # Errors
    ///
    /// - `ReadinessError::Probe` - Metadata sampling failed
    /// - `ReadinessError::TimedOut` - Timeout configured and no change observed
    /// - `ReadinessError::Cancelled` - `cancel` fired before the gate opened
    pub async fn wait_ready(
        &self,
        probe: &dyn MetadataProbe,
        cancel: &CancellationToken,
    ) -> Result<Duration, ReadinessError> {
        let started = Instant::now();

        let detection = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.detect_change(probe))
                    .await
                    .map_err(|_| ReadinessError::TimedOut(limit))?,
                None => self.detect_change(probe).await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            result = detection => result?,
        }
        let waited = started.elapsed();
        tracing::info!(?waited, "Live source is producing data");

        tokio::select! {
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
            _ = tokio::time::sleep(self.settle) => {}
        }
        Ok(waited)
    }

    async fn detect_change(&self, probe: &dyn MetadataProbe) -> Result<(), ReadinessError> {
        let initial = probe.modified().await?;
        tracing::debug!(?initial, "Waiting for live source metadata to change");

        loop {
            tokio::time::sleep(self.interval).await;
            let current = probe.modified().await?;
            if current != initial {
                return Ok(());
            }
            tracing::trace!("Live source unchanged");
        }
    }
}
