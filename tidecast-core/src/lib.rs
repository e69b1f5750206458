//! Tidecast Core - byte sources, origin addressing and controller playback
//!
//! This crate provides the building blocks for relaying a local media byte
//! sequence to a remote playback controller: the live pipeline that drains a
//! single-pass producer, the stream-ready detector, origin address
//! construction, and the JSON-RPC playback session that follows the
//! controller until playback ends.

pub mod classify;
pub mod config;
pub mod controller;
pub mod network;
pub mod origin;
pub mod readiness;
pub mod source;
pub mod streaming;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use classify::{PlayTarget, classify};
pub use config::CastConfig;
pub use controller::{
    Completion, ControllerRpc, HttpController, InterruptPolicy, PlaybackSession, RpcError,
    SessionOutcome, SessionState,
};
pub use origin::OriginAddress;
pub use readiness::{ReadinessError, StreamReadyDetector};
pub use source::{FileSource, LiveSource, MediaRequest, SourceKind};
pub use streaming::{FeedSlot, LiveFeed, LivePipeline, spawn_live_pipeline};

/// Errors that terminate a relay invocation.
///
/// Every kind is fatal: the process reports it and exits with the status
/// returned by [`CastError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum CastError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Controller unreachable at {endpoint}: {reason}")]
    ControllerUnreachable { endpoint: String, reason: String },

    #[error("Stream source error: {reason}")]
    StreamSource { reason: String },

    #[error("Transport error on {addr}: {reason}")]
    Transport { addr: String, reason: String },
}

impl CastError {
    /// Process exit status for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            CastError::Configuration { .. } => 1,
            CastError::ControllerUnreachable { .. } => 2,
            CastError::StreamSource { .. } => 3,
            CastError::Transport { .. } => 4,
        }
    }

    /// Returns a short message suitable for the operator's terminal.
    pub fn user_message(&self) -> String {
        match self {
            CastError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            CastError::ControllerUnreachable { endpoint, .. } => {
                format!("The controller at {endpoint} cannot be reached")
            }
            CastError::StreamSource { reason } => format!("Cannot read the media source: {reason}"),
            CastError::Transport { addr, .. } => format!("Cannot listen on {addr}"),
        }
    }

    pub(crate) fn stream_source(reason: impl std::fmt::Display) -> Self {
        CastError::StreamSource {
            reason: reason.to_string(),
        }
    }
}

impl From<RpcError> for CastError {
    fn from(error: RpcError) -> Self {
        CastError::ControllerUnreachable {
            endpoint: error.endpoint().to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<ReadinessError> for CastError {
    fn from(error: ReadinessError) -> Self {
        CastError::StreamSource {
            reason: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let errors = [
            CastError::Configuration {
                reason: "missing host".to_string(),
            },
            CastError::ControllerUnreachable {
                endpoint: "http://10.0.0.5:80/jsonrpc".to_string(),
                reason: "connection refused".to_string(),
            },
            CastError::stream_source("gone"),
            CastError::Transport {
                addr: "0.0.0.0:8080".to_string(),
                reason: "address in use".to_string(),
            },
        ];

        let codes: Vec<u8> = errors.iter().map(CastError::exit_code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rpc_error_becomes_controller_unreachable() {
        let error = RpcError::Status {
            endpoint: "http://kodi:80/jsonrpc".to_string(),
            status: 401,
        };

        match CastError::from(error) {
            CastError::ControllerUnreachable { endpoint, reason } => {
                assert_eq!(endpoint, "http://kodi:80/jsonrpc");
                assert!(reason.contains("401"));
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }
}
