//! Remote playback controller integration.
//!
//! The controller speaks JSON-RPC 2.0 over HTTP POST. [`ControllerRpc`] is the
//! seam between the playback session and the transport, so sessions can be
//! driven by the real HTTP client or by in-memory mocks.

pub mod client;
pub mod rpc;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

pub use client::{ControllerRpc, HttpController, RpcError};
pub use rpc::{ActivePlayer, PlayerStatus, RpcRequest, RpcResponse};
pub use session::{Completion, InterruptPolicy, PlaybackSession, SessionOutcome, SessionState};
