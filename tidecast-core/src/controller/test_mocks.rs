//! Mock controller for testing playback sessions.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::client::{ControllerRpc, RpcError};
use super::rpc::methods;

const MOCK_ENDPOINT: &str = "mock://controller/jsonrpc";

/// Scripted answer to one `Player.GetActivePlayers` call.
#[derive(Debug, Clone)]
pub enum PollReply {
    /// Players with ids `1..=n` are active
    Players(usize),
    /// The call fails with a transport error
    Unreachable,
}

impl PollReply {
    pub fn players(count: usize) -> Self {
        PollReply::Players(count)
    }
}

/// In-memory controller that records every call.
///
/// Status polls consume the script in order; the last reply repeats once the
/// script runs out.
#[derive(Debug)]
pub struct MockController {
    polls: Mutex<VecDeque<PollReply>>,
    last_poll: Mutex<PollReply>,
    fail_open: bool,
    stall_open: bool,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl MockController {
    pub fn with_polls(polls: Vec<PollReply>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
            last_poll: Mutex::new(PollReply::Players(0)),
            fail_open: false,
            stall_open: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Controller whose `Player.Open` fails at the transport level.
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::with_polls(Vec::new())
        }
    }

    /// Controller whose `Player.Open` never answers.
    pub fn stalling_open() -> Self {
        Self {
            stall_open: true,
            ..Self::with_polls(Vec::new())
        }
    }

    /// Number of calls made to `method`.
    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(called, _)| called == method)
            .count()
    }

    /// Files passed to `Player.Open`, in order.
    pub fn opened(&self) -> Vec<String> {
        self.params_of(methods::PLAYER_OPEN)
            .iter()
            .filter_map(|params| params["item"]["file"].as_str().map(str::to_string))
            .collect()
    }

    /// Player ids passed to `Player.Stop`, in order.
    pub fn stopped(&self) -> Vec<i64> {
        self.params_of(methods::PLAYER_STOP)
            .iter()
            .filter_map(|params| params["playerid"].as_i64())
            .collect()
    }

    fn params_of(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(called, _)| called == method)
            .filter_map(|(_, params)| params.clone())
            .collect()
    }

    fn unreachable() -> RpcError {
        RpcError::Transport {
            endpoint: MOCK_ENDPOINT.to_string(),
            reason: "mock controller unreachable".to_string(),
        }
    }

    fn next_poll(&self) -> PollReply {
        let next = self.polls.lock().pop_front();
        let mut last = self.last_poll.lock();
        if let Some(reply) = next {
            *last = reply;
        }
        last.clone()
    }
}

#[async_trait]
impl ControllerRpc for MockController {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.calls.lock().push((method.to_string(), params));

        match method {
            methods::JSONRPC_VERSION => Ok(json!({ "version": { "major": 13, "minor": 5 } })),
            methods::PLAYER_OPEN if self.fail_open => Err(Self::unreachable()),
            methods::PLAYER_OPEN if self.stall_open => std::future::pending().await,
            methods::PLAYER_OPEN | methods::PLAYER_STOP => Ok(json!("OK")),
            methods::PLAYER_GET_ACTIVE_PLAYERS => match self.next_poll() {
                PollReply::Players(count) => Ok(Value::Array(
                    (1..=count)
                        .map(|id| json!({ "playerid": id, "type": "video" }))
                        .collect(),
                )),
                PollReply::Unreachable => Err(Self::unreachable()),
            },
            other => Err(RpcError::Remote {
                endpoint: MOCK_ENDPOINT.to_string(),
                method: other.to_string(),
                code: -32601,
                message: "Method not found.".to_string(),
            }),
        }
    }

    fn endpoint(&self) -> &str {
        MOCK_ENDPOINT
    }
}
