//! JSON-RPC transport to the controller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::rpc::{self, PlayerStatus, RpcRequest, RpcResponse, methods};
use crate::CastError;
use crate::config::ControllerConfig;

/// Failures talking to the controller.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} answered with HTTP status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("{method} rejected by {endpoint}: {message} (code {code})")]
    Remote {
        endpoint: String,
        method: String,
        code: i64,
        message: String,
    },

    #[error("malformed response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl RpcError {
    pub fn endpoint(&self) -> &str {
        match self {
            RpcError::Transport { endpoint, .. }
            | RpcError::Status { endpoint, .. }
            | RpcError::Remote { endpoint, .. }
            | RpcError::Decode { endpoint, .. } => endpoint,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}

/// Issues JSON-RPC calls to the controller.
///
/// Implementors provide [`ControllerRpc::call`]; the typed helpers are shared.
#[async_trait]
pub trait ControllerRpc: Send + Sync {
    /// Sends one call and returns its `result` member.
    ///
    /// # Errors
    ///
    /// - `RpcError::Transport` - Network failure
    /// - `RpcError::Status` - Non-success HTTP status
    /// - `RpcError::Remote` - Controller returned a JSON-RPC error
    /// - `RpcError::Decode` - Response was not a JSON-RPC envelope
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError>;

    /// Endpoint identifier used in error reports.
    fn endpoint(&self) -> &str;

    /// Health check (`JSONRPC.Version`).
    ///
    /// # Errors
    ///
    /// - `RpcError` - Controller unreachable or not speaking JSON-RPC
    async fn version(&self) -> Result<Value, RpcError> {
        self.call(methods::JSONRPC_VERSION, None).await
    }

    /// Asks the controller to fetch and play `file`.
    ///
    /// # Errors
    ///
    /// - `RpcError` - Call failed or was rejected
    async fn open(&self, file: &str) -> Result<Value, RpcError> {
        self.call(methods::PLAYER_OPEN, Some(rpc::open_params(file)))
            .await
    }

    /// Current active players.
    ///
    /// # Errors
    ///
    /// - `RpcError::Decode` - Result is not a player list
    /// - `RpcError` - Call failed
    async fn active_players(&self) -> Result<PlayerStatus, RpcError> {
        let result = self
            .call(methods::PLAYER_GET_ACTIVE_PLAYERS, None)
            .await?;
        PlayerStatus::from_result(result).map_err(|e| RpcError::Decode {
            endpoint: self.endpoint().to_string(),
            reason: e.to_string(),
        })
    }

    /// Stops one player.
    ///
    /// # Errors
    ///
    /// - `RpcError` - Call failed or was rejected
    async fn stop(&self, playerid: i64) -> Result<(), RpcError> {
        self.call(methods::PLAYER_STOP, Some(rpc::stop_params(playerid)))
            .await?;
        Ok(())
    }

    /// Stops every active player and returns how many were stopped.
    ///
    /// # Errors
    ///
    /// - `RpcError` - Status query or a stop call failed
    async fn stop_all(&self) -> Result<usize, RpcError> {
        let status = self.active_players().await?;
        for player in &status.active_players {
            tracing::info!(playerid = player.playerid, "Stopping player");
            self.stop(player.playerid).await?;
        }
        Ok(status.active_players.len())
    }
}

/// HTTP POST transport to the controller's `/jsonrpc` endpoint.
pub struct HttpController {
    endpoint: String,
    client: reqwest::Client,
    credentials: Option<(String, Option<String>)>,
    retries: u32,
    retry_backoff: Duration,
    next_id: AtomicU64,
}

impl HttpController {
    /// Creates a client for the configured controller.
    ///
    /// # Errors
    ///
    /// - `CastError::Configuration` - Controller host missing or HTTP client setup failed
    pub fn new(config: &ControllerConfig) -> Result<Self, CastError> {
        if config.host.trim().is_empty() {
            return Err(CastError::Configuration {
                reason: "controller address is not set".to_string(),
            });
        }

        let mut builder = reqwest::Client::builder().user_agent(concat!(
            "tidecast/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| CastError::Configuration {
            reason: format!("cannot create HTTP client: {e}"),
        })?;

        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));

        Ok(Self {
            endpoint: config.endpoint(),
            client,
            credentials,
            retries: config.retries,
            retry_backoff: config.retry_backoff(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn send_once(&self, envelope: &RpcRequest) -> Result<Value, RpcError> {
        let mut request = self.client.post(&self.endpoint).json(envelope);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.map_err(|e| RpcError::Transport {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body: RpcResponse = response.json().await.map_err(|e| RpcError::Decode {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        if let Some(error) = body.error {
            return Err(RpcError::Remote {
                endpoint: self.endpoint.clone(),
                method: envelope.method.clone(),
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ControllerRpc for HttpController {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let envelope = RpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        tracing::debug!(method, id = envelope.id, "Sending controller request");

        let mut attempt = 0;
        loop {
            match self.send_once(&envelope).await {
                Ok(result) => {
                    tracing::trace!(method, %result, "Controller response");
                    return Ok(result);
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(method, attempt, "Controller request failed, retrying: {e}");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorded {
        calls: Arc<Mutex<Vec<(RpcRequest, Option<String>)>>>,
    }

    async fn fake_jsonrpc(
        State(recorded): State<Recorded>,
        headers: HeaderMap,
        Json(request): Json<RpcRequest>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        recorded.calls.lock().push((request.clone(), auth));

        let body = match request.method.as_str() {
            methods::JSONRPC_VERSION => {
                json!({"id": request.id, "jsonrpc": "2.0", "result": {"version": {"major": 13}}})
            }
            methods::PLAYER_GET_ACTIVE_PLAYERS => {
                json!({"id": request.id, "jsonrpc": "2.0", "result": [{"playerid": 1, "type": "video"}]})
            }
            methods::PLAYER_OPEN | methods::PLAYER_STOP => {
                json!({"id": request.id, "jsonrpc": "2.0", "result": "OK"})
            }
            _ => {
                json!({"id": request.id, "jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found."}})
            }
        };
        (StatusCode::OK, Json(body))
    }

    async fn spawn_controller(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn config_for(addr: SocketAddr) -> ControllerConfig {
        ControllerConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        }
    }

    fn retrying_config(addr: SocketAddr, retries: u32) -> ControllerConfig {
        ControllerConfig {
            retries,
            retry_backoff_ms: 50,
            ..config_for(addr)
        }
    }

    /// Listener that resets the first `remaining` connections unanswered.
    struct ResettingListener {
        inner: tokio::net::TcpListener,
        remaining: usize,
        accepted: Arc<AtomicUsize>,
    }

    impl axum::serve::Listener for ResettingListener {
        type Io = tokio::net::TcpStream;
        type Addr = SocketAddr;

        async fn accept(&mut self) -> (Self::Io, Self::Addr) {
            loop {
                let (stream, addr) = axum::serve::Listener::accept(&mut self.inner).await;
                self.accepted.fetch_add(1, Ordering::SeqCst);
                if self.remaining == 0 {
                    return (stream, addr);
                }
                self.remaining -= 1;
                drop(stream);
            }
        }

        fn local_addr(&self) -> std::io::Result<Self::Addr> {
            self.inner.local_addr()
        }
    }

    #[tokio::test]
    async fn test_calls_carry_envelope_and_credentials() {
        let recorded = Recorded::default();
        let router = Router::new()
            .route("/jsonrpc", post(fake_jsonrpc))
            .with_state(recorded.clone());
        let addr = spawn_controller(router).await;

        let mut config = config_for(addr);
        config.username = Some("kodi".to_string());
        config.password = Some("secret".to_string());
        let controller = HttpController::new(&config).unwrap();

        controller.version().await.unwrap();
        controller.open("http://10.0.0.5:8080/movie.mp4").await.unwrap();

        let calls = recorded.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.method, "JSONRPC.Version");
        assert_eq!(calls[0].0.jsonrpc, "2.0");
        assert_eq!(calls[1].0.method, "Player.Open");
        assert_eq!(
            calls[1].0.params,
            Some(json!({"item": {"file": "http://10.0.0.5:8080/movie.mp4"}}))
        );
        assert_ne!(calls[0].0.id, calls[1].0.id);
        // base64("kodi:secret")
        assert_eq!(calls[0].1.as_deref(), Some("Basic a29kaTpzZWNyZXQ="));
    }

    #[tokio::test]
    async fn test_stop_all_stops_each_active_player() {
        let recorded = Recorded::default();
        let router = Router::new()
            .route("/jsonrpc", post(fake_jsonrpc))
            .with_state(recorded.clone());
        let addr = spawn_controller(router).await;
        let controller = HttpController::new(&config_for(addr)).unwrap();

        let stopped = controller.stop_all().await.unwrap();

        assert_eq!(stopped, 1);
        let calls = recorded.calls.lock().clone();
        assert_eq!(calls[1].0.method, "Player.Stop");
        assert_eq!(calls[1].0.params, Some(json!({"playerid": 1})));
    }

    #[tokio::test]
    async fn test_jsonrpc_error_member_is_remote_error() {
        let router = Router::new()
            .route("/jsonrpc", post(fake_jsonrpc))
            .with_state(Recorded::default());
        let addr = spawn_controller(router).await;
        let controller = HttpController::new(&config_for(addr)).unwrap();

        let result = controller.call("Playlist.Clear", None).await;
        assert!(matches!(result, Err(RpcError::Remote { code: -32601, .. })));
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let router = Router::new().route(
            "/jsonrpc",
            post(|| async { StatusCode::UNAUTHORIZED }),
        );
        let addr = spawn_controller(router).await;
        let controller = HttpController::new(&config_for(addr)).unwrap();

        let result = controller.version().await;
        assert!(matches!(result, Err(RpcError::Status { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_unreachable_controller_fails_fast() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let controller = HttpController::new(&config_for(addr)).unwrap();
        let result = controller.version().await;

        match result {
            Err(error @ RpcError::Transport { .. }) => {
                let cast: CastError = error.into();
                assert_eq!(cast.exit_code(), 2);
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        let result = HttpController::new(&ControllerConfig::default());
        assert!(matches!(result, Err(CastError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let recorded = Recorded::default();
        let router = Router::new()
            .route("/jsonrpc", post(fake_jsonrpc))
            .with_state(recorded.clone());
        let inner = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let listener = ResettingListener {
            inner,
            remaining: 2,
            accepted: accepted.clone(),
        };
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let controller = HttpController::new(&retrying_config(addr, 2)).unwrap();
        controller.version().await.unwrap();

        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        assert_eq!(recorded.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_against_refusing_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let controller = HttpController::new(&retrying_config(addr, 2)).unwrap();
        let started = std::time::Instant::now();
        let result = controller.version().await;

        assert!(matches!(result, Err(RpcError::Transport { .. })));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_status_and_remote_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/jsonrpc",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNAUTHORIZED
                }
            }),
        );
        let addr = spawn_controller(router).await;
        let controller = HttpController::new(&retrying_config(addr, 2)).unwrap();

        let result = controller.version().await;
        assert!(matches!(result, Err(RpcError::Status { status: 401, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let recorded = Recorded::default();
        let router = Router::new()
            .route("/jsonrpc", post(fake_jsonrpc))
            .with_state(recorded.clone());
        let addr = spawn_controller(router).await;
        let controller = HttpController::new(&retrying_config(addr, 2)).unwrap();

        let result = controller.call("Playlist.Clear", None).await;
        assert!(matches!(result, Err(RpcError::Remote { .. })));
        assert_eq!(recorded.calls.lock().len(), 1);
    }
}
