//! JSON-RPC 2.0 envelope and controller payload types.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Controller methods used by Tidecast.
pub mod methods {
    pub const PLAYER_OPEN: &str = "Player.Open";
    pub const PLAYER_STOP: &str = "Player.Stop";
    pub const PLAYER_GET_ACTIVE_PLAYERS: &str = "Player.GetActivePlayers";
    pub const JSONRPC_VERSION: &str = "JSONRPC.Version";
}

const YOUTUBE_PLUGIN: &str = "plugin://plugin.video.youtube/?action=play_video&videoid=";
const SENDTOKODI_PLUGIN: &str = "plugin://plugin.video.sendtokodi/?";

/// Request envelope `{id, jsonrpc, method, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            id,
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Response envelope. Exactly one of `result` and `error` is normally set.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC error member.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Entry of `Player.GetActivePlayers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePlayer {
    pub playerid: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Parsed result of a status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    pub active_players: Vec<ActivePlayer>,
}

impl PlayerStatus {
    /// Parses a `Player.GetActivePlayers` result. A null result means no players.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - Result is neither null nor a list of players
    pub fn from_result(result: Value) -> Result<Self, serde_json::Error> {
        if result.is_null() {
            return Ok(Self::default());
        }
        Ok(Self {
            active_players: serde_json::from_value(result)?,
        })
    }

    /// True when the controller reports no active player.
    pub fn is_idle(&self) -> bool {
        self.active_players.is_empty()
    }
}

/// `Player.Open` parameters referencing `file`.
pub fn open_params(file: &str) -> Value {
    json!({ "item": { "file": file } })
}

/// `Player.Stop` parameters.
pub fn stop_params(playerid: i64) -> Value {
    json!({ "playerid": playerid })
}

/// Plugin URI that plays a YouTube video through the controller's add-on.
pub fn youtube_plugin_uri(video_id: &str) -> String {
    format!("{YOUTUBE_PLUGIN}{video_id}")
}

/// Plugin URI that forwards an arbitrary page URL to the SendToKodi add-on.
pub fn sendtokodi_plugin_uri(url: &str) -> String {
    format!("{SENDTOKODI_PLUGIN}{url}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_request_envelope() {
        let request = RpcRequest::new(
            1,
            methods::PLAYER_OPEN,
            Some(open_params("http://10.0.0.5:8080/movie.mp4")),
        );

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "id": 1,
                "jsonrpc": "2.0",
                "method": "Player.Open",
                "params": { "item": { "file": "http://10.0.0.5:8080/movie.mp4" } }
            })
        );
    }

    #[test]
    fn test_request_without_params_omits_member() {
        let request = RpcRequest::new(7, methods::JSONRPC_VERSION, None);
        let encoded = serde_json::to_value(&request).unwrap();

        assert_eq!(
            encoded,
            json!({ "id": 7, "jsonrpc": "2.0", "method": "JSONRPC.Version" })
        );
    }

    #[test]
    fn test_active_players_parse() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"id":1,"jsonrpc":"2.0","result":[{"playerid":1,"type":"video"}]}"#,
        )
        .unwrap();

        let status = PlayerStatus::from_result(response.result.unwrap()).unwrap();
        assert_eq!(
            status.active_players,
            vec![ActivePlayer {
                playerid: 1,
                kind: "video".to_string()
            }]
        );
        assert!(!status.is_idle());
    }

    #[test]
    fn test_empty_and_null_results_are_idle() {
        assert!(PlayerStatus::from_result(json!([])).unwrap().is_idle());
        assert!(PlayerStatus::from_result(Value::Null).unwrap().is_idle());
        assert!(PlayerStatus::from_result(json!({"players": 1})).is_err());
    }

    #[test]
    fn test_error_member_parses() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"id":1,"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found."}}"#,
        )
        .unwrap();

        assert_eq!(
            response.error,
            Some(RpcErrorObject {
                code: -32601,
                message: "Method not found.".to_string()
            })
        );
        assert!(response.result.is_none());
    }

    #[test]
    fn test_plugin_uris() {
        assert_eq!(
            youtube_plugin_uri("o5snlP8Y5GY"),
            "plugin://plugin.video.youtube/?action=play_video&videoid=o5snlP8Y5GY"
        );
        assert_eq!(
            sendtokodi_plugin_uri("https://vimeo.com/1234"),
            "plugin://plugin.video.sendtokodi/?https://vimeo.com/1234"
        );
    }
}
