//! Voice relay wire protocol.
//!
//! Inbound audio arrives as binary WebSocket frames (little-endian `f32`
//! samples). Everything the server sends back is a JSON text frame in one of
//! two shapes:
//!
//! - `{"text": "...", "finished": bool, "success": true}`: a reply fragment
//!   carrying the cumulative reply text so far.
//! - `{"success": false, "error": "...", "code": "..."}`: a stage failure.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// A server -> client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Fragment {
        text: String,
        finished: bool,
        success: bool,
    },
    Failure {
        success: bool,
        error: String,
        code: ErrorCode,
    },
}

impl ServerMessage {
    pub fn fragment(text: impl Into<String>, finished: bool) -> Self {
        Self::Fragment {
            text: text.into(),
            finished,
            success: true,
        }
    }

    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            error: error.into(),
            code,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Fragment { finished: true, .. })
    }

    pub fn to_json(&self) -> String {
        // Both variants hold only strings, bools and a unit enum.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"internal error","code":"INTERNAL_ERROR"}"#.to_string()
        })
    }
}

/// A client -> server control message, sent as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// End the session.
    Close,
    /// Forget this session's conversation history.
    Reset,
}

/// Error body returned by the HTTP endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub error_code: ErrorCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_wire_shape() {
        let msg = ServerMessage::fragment("Hel", false);
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"text": "Hel", "finished": false, "success": true})
        );
    }

    #[test]
    fn test_failure_wire_shape() {
        let msg = ServerMessage::failure(ErrorCode::EmptyTranscription, "No speech detected");
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "No speech detected");
        assert_eq!(json["code"], "EMPTY_TRANSCRIPTION");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_server_message_parses_back() {
        let raw = r#"{"text":"Hello","finished":true,"success":true}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_finished());

        let raw = r#"{"success":false,"error":"boom","code":"GENERATION_FAILED"}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_failure());
    }

    #[test]
    fn test_client_message_parse() {
        let close: ClientMessage = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert_eq!(close, ClientMessage::Close);
        let reset: ClientMessage = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(reset, ClientMessage::Reset);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }
}
