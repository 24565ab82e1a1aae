//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::ListenEvent;
use crate::session::{NoResultReason, SessionOutcome};

/// Requests from clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Start listening for `phrases` (or join the session in progress) and
    /// reply once the session resolves
    Listen { phrases: Vec<String> },

    /// Raw message from the transcription service
    Transcription { message: String },

    /// The transcription service ended the session
    SessionEnded,

    /// Abort the session in progress
    Cancel,

    /// Last accepted utterance
    GetUtterance,

    /// Whether `phrase` was heard in the current session
    Hears { phrase: String },

    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Stream listen events on this connection
    Subscribe,
}

/// Responses from daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// An utterance was heard
    Utterance { text: String },

    /// Nothing has been heard yet
    NoUtterance,

    /// The session ended without an utterance
    NoResult { reason: NoResultReason },

    /// Answer to a `hears` request
    Heard { matched: bool },

    /// Current daemon status
    Status(DaemonStatus),

    /// Request handled, nothing to report
    Ack,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed; events follow
    Subscribed,

    /// Pushed to subscribed clients
    Event { event: ListenEvent },

    /// Error response
    Error { code: String, message: String },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether a session is listening
    pub listening: bool,

    /// Sessions started since launch
    pub sessions_started: u64,

    /// Last accepted utterance
    pub last_utterance: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            listening: false,
            sessions_started: 0,
            last_utterance: None,
            uptime_secs: 0,
        }
    }
}

impl From<SessionOutcome> for Response {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Accepted { utterance } => Response::Utterance { text: utterance },
            SessionOutcome::NoResult { reason } => Response::NoResult { reason },
        }
    }
}

impl Response {
    pub fn error(code: &str, message: impl ToString) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::Listen {
            phrases: vec!["cat".to_string()],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("listen"));
        assert!(json.contains("cat"));
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"{"type":"transcription","message":"end of utterance"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert!(matches!(req, Request::Transcription { message } if message == "end of utterance"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));

        let resp: Response = SessionOutcome::NoResult {
            reason: NoResultReason::TimedOut,
        }
        .into();
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"type":"no_result","reason":"timed_out"}"#);
    }

    #[test]
    fn test_event_round_trips_through_response() {
        let resp = Response::Event {
            event: ListenEvent::StopRequested { session: 4 },
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            Response::Event {
                event: ListenEvent::StopRequested { session: 4 }
            }
        ));
    }
}
