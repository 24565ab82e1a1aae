//! Events module for listening session transitions
//!
//! Provides structured event types for session start, deferred and dropped
//! records, and the terminal outcome of each session.

use serde::{Deserialize, Serialize};

use crate::session::NoResultReason;

/// Events emitted by the listener as sessions progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenEvent {
    /// A new listening session began
    SessionStarted {
        session: u64,
        phrases: Vec<String>,
    },

    /// A record was evaluated and judged not good enough yet
    RecordDeferred {
        session: u64,
        transcript: String,
    },

    /// A message could not be decoded or evaluated and was dropped
    RecordDropped {
        reason: String,
    },

    /// The listen window elapsed; the transcription service should flush
    /// its final result
    StopRequested {
        session: u64,
    },

    /// The session ended with an accepted utterance
    UtteranceAccepted {
        session: u64,
        utterance: String,
        /// Duration in milliseconds the session was listening
        duration_ms: u64,
    },

    /// The session ended without a result
    SessionAbandoned {
        session: u64,
        reason: NoResultReason,
        /// Duration in milliseconds the session was listening
        duration_ms: u64,
    },
}

impl std::fmt::Display for ListenEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenEvent::SessionStarted { session, phrases } => {
                write!(f, "SESSION_STARTED #{} ({} phrases)", session, phrases.len())
            }
            ListenEvent::RecordDeferred { session, transcript } => {
                write!(f, "RECORD_DEFERRED #{} \"{}\"", session, transcript)
            }
            ListenEvent::RecordDropped { reason } => write!(f, "RECORD_DROPPED ({})", reason),
            ListenEvent::StopRequested { session } => write!(f, "STOP_REQUESTED #{}", session),
            ListenEvent::UtteranceAccepted {
                session,
                utterance,
                duration_ms,
            } => {
                write!(f, "UTTERANCE_ACCEPTED #{} \"{}\" ({}ms)", session, utterance, duration_ms)
            }
            ListenEvent::SessionAbandoned {
                session,
                reason,
                duration_ms,
            } => {
                write!(f, "SESSION_ABANDONED #{} {} ({}ms)", session, reason, duration_ms)
            }
        }
    }
}
