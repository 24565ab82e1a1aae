//! Listening sessions
//!
//! A session moves through an explicit state machine:
//! - Idle: no session has started yet
//! - Listening: records are being evaluated, waiters are attached
//! - Accepted: a record was admitted; every waiter got the utterance
//! - TimedOut: the session ended without a result (deadline, cancel, or
//!   the transcription channel closing)
//!
//! At most one session is active; starting another while one is listening
//! joins the in-flight session.

mod driver;
mod listener;

pub use driver::{
    enforce_deadline, run_session, spawn_deadline, ChannelMessage, PhraseSource, SessionTimeouts,
    TranscriptionChannel, DEFAULT_FINAL_RESPONSE_TIMEOUT, DEFAULT_LISTEN_TIMEOUT,
};
pub use listener::{ListenState, Listener, NoResultReason, SessionHandle, SessionOutcome};
