//! speech-match: phrase matching for voice-triggered listening
//!
//! Streams of transcription results are matched against a small set of
//! expected phrases:
//! - [`matcher`]: approximate (Bitap) location of a phrase in noisy text
//! - [`admission`]: accept/defer decisions for interim and final results
//! - [`session`]: one listening session at a time, its waiters and deadlines
//! - [`ipc`]: Unix socket front end used by the daemon binary

pub mod admission;
pub mod config;
pub mod events;
pub mod ipc;
pub mod lifecycle;
pub mod matcher;
pub mod record;
pub mod session;

pub use admission::{AdmissionPolicy, Decision, TranscriptionRecord};
pub use matcher::{locate, MatchConfig, MatchError};
pub use session::{Listener, SessionHandle, SessionOutcome};
