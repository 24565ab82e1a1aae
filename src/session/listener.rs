//! Core session state machine
//!
//! Holds the active session, fans its outcome out to every waiter, and keeps
//! two results with different lifetimes: the per-session result (reset when a
//! session starts, for edge-triggered phrase checks) and the last accepted
//! utterance (kept across sessions).

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::admission::{normalize, AdmissionPolicy, Decision, SessionState, TranscriptionRecord};
use crate::events::ListenEvent;
use crate::matcher::{locate, MatchError};
use crate::record::{self, ServerMessage};

/// Outcomes kept for waiters that arrive after their session resolved
const RETAINED_OUTCOMES: usize = 8;

/// Lifecycle of the most recent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenState {
    /// No session has been started
    #[default]
    Idle,
    /// Evaluating records for the active session
    Listening,
    /// The last session ended with an utterance
    Accepted,
    /// The last session ended without a result
    TimedOut,
}

impl std::fmt::Display for ListenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenState::Idle => write!(f, "Idle"),
            ListenState::Listening => write!(f, "Listening"),
            ListenState::Accepted => write!(f, "Accepted"),
            ListenState::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Why a session ended without an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResultReason {
    /// Nothing qualifying arrived before the deadline
    TimedOut,
    /// The session was stopped from outside
    Cancelled,
    /// The transcription service ended the session
    ChannelClosed,
    /// The session's outcome is no longer retained
    Expired,
}

impl std::fmt::Display for NoResultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoResultReason::TimedOut => write!(f, "timed out"),
            NoResultReason::Cancelled => write!(f, "cancelled"),
            NoResultReason::ChannelClosed => write!(f, "channel closed"),
            NoResultReason::Expired => write!(f, "expired"),
        }
    }
}

/// How a session ended. Every waiter on a session sees the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Accepted { utterance: String },
    NoResult { reason: NoResultReason },
}

impl SessionOutcome {
    pub fn utterance(&self) -> Option<&str> {
        match self {
            SessionOutcome::Accepted { utterance } => Some(utterance),
            SessionOutcome::NoResult { .. } => None,
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Accepted { utterance } => write!(f, "accepted \"{}\"", utterance),
            SessionOutcome::NoResult { reason } => write!(f, "no result ({})", reason),
        }
    }
}

/// Identifies one listening session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u64,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct ActiveSession {
    handle: SessionHandle,
    state: SessionState,
    outcome_tx: broadcast::Sender<SessionOutcome>,
    started_at: Instant,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    active: Option<ActiveSession>,
    state: ListenState,
    resolved: VecDeque<(SessionHandle, SessionOutcome)>,
    /// Normalized transcript accepted in the current session, empty until then
    session_result: String,
    /// Last accepted utterance of any session
    last_utterance: Option<String>,
}

impl Inner {
    fn remember(&mut self, handle: SessionHandle, outcome: SessionOutcome) {
        if self.resolved.len() == RETAINED_OUTCOMES {
            self.resolved.pop_front();
        }
        self.resolved.push_back((handle, outcome));
    }

    fn outcome_of(&self, handle: SessionHandle) -> SessionOutcome {
        self.resolved
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or(SessionOutcome::NoResult {
                reason: NoResultReason::Expired,
            })
    }
}

/// Runs listening sessions and admits their transcription records
pub struct Listener {
    policy: AdmissionPolicy,
    exact_fallback: bool,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<ListenEvent>,
}

impl Listener {
    /// Create a listener that reports transitions on `event_tx`
    pub fn new(policy: AdmissionPolicy, event_tx: broadcast::Sender<ListenEvent>) -> Self {
        Self {
            policy,
            exact_fallback: true,
            inner: Mutex::new(Inner::default()),
            event_tx,
        }
    }

    /// Whether records fall back to exact phrase matching when the joined
    /// phrase list is too long for the fuzzy matcher (default: on)
    pub fn with_exact_fallback(mut self, enabled: bool) -> Self {
        self.exact_fallback = enabled;
        self
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListenEvent> {
        self.event_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ListenEvent) {
        debug!(%event, "emitting listen event");
        let _ = self.event_tx.send(event);
    }

    /// Start a session expecting `phrases`, or join the one in flight
    pub fn start_session(&self, phrases: Vec<String>) -> SessionHandle {
        self.start_or_join(phrases).0
    }

    /// Like [`start_session`](Self::start_session), reading the phrases from
    /// `source` only if a new session actually starts
    pub fn start_from<P: super::PhraseSource + ?Sized>(&self, source: &P) -> (SessionHandle, bool) {
        if let Some(handle) = self.active_session() {
            return (handle, false);
        }
        self.start_or_join(source.snapshot())
    }

    /// Start a session or join the active one. The flag is `true` when a new
    /// session was started; a joined session keeps its original phrases.
    pub fn start_or_join(&self, phrases: Vec<String>) -> (SessionHandle, bool) {
        let mut inner = self.lock();
        if let Some(active) = &inner.active {
            debug!(session = active.handle.id, "joining listening session in progress");
            return (active.handle, false);
        }

        inner.next_id += 1;
        let handle = SessionHandle { id: inner.next_id };
        let (outcome_tx, _) = broadcast::channel(1);

        inner.session_result.clear();
        inner.state = ListenState::Listening;
        inner.active = Some(ActiveSession {
            handle,
            state: SessionState::new(phrases.clone()),
            outcome_tx,
            started_at: Instant::now(),
        });

        info!(session = handle.id, ?phrases, "listening session started");
        self.emit(ListenEvent::SessionStarted {
            session: handle.id,
            phrases,
        });

        (handle, true)
    }

    /// Wait for the outcome of `handle`'s session.
    ///
    /// Resolves immediately if the session already ended. Outcomes of old
    /// sessions are retained for a short while; past that the result is
    /// `NoResult(Expired)`.
    pub async fn await_result(&self, handle: SessionHandle) -> SessionOutcome {
        let mut outcome_rx = {
            let inner = self.lock();
            match &inner.active {
                Some(active) if active.handle == handle => active.outcome_tx.subscribe(),
                _ => return inner.outcome_of(handle),
            }
        };

        match outcome_rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => self.lock().outcome_of(handle),
        }
    }

    /// Feed one raw message from the transcription service.
    ///
    /// Control messages and malformed records are logged and dropped without
    /// touching the session. Returns the decision when a record was evaluated.
    pub fn handle_message(&self, raw: &str) -> Result<Option<Decision>, MatchError> {
        match record::decode(raw) {
            Ok(ServerMessage::Transcription(record)) => self.handle_record(&record),
            Ok(ServerMessage::ConfigurationAck) => {
                debug!("transcription service acknowledged configuration");
                Ok(None)
            }
            Ok(ServerMessage::EndOfUtterance) => {
                debug!("end of utterance, waiting for final result");
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "dropping transcription message");
                self.emit(ListenEvent::RecordDropped {
                    reason: err.to_string(),
                });
                Ok(None)
            }
        }
    }

    /// Evaluate a record against the active session, resolving it on accept.
    ///
    /// Returns `None` when no session is listening.
    pub fn handle_record(
        &self,
        record: &TranscriptionRecord,
    ) -> Result<Option<Decision>, MatchError> {
        let mut inner = self.lock();
        let Some(active) = inner.active.as_mut() else {
            debug!("no listening session, record ignored");
            return Ok(None);
        };
        let session = active.handle.id;

        let decision = match self.policy.evaluate(record, &mut active.state) {
            Ok(decision) => decision,
            Err(err @ MatchError::PatternTooLong { .. }) if self.exact_fallback => {
                warn!(session, error = %err, "phrase list too long, matching exact phrases only");
                self.policy.evaluate_exact(record, &mut active.state)
            }
            Err(err) => {
                warn!(session, error = %err, "record evaluation aborted");
                return Err(err);
            }
        };

        match &decision {
            Decision::Accept(utterance) => {
                inner.session_result = normalize(&record.transcript);
                inner.last_utterance = Some(utterance.clone());
                self.resolve(
                    &mut inner,
                    SessionOutcome::Accepted {
                        utterance: utterance.clone(),
                    },
                );
            }
            Decision::Defer => {
                self.emit(ListenEvent::RecordDeferred {
                    session,
                    transcript: normalize(&record.transcript),
                });
            }
        }

        Ok(Some(decision))
    }

    /// Take the active session to its terminal state and release its waiters
    fn resolve(&self, inner: &mut Inner, outcome: SessionOutcome) -> bool {
        let Some(active) = inner.active.take() else {
            return false;
        };
        let session = active.handle.id;
        let duration_ms = active.started_at.elapsed().as_millis() as u64;

        inner.state = match outcome {
            SessionOutcome::Accepted { .. } => ListenState::Accepted,
            SessionOutcome::NoResult { .. } => ListenState::TimedOut,
        };
        inner.remember(active.handle, outcome.clone());

        let event = match &outcome {
            SessionOutcome::Accepted { utterance } => ListenEvent::UtteranceAccepted {
                session,
                utterance: utterance.clone(),
                duration_ms,
            },
            SessionOutcome::NoResult { reason } => ListenEvent::SessionAbandoned {
                session,
                reason: *reason,
                duration_ms,
            },
        };

        info!(
            session,
            waiters = active.outcome_tx.receiver_count(),
            duration_ms,
            %outcome,
            "listening session resolved"
        );
        let _ = active.outcome_tx.send(outcome);
        self.emit(event);
        true
    }

    fn abandon(&self, handle: Option<SessionHandle>, reason: NoResultReason) -> bool {
        let mut inner = self.lock();
        match &inner.active {
            Some(active) if handle.map_or(true, |h| h == active.handle) => {}
            _ => {
                debug!(?handle, %reason, "no matching listening session");
                return false;
            }
        }
        self.resolve(&mut inner, SessionOutcome::NoResult { reason })
    }

    /// End `handle`'s session without a result because its deadline passed
    pub fn time_out(&self, handle: SessionHandle) -> bool {
        self.abandon(Some(handle), NoResultReason::TimedOut)
    }

    /// End `handle`'s session because the transcription service closed it
    pub fn end_session(&self, handle: SessionHandle) -> bool {
        self.abandon(Some(handle), NoResultReason::ChannelClosed)
    }

    /// Abort whatever session is listening. Safe to call at any time.
    pub fn cancel(&self) -> bool {
        self.abandon(None, NoResultReason::Cancelled)
    }

    /// Announce that `handle`'s listen window elapsed. Returns `false` if the
    /// session already ended.
    pub fn request_stop(&self, handle: SessionHandle) -> bool {
        if self.active_session() != Some(handle) {
            return false;
        }
        info!(session = handle.id, "listen window elapsed, requesting final result");
        self.emit(ListenEvent::StopRequested { session: handle.id });
        true
    }

    pub fn state(&self) -> ListenState {
        self.lock().state
    }

    pub fn is_listening(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn active_session(&self) -> Option<SessionHandle> {
        self.lock().active.as_ref().map(|active| active.handle)
    }

    /// Number of sessions started so far
    pub fn sessions_started(&self) -> u64 {
        self.lock().next_id
    }

    /// Last accepted utterance of any session
    pub fn last_utterance(&self) -> Option<String> {
        self.lock().last_utterance.clone()
    }

    /// Transcript accepted in the current session, empty until one is
    pub fn session_result(&self) -> String {
        self.lock().session_result.clone()
    }

    /// Whether `phrase` was heard in the current session's result
    pub fn hears(&self, phrase: &str) -> Result<bool, MatchError> {
        let phrase = normalize(phrase);
        let heard = self.session_result();
        if phrase.is_empty() || heard.is_empty() {
            return Ok(false);
        }
        Ok(locate(&heard, &phrase, 0, self.policy.matching())?.is_some())
    }
}
