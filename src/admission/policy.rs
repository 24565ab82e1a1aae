//! Accept/defer decisions for a single listening session

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::matcher::{locate, MatchConfig, MatchError};

/// Stability above which a fuzzy phrase match is trusted
pub const DEFAULT_STABILITY_THRESHOLD: f64 = 0.85;

/// One streamed result from the transcription service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    /// Best transcript for the audio heard so far
    pub transcript: String,
    /// Whether the service will not revise this result
    pub is_final: bool,
    /// Service's confidence that the result won't change, in `[0, 1]`
    pub stability: f64,
}

/// Outcome of evaluating one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// End the session with this utterance
    Accept(String),
    /// Wait for a later record
    Defer,
}

/// Per-session admission state
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    phrases: Vec<String>,
    last_candidate: Option<String>,
    accepted: bool,
}

impl SessionState {
    /// Start a session expecting `phrases`
    pub fn new(phrases: Vec<String>) -> Self {
        Self {
            phrases,
            last_candidate: None,
            accepted: false,
        }
    }

    /// Most recent deferred transcript, normalized
    pub fn last_candidate(&self) -> Option<&str> {
        self.last_candidate.as_deref()
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }
}

/// Lower-case, drop `.`, `?` and `!`, and trim surrounding whitespace
pub fn normalize(transcript: &str) -> String {
    transcript
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | '?' | '!'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Characters `start .. start + len` of `text`, cut short at the end of `text`
fn char_slice(text: &str, start: usize, len: usize) -> String {
    text.chars().skip(start).take(len).collect()
}

/// Decides whether transcription records end a session
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    matching: MatchConfig,
    stability_threshold: f64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(MatchConfig::default(), DEFAULT_STABILITY_THRESHOLD)
    }
}

impl AdmissionPolicy {
    pub fn new(matching: MatchConfig, stability_threshold: f64) -> Self {
        Self {
            matching,
            stability_threshold,
        }
    }

    pub fn matching(&self) -> &MatchConfig {
        &self.matching
    }

    pub fn stability_threshold(&self) -> f64 {
        self.stability_threshold
    }

    /// Evaluate `record` against the session's phrase list.
    ///
    /// The phrases are joined with spaces and matched as one pattern, so a
    /// long phrase list can exceed the matcher's pattern limit and fail with
    /// [`MatchError::PatternTooLong`]. Errors leave the session untouched.
    pub fn evaluate(
        &self,
        record: &TranscriptionRecord,
        session: &mut SessionState,
    ) -> Result<Decision, MatchError> {
        if session.accepted {
            trace!("session already accepted, record ignored");
            return Ok(Decision::Defer);
        }

        let normalized = normalize(&record.transcript);
        let joined = session.phrases.join(" ");
        let fuzzy = self.fuzzy_match(&normalized, &joined)?;

        Ok(self.decide(record, session, normalized, fuzzy))
    }

    /// Evaluate `record` using only finality and exact phrase equality
    pub fn evaluate_exact(
        &self,
        record: &TranscriptionRecord,
        session: &mut SessionState,
    ) -> Decision {
        if session.accepted {
            return Decision::Defer;
        }
        let normalized = normalize(&record.transcript);
        self.decide(record, session, normalized, None)
    }

    /// Substring of `normalized` that approximately matches `joined`
    fn fuzzy_match(&self, normalized: &str, joined: &str) -> Result<Option<String>, MatchError> {
        if normalized.is_empty() || joined.is_empty() {
            return Ok(None);
        }

        let found = locate(normalized, joined, 0, &self.matching)?;
        Ok(found.map(|index| {
            let text = char_slice(normalized, index, joined.chars().count());
            debug!(index, matched = %text, "partial phrase match");
            text
        }))
    }

    fn decide(
        &self,
        record: &TranscriptionRecord,
        session: &mut SessionState,
        normalized: String,
        fuzzy: Option<String>,
    ) -> Decision {
        let exact_phrase_match = session.phrases.iter().any(|p| *p == normalized);
        let stable_fuzzy_match = fuzzy.is_some() && record.stability > self.stability_threshold;

        if !(record.is_final || exact_phrase_match || stable_fuzzy_match) {
            debug!(
                transcript = %normalized,
                stability = record.stability,
                "result not good enough yet"
            );
            session.last_candidate = Some(normalized);
            return Decision::Defer;
        }

        session.accepted = true;
        Decision::Accept(fuzzy.unwrap_or(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(transcript: &str, is_final: bool, stability: f64) -> TranscriptionRecord {
        TranscriptionRecord {
            transcript: transcript.to_string(),
            is_final,
            stability,
        }
    }

    fn session(phrases: &[&str]) -> SessionState {
        SessionState::new(phrases.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello, World!? "), "hello, world");
        assert_eq!(normalize("What...?"), "what");
        assert_eq!(normalize("!!!"), "");
    }

    #[test]
    fn test_final_always_accepted() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["cat"]);

        let decision = policy.evaluate(&record("Cat please", true, 0.0), &mut state).unwrap();

        assert!(matches!(decision, Decision::Accept(_)));
        assert!(state.is_accepted());
    }

    #[test]
    fn test_final_without_phrases_keeps_transcript() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&[]);

        let decision = policy.evaluate(&record("Hello there.", true, 0.0), &mut state).unwrap();

        assert_eq!(decision, Decision::Accept("hello there".to_string()));
    }

    #[test]
    fn test_unstable_unmatched_deferred() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["cat"]);

        let decision = policy.evaluate(&record("hello there", false, 0.5), &mut state).unwrap();

        assert_eq!(decision, Decision::Defer);
        assert!(!state.is_accepted());
        assert_eq!(state.last_candidate(), Some("hello there"));
    }

    #[test]
    fn test_stable_fuzzy_match_returns_substring() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["cat"]);

        let decision = policy
            .evaluate(&record("I want a cat please", false, 0.9), &mut state)
            .unwrap();

        assert_eq!(decision, Decision::Accept("cat".to_string()));
    }

    #[test]
    fn test_unstable_fuzzy_match_deferred() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["cat"]);

        let decision = policy.evaluate(&record("a cat please", false, 0.85), &mut state).unwrap();

        assert_eq!(decision, Decision::Defer);
    }

    #[test]
    fn test_exact_phrase_accepted_when_unstable() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["dog", "cat"]);

        let decision = policy.evaluate(&record("Cat!", false, 0.0), &mut state).unwrap();

        assert_eq!(decision, Decision::Accept("cat".to_string()));
    }

    #[test]
    fn test_phrases_are_matched_joined() {
        // The whole list is one pattern: a transcript holding only one of
        // several phrases doesn't fuzzy-match, even when stable.
        let policy = AdmissionPolicy::default();
        let mut state = session(&["red", "blue"]);

        let decision = policy.evaluate(&record("i said red", false, 0.9), &mut state).unwrap();
        assert_eq!(decision, Decision::Defer);

        let decision = policy.evaluate(&record("red blue", false, 0.9), &mut state).unwrap();
        assert_eq!(decision, Decision::Accept("red blue".to_string()));
    }

    #[test]
    fn test_fuzzy_substring_clamped_to_transcript() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["hello world"]);

        let decision = policy
            .evaluate(&record("say hello worl", false, 0.95), &mut state)
            .unwrap();

        assert_eq!(decision, Decision::Accept("hello worl".to_string()));
    }

    #[test]
    fn test_char_slice_clamps() {
        assert_eq!(char_slice("hello", 3, 10), "lo");
        assert_eq!(char_slice("hello", 9, 2), "");
        assert_eq!(char_slice("día feliz", 1, 2), "ía");
    }

    #[test]
    fn test_long_phrase_list_surfaces_error() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["the first phrase", "and a second phrase", "plus a third"]);

        let err = policy
            .evaluate(&record("something else entirely", true, 1.0), &mut state)
            .unwrap_err();

        assert!(matches!(err, MatchError::PatternTooLong { .. }));
        assert!(!state.is_accepted());

        let decision = policy.evaluate_exact(&record("Plus a third.", false, 0.1), &mut state);
        assert_eq!(decision, Decision::Accept("plus a third".to_string()));
    }

    #[test]
    fn test_accepted_session_ignores_records() {
        let policy = AdmissionPolicy::default();
        let mut state = session(&["cat"]);

        policy.evaluate(&record("cat", true, 1.0), &mut state).unwrap();
        let decision = policy.evaluate(&record("dog", true, 1.0), &mut state).unwrap();

        assert_eq!(decision, Decision::Defer);
        assert_eq!(policy.evaluate_exact(&record("cat", true, 1.0), &mut state), Decision::Defer);
    }

    #[test]
    fn test_stability_threshold_is_configurable() {
        let policy = AdmissionPolicy::new(MatchConfig::default(), 0.5);
        let mut state = session(&["cat"]);

        let decision = policy.evaluate(&record("a cat", false, 0.6), &mut state).unwrap();

        assert_eq!(decision, Decision::Accept("cat".to_string()));
    }
}
