//! Decoding of transcription service messages
//!
//! The service sends plain-text control messages alongside JSON
//! transcription results. Only the first alternative of a result is used.

use serde::Deserialize;
use thiserror::Error;

use crate::admission::TranscriptionRecord;

/// Acknowledgement sent once the service has read the session setup
pub const CONFIGURATION_ACK: &str = "got the configuration message";

/// Sent when the service detects the speaker stopped. The final result may
/// still follow.
pub const END_OF_UTTERANCE: &str = "end of utterance";

/// A decoded message from the transcription service
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConfigurationAck,
    EndOfUtterance,
    Transcription(TranscriptionRecord),
}

/// A message that could not be turned into a transcription record
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed transcription record: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("malformed transcription record: no alternatives")]
    MissingAlternative,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    #[serde(default)]
    alternatives: Vec<WireAlternative>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    stability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireAlternative {
    #[serde(default)]
    transcript: String,
}

/// Decode one raw message
pub fn decode(raw: &str) -> Result<ServerMessage, RecordError> {
    match raw {
        CONFIGURATION_ACK => return Ok(ServerMessage::ConfigurationAck),
        END_OF_UTTERANCE => return Ok(ServerMessage::EndOfUtterance),
        _ => {}
    }

    let result: WireResult = serde_json::from_str(raw)?;
    let alternative = result
        .alternatives
        .into_iter()
        .next()
        .ok_or(RecordError::MissingAlternative)?;

    Ok(ServerMessage::Transcription(TranscriptionRecord {
        transcript: alternative.transcript,
        is_final: result.is_final,
        stability: result.stability.unwrap_or(0.0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_messages() {
        assert_eq!(decode(CONFIGURATION_ACK).unwrap(), ServerMessage::ConfigurationAck);
        assert_eq!(decode(END_OF_UTTERANCE).unwrap(), ServerMessage::EndOfUtterance);
    }

    #[test]
    fn test_interim_result() {
        let raw = r#"{"alternatives":[{"transcript":"Cat please","confidence":0}],"isFinal":false,"stability":0.9}"#;
        let ServerMessage::Transcription(record) = decode(raw).unwrap() else {
            panic!("expected a transcription");
        };
        assert_eq!(record.transcript, "Cat please");
        assert!(!record.is_final);
        assert_eq!(record.stability, 0.9);
    }

    #[test]
    fn test_final_result_without_stability() {
        let raw = r#"{"alternatives":[{"transcript":"hello"},{"transcript":"yellow"}],"isFinal":true}"#;
        let ServerMessage::Transcription(record) = decode(raw).unwrap() else {
            panic!("expected a transcription");
        };
        assert_eq!(record.transcript, "hello");
        assert!(record.is_final);
        assert_eq!(record.stability, 0.0);
    }

    #[test]
    fn test_null_stability() {
        let raw = r#"{"alternatives":[{"transcript":"hi"}],"stability":null}"#;
        assert!(matches!(
            decode(raw).unwrap(),
            ServerMessage::Transcription(TranscriptionRecord { stability, .. }) if stability == 0.0
        ));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(decode("not json"), Err(RecordError::MalformedJson(_))));
        assert!(matches!(
            decode(r#"{"alternatives":[],"isFinal":true}"#),
            Err(RecordError::MissingAlternative)
        ));
        assert!(decode(r#"{"alternatives":"nope"}"#).is_err());
    }
}
