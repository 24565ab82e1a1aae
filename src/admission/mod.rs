//! Admission of streamed transcription results
//!
//! Decides, record by record, whether a transcription result is good enough
//! to end a listening session:
//! - Final results are always accepted
//! - Results that equal one of the expected phrases are accepted
//! - Results that fuzzily contain the phrase list are accepted once stable

mod policy;

pub use policy::{
    normalize, AdmissionPolicy, Decision, SessionState, TranscriptionRecord,
    DEFAULT_STABILITY_THRESHOLD,
};
