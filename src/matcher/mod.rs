//! Approximate phrase location
//!
//! Finds the best approximate occurrence of a pattern in transcribed text
//! near an expected location. Exact hits are answered by fast paths; anything
//! else goes through the Bitap search in [`bitap`], which tolerates
//! substitutions, insertions and deletions and weighs them against the
//! distance from the expected location.
//!
//! All offsets are character offsets, not byte offsets.

mod bitap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bitap::{alphabet, bitap_score};

/// Default score above which a candidate is rejected (0.0 = perfect match)
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Default distance at which proximity alone adds 1.0 to the score
pub const DEFAULT_MAX_DISTANCE: usize = 1000;

/// Default longest pattern the fuzzy search accepts
pub const DEFAULT_MAX_BITS: usize = 32;

/// Width of the bitmasks used by the search
pub const MASK_WIDTH: usize = u64::BITS as usize;

/// Tuning for [`locate`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Highest acceptable score, in `[0, 1]`. Lower is stricter.
    pub threshold: f64,

    /// How far from the expected location a match may drift. A match this
    /// many characters away adds 1.0 to its score.
    pub max_distance: usize,

    /// Longest pattern the fuzzy search handles
    pub max_bits: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_distance: DEFAULT_MAX_DISTANCE,
            max_bits: DEFAULT_MAX_BITS,
        }
    }
}

impl MatchConfig {
    /// Check that the configuration can drive a search
    pub fn validate(&self) -> Result<(), MatchError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(MatchError::InvalidInput(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if self.max_bits == 0 || self.max_bits > MASK_WIDTH {
            return Err(MatchError::InvalidInput(format!(
                "max_bits {} must be between 1 and {}",
                self.max_bits, MASK_WIDTH
            )));
        }
        Ok(())
    }
}

/// Errors raised while locating a pattern
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The search cannot run with the given inputs
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The pattern does not fit in the search bitmask
    #[error("pattern of {len} characters exceeds the {max_bits} character limit")]
    PatternTooLong { len: usize, max_bits: usize },
}

/// Locate the best instance of `pattern` in `text` near `loc`.
///
/// Returns the character offset where the match starts, or `None` when
/// nothing scores at or below `config.threshold`. `loc` is clamped to the
/// length of `text`. An empty pattern matches at `loc`.
pub fn locate(
    text: &str,
    pattern: &str,
    loc: usize,
    config: &MatchConfig,
) -> Result<Option<usize>, MatchError> {
    config.validate()?;

    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let loc = loc.min(text.len());

    if text == pattern {
        return Ok(Some(0));
    }
    if text.is_empty() {
        return Ok(None);
    }
    if text[loc..].starts_with(&pattern) {
        return Ok(Some(loc));
    }

    bitap::search(&text, &pattern, loc, config)
}
