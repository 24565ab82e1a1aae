//! Bitap approximate search
//!
//! Each error level runs one right-to-left pass of the bit-parallel
//! recurrence over the text. Bit 0 of a mask is the last pattern character,
//! so a set top bit at position `j` means the pattern starts at `j - 1`.

use std::collections::HashMap;

use super::{MatchConfig, MatchError};

/// Score a candidate with `errors` edits starting at `x` (0.0 = perfect, 1.0 = bad).
///
/// Accuracy is `errors / pattern_len`; proximity adds `|loc - x| / max_distance`.
/// With a `max_distance` of zero any candidate away from `loc` scores 1.0.
pub fn bitap_score(
    errors: usize,
    x: usize,
    loc: usize,
    pattern_len: usize,
    max_distance: usize,
) -> f64 {
    let accuracy = errors as f64 / pattern_len as f64;
    let proximity = loc.abs_diff(x);
    if max_distance == 0 {
        return if proximity == 0 { accuracy } else { 1.0 };
    }
    accuracy + proximity as f64 / max_distance as f64
}

/// Build the per-character position masks for `pattern`
pub fn alphabet(pattern: &[char]) -> HashMap<char, u64> {
    let len = pattern.len();
    let mut masks = HashMap::with_capacity(len);
    for (i, &c) in pattern.iter().enumerate() {
        *masks.entry(c).or_insert(0) |= 1u64 << (len - i - 1);
    }
    masks
}

/// First exact occurrence of `pattern` starting at or after `from`
fn find_from(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    if from > text.len() {
        return None;
    }
    text[from..]
        .windows(pattern.len())
        .position(|window| window == pattern)
        .map(|offset| offset + from)
}

/// Last exact occurrence of `pattern` starting at or before `from`
fn rfind_from(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    let last_start = text.len().checked_sub(pattern.len())?.min(from);
    (0..=last_start)
        .rev()
        .find(|&start| &text[start..start + pattern.len()] == pattern)
}

/// Run the fuzzy search. `pattern` must be non-empty and `loc <= text.len()`.
pub(super) fn search(
    text: &[char],
    pattern: &[char],
    loc: usize,
    config: &MatchConfig,
) -> Result<Option<usize>, MatchError> {
    let pattern_len = pattern.len();
    if pattern_len > config.max_bits {
        return Err(MatchError::PatternTooLong {
            len: pattern_len,
            max_bits: config.max_bits,
        });
    }
    if pattern_len == 0 {
        return Ok(Some(loc));
    }

    let masks = alphabet(pattern);
    let score = |errors: usize, x: usize| {
        bitap_score(errors, x, loc, pattern_len, config.max_distance)
    };

    // Nearby exact hits tighten the threshold before the fuzzy passes.
    let mut threshold = config.threshold;
    if let Some(exact) = find_from(text, pattern, loc) {
        threshold = threshold.min(score(0, exact));
        if let Some(exact) = rfind_from(text, pattern, loc + pattern_len) {
            threshold = threshold.min(score(0, exact));
        }
    }

    let match_mask = 1u64 << (pattern_len - 1);
    let mut best = None;
    let mut bin_max = pattern_len + text.len();
    let mut last_rd: Vec<u64> = Vec::new();

    for d in 0..pattern_len {
        // How far from loc can a match with d errors still beat the threshold?
        let mut bin_min = 0;
        let mut bin_mid = bin_max;
        while bin_min < bin_mid {
            if score(d, loc + bin_mid) <= threshold {
                bin_min = bin_mid;
            } else {
                bin_max = bin_mid;
            }
            bin_mid = (bin_max - bin_min) / 2 + bin_min;
        }
        bin_max = bin_mid;

        let mut start = (loc + 1).saturating_sub(bin_mid).max(1);
        let finish = (loc + bin_mid).min(text.len()) + pattern_len;

        let mut rd = vec![0u64; finish + 2];
        rd[finish + 1] = (1u64 << d) - 1;

        let mut j = finish;
        while j >= start {
            let char_match = text
                .get(j - 1)
                .and_then(|c| masks.get(c))
                .copied()
                .unwrap_or(0);

            rd[j] = if d == 0 {
                ((rd[j + 1] << 1) | 1) & char_match
            } else {
                let prev = last_rd.get(j).copied().unwrap_or(0);
                let prev_next = last_rd.get(j + 1).copied().unwrap_or(0);
                (((rd[j + 1] << 1) | 1) & char_match)
                    | (((prev_next | prev) << 1) | 1)
                    | prev_next
            };

            if rd[j] & match_mask != 0 {
                let candidate = score(d, j - 1);
                if candidate <= threshold {
                    threshold = candidate;
                    best = Some(j - 1);
                    if j - 1 > loc {
                        // Don't stray further from loc on the other side.
                        start = (2 * loc).saturating_sub(j - 1).max(1);
                    } else {
                        // Already before loc; downhill from here.
                        break;
                    }
                }
            }
            j -= 1;
        }

        // No hope for a better match at higher error levels.
        if score(d + 1, loc) > threshold {
            break;
        }
        last_rd = rd;
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn run(
        text: &str,
        pattern: &str,
        loc: usize,
        threshold: f64,
        max_distance: usize,
    ) -> Option<usize> {
        let config = MatchConfig {
            threshold,
            max_distance,
            ..MatchConfig::default()
        };
        search(&chars(text), &chars(pattern), loc, &config).unwrap()
    }

    #[test]
    fn test_alphabet_unique() {
        let masks = alphabet(&chars("abc"));
        assert_eq!(masks[&'a'], 4);
        assert_eq!(masks[&'b'], 2);
        assert_eq!(masks[&'c'], 1);
    }

    #[test]
    fn test_alphabet_duplicates() {
        let masks = alphabet(&chars("abcaba"));
        assert_eq!(masks[&'a'], 37);
        assert_eq!(masks[&'b'], 18);
        assert_eq!(masks[&'c'], 8);
    }

    #[test]
    fn test_score_zero_distance() {
        assert_eq!(bitap_score(1, 4, 4, 4, 0), 0.25);
        assert_eq!(bitap_score(0, 5, 4, 4, 0), 1.0);
    }

    #[test]
    fn test_score_shrinks_as_distance_grows() {
        let mut previous = f64::INFINITY;
        for max_distance in [1, 10, 100, 1000, 100_000] {
            let score = bitap_score(1, 30, 4, 8, max_distance);
            assert!(score <= previous);
            previous = score;
        }
        // Candidates sitting on loc don't depend on distance at all.
        assert_eq!(bitap_score(2, 7, 7, 8, 10), bitap_score(2, 7, 7, 8, 1000));
    }

    #[test]
    fn test_exact_matches() {
        assert_eq!(run("abcdefghijk", "fgh", 5, 0.5, 100), Some(5));
        assert_eq!(run("abcdefghijk", "fgh", 0, 0.5, 100), Some(5));
    }

    #[test]
    fn test_fuzzy_matches() {
        assert_eq!(run("abcdefghijk", "efxhi", 0, 0.5, 100), Some(4));
        assert_eq!(run("abcdefghijk", "cdefxyhijk", 5, 0.5, 100), Some(2));
        assert_eq!(run("abcdefghijk", "bxy", 1, 0.5, 100), None);
    }

    #[test]
    fn test_overflow_and_underflow() {
        assert_eq!(run("123456789xx0", "3456789x0", 2, 0.5, 100), Some(2));
        assert_eq!(run("abcdef", "xxabc", 4, 0.5, 100), Some(0));
        assert_eq!(run("abcdef", "defyy", 4, 0.5, 100), Some(3));
        assert_eq!(run("abcdef", "xabcdefy", 0, 0.5, 100), Some(0));
    }

    #[test]
    fn test_threshold() {
        assert_eq!(run("abcdefghijk", "efxyhi", 1, 0.4, 100), Some(4));
        assert_eq!(run("abcdefghijk", "efxyhi", 1, 0.3, 100), None);
        assert_eq!(run("abcdefghijk", "bcdef", 1, 0.0, 100), Some(1));
    }

    #[test]
    fn test_multiple_candidates_prefer_nearest() {
        assert_eq!(run("abcdexyzabcde", "abccde", 3, 0.5, 100), Some(0));
        assert_eq!(run("abcdexyzabcde", "abccde", 5, 0.5, 100), Some(8));
    }

    #[test]
    fn test_distance() {
        let alphabet = "abcdefghijklmnopqrstuvwxyz";
        assert_eq!(run(alphabet, "abcdefg", 24, 0.5, 10), None);
        assert_eq!(run(alphabet, "abcdxxefg", 1, 0.5, 10), Some(0));
        assert_eq!(run(alphabet, "abcdefg", 24, 0.5, 1000), Some(0));
    }

    #[test]
    fn test_rejects_long_pattern() {
        let config = MatchConfig::default();
        let err = search(&chars("abc"), &chars(&"a".repeat(40)), 0, &config).unwrap_err();
        assert!(matches!(err, MatchError::PatternTooLong { len: 40, max_bits: 32 }));
    }

    #[test]
    fn test_exact_helpers() {
        let text = chars("abcabc");
        let pattern = chars("abc");
        assert_eq!(find_from(&text, &pattern, 0), Some(0));
        assert_eq!(find_from(&text, &pattern, 1), Some(3));
        assert_eq!(find_from(&text, &pattern, 4), None);
        assert_eq!(find_from(&text, &pattern, 9), None);
        assert_eq!(rfind_from(&text, &pattern, 99), Some(3));
        assert_eq!(rfind_from(&text, &pattern, 2), Some(0));
        assert_eq!(rfind_from(&chars("ab"), &pattern, 5), None);
    }

    proptest! {
        #[test]
        fn prop_wider_distance_never_rejects_a_candidate(
            pattern_len in 1usize..=64,
            errors in 0usize..64,
            loc in 0usize..500,
            x in 0usize..500,
            near in 1usize..5_000,
            extra in 0usize..5_000,
            threshold in 0.0f64..=1.0,
        ) {
            let errors = errors.min(pattern_len);
            let far = near + extra;
            let narrow = bitap_score(errors, x, loc, pattern_len, near);
            let wide = bitap_score(errors, x, loc, pattern_len, far);

            prop_assert!(wide <= narrow);
            if narrow <= threshold {
                prop_assert!(wide <= threshold);
            }
            if x == loc {
                prop_assert_eq!(wide, narrow);
                prop_assert_eq!(bitap_score(errors, x, loc, pattern_len, 0), narrow);
            }
        }
    }
}
