//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::admission::{AdmissionPolicy, DEFAULT_STABILITY_THRESHOLD};
use crate::matcher::MatchConfig;
use crate::session::SessionTimeouts;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Fuzzy matcher tuning
    pub matching: MatchConfig,

    /// Stability a fuzzy phrase match needs before it is accepted
    pub stability_threshold: f64,

    /// Session deadlines
    pub timeouts: SessionTimeouts,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("speech-match");

        let socket_path = lookup("SPEECH_MATCH_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let defaults = MatchConfig::default();
        let matching = MatchConfig {
            threshold: parse_var(&lookup, "SPEECH_MATCH_THRESHOLD")?.unwrap_or(defaults.threshold),
            max_distance: parse_var(&lookup, "SPEECH_MATCH_DISTANCE")?
                .unwrap_or(defaults.max_distance),
            max_bits: parse_var(&lookup, "SPEECH_MATCH_MAX_BITS")?.unwrap_or(defaults.max_bits),
        };
        matching.validate().context("invalid match configuration")?;

        let stability_threshold =
            parse_var(&lookup, "SPEECH_MATCH_STABILITY")?.unwrap_or(DEFAULT_STABILITY_THRESHOLD);
        if !(0.0..=1.0).contains(&stability_threshold) {
            bail!("SPEECH_MATCH_STABILITY must be within [0, 1], got {stability_threshold}");
        }

        let default_timeouts = SessionTimeouts::default();
        let timeouts = SessionTimeouts {
            listen: parse_var(&lookup, "SPEECH_MATCH_LISTEN_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_timeouts.listen),
            final_response: parse_var(&lookup, "SPEECH_MATCH_FINAL_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default_timeouts.final_response),
        };

        Ok(Self {
            socket_path,
            data_dir,
            matching,
            stability_threshold,
            timeouts,
        })
    }

    /// Admission policy described by this configuration
    pub fn policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::new(self.matching, self.stability_threshold)
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value {raw:?} for {key}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/test")])).unwrap();
        assert!(config.socket_path.to_string_lossy().contains("speech-match"));
        assert_eq!(config.matching, MatchConfig::default());
        assert_eq!(config.stability_threshold, DEFAULT_STABILITY_THRESHOLD);
        assert_eq!(config.timeouts, SessionTimeouts::default());
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HOME", "/home/test"),
            ("SPEECH_MATCH_SOCKET", "/tmp/listen.sock"),
            ("SPEECH_MATCH_THRESHOLD", "0.5"),
            ("SPEECH_MATCH_DISTANCE", "100"),
            ("SPEECH_MATCH_STABILITY", " 0.7 "),
            ("SPEECH_MATCH_LISTEN_TIMEOUT_MS", "5000"),
        ]))
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/listen.sock"));
        assert_eq!(config.matching.threshold, 0.5);
        assert_eq!(config.matching.max_distance, 100);
        assert_eq!(config.policy().stability_threshold(), 0.7);
        assert_eq!(config.timeouts.listen, Duration::from_secs(5));
        assert_eq!(config.timeouts.final_response, Duration::from_secs(3));
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        for (key, value) in [
            ("SPEECH_MATCH_DISTANCE", "far"),
            ("SPEECH_MATCH_THRESHOLD", "2"),
            ("SPEECH_MATCH_MAX_BITS", "65"),
            ("SPEECH_MATCH_STABILITY", "-1"),
        ] {
            let result = Config::from_lookup(lookup(&[("HOME", "/h"), (key, value)]));
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }
}
