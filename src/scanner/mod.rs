//! Content scanning of serialized events.
//!
//! The rule engine is a black box behind `Classifier`: give it the bytes of a
//! serialized record, get back the identifiers of the rules that matched.
//! `ScanPolicy` decides what happens to records without matches.

pub mod rules;

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use thiserror::Error;

pub use rules::{load_rules_dir, RuleLoadError, YaraClassifier};

/// Retention policy for scanned events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPolicy {
    /// No scanning requested; every event is delivered.
    #[default]
    None,
    /// Scan and annotate, deliver everything.
    All,
    /// Deliver only events with at least one match.
    MatchesOnly,
}

impl ScanPolicy {
    pub fn should_deliver(self, match_count: usize) -> bool {
        match self {
            ScanPolicy::None | ScanPolicy::All => true,
            ScanPolicy::MatchesOnly => match_count > 0,
        }
    }
}

impl FromStr for ScanPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none"                     => Ok(ScanPolicy::None),
            "all"                      => Ok(ScanPolicy::All),
            "matches" | "matchesonly"  => Ok(ScanPolicy::MatchesOnly),
            _                          => Err(()),
        }
    }
}

impl fmt::Display for ScanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanPolicy::None => "None",
            ScanPolicy::All => "All",
            ScanPolicy::MatchesOnly => "Matches",
        })
    }
}

/// Rule-based classifier over serialized event bytes.
pub trait Classifier: Send + Sync {
    fn classify(&self, data: &[u8]) -> Result<Vec<String>, ScanError>;
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan engine error: {0}")]
    Engine(String),
}

/// Scanning part of a validated collector: compiled rules plus policy.
#[derive(Clone)]
pub struct ScanSettings {
    pub rules_dir: PathBuf,
    pub policy: ScanPolicy,
    pub classifier: Arc<dyn Classifier>,
}

impl fmt::Debug for ScanSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSettings")
            .field("rules_dir", &self.rules_dir)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
