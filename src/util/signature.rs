//! Map signatures: the namespace every persisted artifact of one scan lives under.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ticks (100 ns intervals) between 0001-01-01T00:00:00 and the Unix epoch.
const TICKS_AT_UNIX_EPOCH: u64 = 621_355_968_000_000_000;

/// Default prefix for generated signatures
pub const DEFAULT_SIGNATURE_PREFIX: &str = "room";

static SIGNATURE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn is_valid_signature(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    match SIGNATURE_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").ok())
        .as_ref()
    {
        Some(re) => re.is_match(value),
        None => value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid map signature {0:?}: expected one or more of [A-Za-z0-9_]")]
pub struct InvalidSignature(pub String);

/// Unique identifier for one persisted mapping session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MapSignature(String);

impl MapSignature {
    /// Parse a signature, rejecting anything that could escape its namespace
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidSignature> {
        let value = value.into();
        if is_valid_signature(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidSignature(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MapSignature {
    type Error = InvalidSignature;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MapSignature> for String {
    fn from(signature: MapSignature) -> Self {
        signature.0
    }
}

/// Convert a wall-clock instant to 100 ns ticks since 0001-01-01.
pub fn ticks_at(instant: DateTime<Utc>) -> u64 {
    let secs = u64::try_from(instant.timestamp()).unwrap_or(0);
    let sub = u64::from(instant.timestamp_subsec_nanos() / 100);
    TICKS_AT_UNIX_EPOCH
        .saturating_add(secs.saturating_mul(10_000_000))
        .saturating_add(sub)
}

/// Generates strictly increasing `{prefix}_{ticks}` signatures.
#[derive(Debug, Clone)]
pub struct SignatureGenerator {
    prefix: String,
    last_ticks: u64,
}

impl SignatureGenerator {
    pub fn new(prefix: impl Into<String>) -> Result<Self, InvalidSignature> {
        let prefix = prefix.into();
        if !is_valid_signature(&prefix) {
            return Err(InvalidSignature(prefix));
        }
        Ok(Self {
            prefix,
            last_ticks: 0,
        })
    }

    /// Continue after a signature from an earlier process, so the next one
    /// sorts after it even if the clock has gone back since. Signatures with
    /// another prefix or without a tick suffix are ignored.
    pub fn resume_after(&mut self, previous: &MapSignature) -> bool {
        let ticks = previous
            .as_str()
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|digits| digits.parse::<u64>().ok());
        match ticks {
            Some(ticks) => {
                self.last_ticks = self.last_ticks.max(ticks);
                true
            }
            None => false,
        }
    }

    /// Next signature based on the current time
    pub fn next(&mut self) -> MapSignature {
        self.next_at(Utc::now())
    }

    /// Next signature for a given instant; never repeats or goes backwards,
    /// even if the clock does.
    pub fn next_at(&mut self, instant: DateTime<Utc>) -> MapSignature {
        let ticks = ticks_at(instant).max(self.last_ticks.saturating_add(1));
        self.last_ticks = ticks;
        // prefix was validated and ticks are digits
        MapSignature(format!("{}_{}", self.prefix, ticks))
    }
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_SIGNATURE_PREFIX.to_string(),
            last_ticks: 0,
        }
    }
}
