//! Causal clocks.
//!
//! A [`CausalClock`] records, for every provider it has heard of, the latest
//! authoring timestamp observed from that provider. It is the unit of "how
//! much of provider X's history have I seen" and the frontier the sync
//! orchestrator advances page by page.
//!
//! Reads never mutate a clock: asking for a provider the clock has never seen
//! yields an entry at [`min_instant`], and only [`CausalClock::update`]
//! inserts or advances entries.

use std::cmp::Ordering;

use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by misuse of clock values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Can't compare clock entries from different providers ({left}, {right})")]
    ProviderMismatch { left: String, right: String },

    #[error("Duplicate provider id in clock: {0}")]
    DuplicateProvider(String),
}

/// The smallest representable instant. Unknown providers sit here.
pub fn min_instant() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// Current UTC time truncated to microseconds.
///
/// Every backend stores timestamps with microsecond precision, so values
/// produced here survive a round-trip through any store unchanged.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// One provider's position in a clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockEntry {
    pub provider_id: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ClockEntry {
    pub fn new(provider_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            provider_id: provider_id.into(),
            timestamp,
        }
    }

    /// An entry at the minimum instant.
    pub fn empty(provider_id: impl Into<String>) -> Self {
        Self::new(provider_id, min_instant())
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp == min_instant()
    }

    /// Orders two entries of the same provider.
    ///
    /// Entries of different providers have no defined order; comparing them
    /// is a programming error and is reported as [`ClockError::ProviderMismatch`].
    pub fn compare(&self, other: &ClockEntry) -> Result<Ordering, ClockError> {
        if self.provider_id != other.provider_id {
            return Err(ClockError::ProviderMismatch {
                left: self.provider_id.clone(),
                right: other.provider_id.clone(),
            });
        }
        Ok(self.timestamp.cmp(&other.timestamp))
    }

    /// Returns true if `self` is strictly later than `other`.
    pub fn is_after(&self, other: &ClockEntry) -> Result<bool, ClockError> {
        Ok(self.compare(other)? == Ordering::Greater)
    }
}

/// Per-provider logical clock.
///
/// Keys are unique and keep their insertion order. Two clocks are equal when
/// every provider known to either side has the same timestamp on both, with
/// unknown providers counting as [`min_instant`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<ClockEntry>", into = "Vec<ClockEntry>")]
pub struct CausalClock {
    entries: IndexMap<String, DateTime<Utc>>,
}

impl CausalClock {
    /// Builds a clock from explicit entries, rejecting duplicate providers.
    pub fn new(entries: impl IntoIterator<Item = ClockEntry>) -> Result<Self, ClockError> {
        let mut clock = Self::default();
        for entry in entries {
            if clock.entries.contains_key(&entry.provider_id) {
                return Err(ClockError::DuplicateProvider(entry.provider_id));
            }
            clock.entries.insert(entry.provider_id, entry.timestamp);
        }
        Ok(clock)
    }

    /// A clock that has seen nothing from anybody.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the entry for `provider_id`, or an empty entry if the provider
    /// is unknown. Never mutates the clock.
    pub fn get(&self, provider_id: &str) -> ClockEntry {
        ClockEntry::new(provider_id, self.timestamp(provider_id))
    }

    /// Timestamp recorded for `provider_id` ([`min_instant`] if unknown).
    pub fn timestamp(&self, provider_id: &str) -> DateTime<Utc> {
        self.entries
            .get(provider_id)
            .copied()
            .unwrap_or_else(min_instant)
    }

    /// Advances `provider_id` to `timestamp` if it is strictly later than the
    /// recorded value. Returns whether the clock changed.
    pub fn update(&mut self, provider_id: &str, timestamp: DateTime<Utc>) -> bool {
        if timestamp <= self.timestamp(provider_id) {
            return false;
        }
        self.entries.insert(provider_id.to_string(), timestamp);
        true
    }

    /// Consuming variant of [`update`](Self::update), handy for building clocks.
    pub fn with(mut self, provider_id: &str, timestamp: DateTime<Utc>) -> Self {
        self.update(provider_id, timestamp);
        self
    }

    /// Iterates the recorded entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = ClockEntry> + '_ {
        self.entries
            .iter()
            .map(|(provider_id, timestamp)| ClockEntry::new(provider_id.clone(), *timestamp))
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|t| *t == min_instant())
    }
}

impl PartialEq for CausalClock {
    fn eq(&self, other: &Self) -> bool {
        self.provider_ids()
            .chain(other.provider_ids())
            .all(|provider_id| self.timestamp(provider_id) == other.timestamp(provider_id))
    }
}

impl Eq for CausalClock {}

impl TryFrom<Vec<ClockEntry>> for CausalClock {
    type Error = ClockError;

    fn try_from(entries: Vec<ClockEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<CausalClock> for Vec<ClockEntry> {
    fn from(clock: CausalClock) -> Self {
        clock.entries().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_missing_provider_reads_min_without_mutating() {
        let clock = CausalClock::empty();
        let entry = clock.get("a");
        assert!(entry.is_empty());
        assert_eq!(entry.provider_id, "a");
        assert_eq!(clock.len(), 0);
    }

    #[test]
    fn test_update_is_monotonic() {
        let mut clock = CausalClock::empty();
        assert!(clock.update("a", t(10)));
        assert!(!clock.update("a", t(5)));
        assert!(!clock.update("a", t(10)));
        assert_eq!(clock.timestamp("a"), t(10));
        assert!(clock.update("a", t(11)));
        assert_eq!(clock.timestamp("a"), t(11));
    }

    #[test]
    fn test_update_with_min_instant_is_noop() {
        let mut clock = CausalClock::empty();
        assert!(!clock.update("a", min_instant()));
        assert_eq!(clock.len(), 0);
    }

    #[test]
    fn test_equality_treats_unknown_as_min() {
        let left = CausalClock::empty().with("a", t(1));
        let right = CausalClock::new([ClockEntry::new("a", t(1)), ClockEntry::empty("b")]).unwrap();
        assert_eq!(left, right);

        let other = right.clone().with("b", t(2));
        assert_ne!(left, other);
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let result = CausalClock::new([ClockEntry::new("a", t(1)), ClockEntry::new("a", t(2))]);
        assert_eq!(result, Err(ClockError::DuplicateProvider("a".to_string())));
    }

    #[test]
    fn test_compare_same_provider() {
        let early = ClockEntry::new("a", t(1));
        let late = ClockEntry::new("a", t(2));
        assert_eq!(early.compare(&late).unwrap(), Ordering::Less);
        assert!(late.is_after(&early).unwrap());
        assert!(!early.is_after(&early.clone()).unwrap());
    }

    #[test]
    fn test_compare_across_providers_fails() {
        let a = ClockEntry::new("a", t(1));
        let b = ClockEntry::new("b", t(1));
        assert!(matches!(
            a.compare(&b),
            Err(ClockError::ProviderMismatch { .. })
        ));
    }

    #[test]
    fn test_json_keeps_insertion_order() {
        let clock = CausalClock::empty()
            .with("zeta", t(1))
            .with("alpha", t(2) + Duration::microseconds(7));
        let json = serde_json::to_string(&clock).unwrap();
        let parsed: CausalClock = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, clock);
        let ids: Vec<&str> = parsed.provider_ids().collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_now_utc_has_microsecond_precision() {
        let now = now_utc();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
