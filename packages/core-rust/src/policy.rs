//! Retry backoff policy.
//!
//! Maps a retry count to the time the next attempt is due. Waits come from a
//! lookup table with a ceiling for counts past its end, and every computed
//! instant is shifted by an independent uniform jitter so that batches that
//! failed together do not all come back at the same second.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Attempts after which a report is put into the terminal `send_error` state.
pub const MAX_RETRY_COUNT: u32 = 4;

/// Wait used for retry counts the table does not list, in minutes.
pub const MAX_DURATION_MINUTES: i64 = 120;

/// Jitter bound, in seconds, applied on both sides of the wait.
pub const JITTER_SECONDS: i64 = 30;

/// Immutable backoff configuration.
///
/// Injected into the dispatcher rather than read from process-wide state so
/// tests can substitute their own tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    table: BTreeMap<u32, TimeDelta>,
    fallback: TimeDelta,
    jitter: TimeDelta,
    max_retry_count: u32,
}

impl Default for RetryPolicy {
    /// `1:1min, 2:5min, 3:30min, 4:60min, 5:120min`, 120 minute ceiling,
    /// ±30 s jitter, 4 attempts.
    fn default() -> Self {
        let table = [(1, 1), (2, 5), (3, 30), (4, 60), (5, 120)]
            .into_iter()
            .map(|(count, minutes)| (count, TimeDelta::minutes(minutes)))
            .collect();
        Self {
            table,
            fallback: TimeDelta::minutes(MAX_DURATION_MINUTES),
            jitter: TimeDelta::seconds(JITTER_SECONDS),
            max_retry_count: MAX_RETRY_COUNT,
        }
    }
}

impl RetryPolicy {
    /// Build a policy from an explicit table. Counts missing from the table
    /// wait `fallback`.
    pub fn new(table: impl IntoIterator<Item = (u32, TimeDelta)>, fallback: TimeDelta) -> Self {
        Self {
            table: table.into_iter().collect(),
            fallback,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: TimeDelta) -> Self {
        self.jitter = jitter.abs();
        self
    }

    #[must_use]
    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    #[must_use]
    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    #[must_use]
    pub fn jitter(&self) -> TimeDelta {
        self.jitter
    }

    /// Un-jittered wait before attempt `retry_count + 1`.
    #[must_use]
    pub fn wait_time(&self, retry_count: u32) -> TimeDelta {
        self.table
            .get(&retry_count)
            .copied()
            .unwrap_or(self.fallback)
    }

    /// True once `retry_count` has reached the terminal ceiling.
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retry_count
    }

    /// Uniform offset in `[-jitter, +jitter]`, whole seconds.
    pub fn jitter_offset<R: Rng + ?Sized>(&self, rng: &mut R) -> TimeDelta {
        let bound = self.jitter.num_seconds();
        if bound == 0 {
            return TimeDelta::zero();
        }
        TimeDelta::seconds(rng.random_range(-bound..=bound))
    }

    /// Instant the next attempt is due, using the supplied randomness.
    pub fn retry_at_with<R: Rng + ?Sized>(
        &self,
        retry_count: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        now + self.wait_time(retry_count) + self.jitter_offset(rng)
    }

    /// Instant the next attempt is due, measured from `now`.
    #[must_use]
    pub fn retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        self.retry_at_with(retry_count, now, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn default_table_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait_time(1), TimeDelta::minutes(1));
        assert_eq!(policy.wait_time(2), TimeDelta::minutes(5));
        assert_eq!(policy.wait_time(3), TimeDelta::minutes(30));
        assert_eq!(policy.wait_time(4), TimeDelta::minutes(60));
        assert_eq!(policy.wait_time(5), TimeDelta::minutes(120));
    }

    #[test]
    fn counts_past_the_table_hit_the_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait_time(6), TimeDelta::minutes(120));
        assert_eq!(policy.wait_time(50), policy.wait_time(5));
        // Zero is not in the table either.
        assert_eq!(policy.wait_time(0), TimeDelta::minutes(120));
    }

    #[test]
    fn waits_grow_through_the_table() {
        let policy = RetryPolicy::default();
        assert!(policy.wait_time(2) > policy.wait_time(1));
        assert!(policy.wait_time(3) > policy.wait_time(2));
        assert!(policy.wait_time(4) > policy.wait_time(3));
    }

    #[test]
    fn exhaustion_at_four() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
    }

    #[test]
    fn substitute_table_and_ceiling() {
        let policy = RetryPolicy::new([(1, TimeDelta::seconds(1))], TimeDelta::seconds(2))
            .with_jitter(TimeDelta::zero())
            .with_max_retry_count(2);
        let now = Utc::now();
        assert_eq!(policy.retry_at(1, now), now + TimeDelta::seconds(1));
        assert_eq!(policy.retry_at(7, now), now + TimeDelta::seconds(2));
        assert!(policy.is_exhausted(2));
    }

    #[test]
    fn seeded_jitter_is_deterministic() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let a = policy.retry_at_with(1, now, &mut StdRng::seed_from_u64(7));
        let b = policy.retry_at_with(1, now, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn retry_time_stays_within_jitter(count in 0u32..20, seed in any::<u64>()) {
            let policy = RetryPolicy::default();
            let now = Utc::now();
            let at = policy.retry_at_with(count, now, &mut StdRng::seed_from_u64(seed));
            let offset = at - (now + policy.wait_time(count));
            prop_assert!(offset >= TimeDelta::seconds(-30));
            prop_assert!(offset <= TimeDelta::seconds(30));
        }
    }
}
