//! # Incremental Key Scanner
//!
//! Lists every key matching the configured pattern and returns only the ones
//! it has never returned before.
//!
//! ## Key Design Principles
//! 1. **Never twice**: a key handed out is remembered. Memory stays bounded by
//!    forgetting, per instrument, keys whose timestamp token is more than the
//!    horizon behind that instrument's newest token. The cut-off becomes the
//!    instrument's watermark: an unseen key below it is reported as late and
//!    dropped rather than handed out, since the scanner can no longer prove
//!    it was not already returned.
//! 2. **Instruments are independent**: each instrument has its own watermark,
//!    and a token further ahead of the clock than the horizon never anchors
//!    one, so a stray key cannot starve real data.
//! 3. **Prune on commit**: [`KeyScanner::observe`] only records what was
//!    listed. Watermarks move in [`KeyScanner::commit`], called once a cycle
//!    has fetched everything, so keys released after a failed fetch are
//!    still above the watermark on the retry.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::connections::{bounded, RecordStore};
use crate::core::{Clock, SystemClock};
use crate::error::StoreError;
use crate::model::parse_timestamp_str;
use crate::parsers::KeyLayout;

/// Result of diffing one listing against the seen-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Unseen keys, ascending by timestamp token then key.
    pub new_keys: Vec<String>,
    /// Keys dropped for the first time because their token is below their
    /// instrument's watermark.
    pub late: usize,
}

/// Tracked keys and watermark of one instrument.
#[derive(Debug, Default)]
struct Lane {
    by_token: BTreeSet<(DateTime<Utc>, String)>,
    watermark: Option<DateTime<Utc>>,
}

impl Lane {
    /// Raises the watermark to `anchor - horizon` and forgets keys below it.
    /// The anchor is the newest token not later than `limit`.
    fn prune(&mut self, horizon: TimeDelta, limit: Option<DateTime<Utc>>) -> Vec<String> {
        let anchor = self
            .by_token
            .iter()
            .rev()
            .map(|(ts, _)| *ts)
            .find(|ts| limit.map_or(true, |limit| *ts <= limit));
        let Some(cutoff) = anchor.and_then(|ts| ts.checked_sub_signed(horizon)) else {
            return Vec::new();
        };
        if self.watermark.is_some_and(|mark| mark >= cutoff) {
            return Vec::new();
        }

        let mut pruned = Vec::new();
        while self.by_token.first().is_some_and(|(ts, _)| *ts < cutoff) {
            if let Some((_, key)) = self.by_token.pop_first() {
                pruned.push(key);
            }
        }
        self.watermark = Some(cutoff);
        pruned
    }
}

#[derive(Debug)]
pub struct KeyScanner {
    pattern: String,
    layout: KeyLayout,
    horizon: Option<TimeDelta>,
    clock: Arc<dyn Clock>,
    seen: HashMap<String, Option<DateTime<Utc>>>,
    lanes: HashMap<String, Lane>,
    // listed keys below a watermark that were already pruned or counted late
    retired: HashSet<String>,
}

impl KeyScanner {
    /// A scanner for `pattern`. With `horizon` set, keys whose token is
    /// older than their instrument's `newest - horizon` are pruned from the
    /// seen-set on [`commit`](Self::commit).
    pub fn new(pattern: impl Into<String>, layout: KeyLayout, horizon: Option<TimeDelta>) -> Self {
        Self {
            pattern: pattern.into(),
            layout,
            horizon,
            clock: Arc::new(SystemClock),
            seen: HashMap::new(),
            lanes: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Uses `clock` to ignore tokens too far in the future when pruning.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Number of keys currently remembered.
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Tokens of `instrument` below this instant are no longer tracked.
    pub fn watermark(&self, instrument: &str) -> Option<DateTime<Utc>> {
        self.lanes.get(instrument).and_then(|lane| lane.watermark)
    }

    /// Lists the store and diffs the result against the seen-set.
    pub async fn poll(&mut self, store: &dyn RecordStore, timeout: Duration) -> Result<ScanOutcome, StoreError> {
        let listed = bounded(timeout, store.list_keys(&self.pattern)).await?;
        Ok(self.observe(listed))
    }

    /// Diffs a key listing against the seen-set and remembers the new keys.
    pub fn observe<I>(&mut self, listed: I) -> ScanOutcome
    where
        I: IntoIterator<Item = String>,
    {
        let mut outcome = ScanOutcome::default();
        let mut fresh: Vec<(Option<DateTime<Utc>>, String)> = Vec::new();
        let mut retired = HashSet::new();

        for key in listed {
            if self.seen.contains_key(&key) {
                continue;
            }
            let tracked = self.tracked(&key);
            if let Some((instrument, ts)) = &tracked {
                if self.watermark(instrument).is_some_and(|mark| *ts < mark) {
                    if !self.retired.contains(&key) {
                        outcome.late += 1;
                    }
                    retired.insert(key);
                    continue;
                }
            }

            let token = tracked.map(|(instrument, ts)| {
                self.lanes
                    .entry(instrument)
                    .or_default()
                    .by_token
                    .insert((ts, key.clone()));
                ts
            });
            self.seen.insert(key.clone(), token);
            fresh.push((token, key));
        }
        self.retired = retired;

        fresh.sort_unstable();
        outcome.new_keys = fresh.into_iter().map(|(_, key)| key).collect();

        if !outcome.new_keys.is_empty() || outcome.late > 0 {
            debug!(
                new = outcome.new_keys.len(),
                late = outcome.late,
                seen = self.seen.len(),
                "Scanned keys"
            );
        }
        outcome
    }

    /// Moves every instrument's watermark up to its newest token minus the
    /// horizon and forgets the keys below it. Returns how many were pruned.
    pub fn commit(&mut self) -> usize {
        let Some(horizon) = self.horizon else {
            return 0;
        };
        let limit = self.clock.now().checked_add_signed(horizon);

        let mut pruned = 0;
        for lane in self.lanes.values_mut() {
            for key in lane.prune(horizon, limit) {
                self.seen.remove(&key);
                self.retired.insert(key);
                pruned += 1;
            }
        }
        pruned
    }

    /// Forgets keys so the next listing returns them again.
    pub fn release(&mut self, keys: &[String]) {
        for key in keys {
            self.forget(key);
        }
    }

    /// Forgets every remembered key of one instrument, and its watermark, so
    /// every key of it still in the store is returned again. Returns how many
    /// keys were forgotten.
    pub fn forget_instrument(&mut self, instrument: &str) -> usize {
        let keys: Vec<String> = self
            .seen
            .keys()
            .filter(|key| self.layout.instrument_of(key) == Some(instrument))
            .cloned()
            .collect();
        for key in &keys {
            self.seen.remove(key);
        }
        self.lanes.remove(instrument);
        self.retired.retain(|key| self.layout.instrument_of(key) != Some(instrument));
        keys.len()
    }

    fn forget(&mut self, key: &str) {
        if let Some(Some(ts)) = self.seen.remove(key) {
            if let Some(lane) = self.layout.instrument_of(key).and_then(|id| self.lanes.get_mut(id)) {
                lane.by_token.remove(&(ts, key.to_string()));
            }
        }
    }

    /// Instrument and token instant of a key whose token is a timestamp.
    fn tracked(&self, key: &str) -> Option<(String, DateTime<Utc>)> {
        let parts = self.layout.split(key).ok()?;
        let ts = parse_timestamp_str(parts.token)?;
        Some((parts.instrument.to_string(), ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::core::ManualClock;
    use proptest::prelude::*;

    fn scanner(horizon: Option<TimeDelta>) -> KeyScanner {
        let layout = KeyLayout::from_pattern("price_data:*:*").unwrap();
        KeyScanner::new("price_data:*:*", layout, horizon)
    }

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn returns_only_unseen_keys() {
        let mut scanner = scanner(None);
        let first = scanner.observe(keys(&["price_data:A:2000", "price_data:A:1000"]));
        assert_eq!(first.new_keys, keys(&["price_data:A:1000", "price_data:A:2000"]));

        let second = scanner.observe(keys(&["price_data:A:1000", "price_data:A:2000", "price_data:B:1500"]));
        assert_eq!(second.new_keys, keys(&["price_data:B:1500"]));

        assert!(scanner.observe(keys(&["price_data:A:1000"])).new_keys.is_empty());
    }

    #[test]
    fn new_keys_are_ordered_by_token() {
        let mut scanner = scanner(None);
        let outcome = scanner.observe(keys(&[
            "price_data:B:3000",
            "price_data:A:10000",
            "price_data:A:2000",
        ]));
        assert_eq!(
            outcome.new_keys,
            keys(&["price_data:A:2000", "price_data:B:3000", "price_data:A:10000"])
        );
    }

    #[test]
    fn horizon_prunes_old_keys_and_drops_late_ones() {
        let mut scanner = scanner(Some(TimeDelta::seconds(10)));
        scanner.observe(keys(&["price_data:A:1000", "price_data:A:5000"]));
        scanner.commit();
        assert_eq!(scanner.seen_len(), 2);

        scanner.observe(keys(&["price_data:A:20000"]));
        // nothing moves until the cycle commits
        assert_eq!(scanner.seen_len(), 3);
        assert_eq!(scanner.commit(), 2);
        assert_eq!(scanner.seen_len(), 1);
        assert_eq!(scanner.watermark("A"), DateTime::from_timestamp_millis(10_000));

        let listing = keys(&[
            "price_data:A:1000",
            "price_data:A:3000",
            "price_data:A:5000",
            "price_data:A:12000",
        ]);
        let outcome = scanner.observe(listing.clone());
        assert_eq!(outcome.new_keys, keys(&["price_data:A:12000"]));
        // 1000 and 5000 were handed out before; only 3000 is new and late
        assert_eq!(outcome.late, 1);

        assert_eq!(scanner.observe(listing).late, 0);
    }

    #[test]
    fn watermarks_are_per_instrument() {
        let mut scanner = scanner(Some(TimeDelta::seconds(10)));
        scanner.observe(keys(&["price_data:A:1000", "price_data:B:1000000"]));
        scanner.commit();
        assert_eq!(scanner.watermark("A"), DateTime::from_timestamp_millis(-9_000));

        let outcome = scanner.observe(keys(&["price_data:A:2000"]));
        assert_eq!(outcome.new_keys, keys(&["price_data:A:2000"]));
        assert_eq!(outcome.late, 0);
    }

    #[test]
    fn tokens_far_ahead_of_the_clock_do_not_move_the_watermark() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let layout = KeyLayout::from_pattern("price_data:*:*").unwrap();
        let mut scanner = KeyScanner::new("price_data:*:*", layout, Some(TimeDelta::seconds(60)))
            .with_clock(Arc::new(ManualClock::new(now)));

        scanner.observe(keys(&["price_data:A:99999999999999", "price_data:A:1700000000000"]));
        scanner.commit();
        assert_eq!(scanner.watermark("A"), DateTime::from_timestamp_millis(1_700_000_000_000 - 60_000));

        let outcome = scanner.observe(keys(&["price_data:A:1700000001000", "price_data:A:1699999990000"]));
        assert_eq!(outcome.new_keys.len(), 2);
        assert_eq!(outcome.late, 0);
    }

    #[test]
    fn released_keys_stay_above_the_watermark() {
        let mut scanner = scanner(Some(TimeDelta::seconds(10)));
        let listing = keys(&["price_data:A:1000", "price_data:A:20000"]);
        assert_eq!(scanner.observe(listing.clone()).new_keys.len(), 2);

        // fetch failed: no commit
        scanner.release(&listing);
        let retry = scanner.observe(listing);
        assert_eq!(retry.new_keys, keys(&["price_data:A:1000", "price_data:A:20000"]));
        assert_eq!(retry.late, 0);
    }

    #[test]
    fn keys_without_a_time_token_are_kept() {
        let mut scanner = scanner(Some(TimeDelta::seconds(1)));
        scanner.observe(keys(&["price_data:A:abc", "price_data:A:1000"]));
        scanner.observe(keys(&["price_data:A:99000"]));
        scanner.commit();
        assert_eq!(scanner.seen_len(), 2);
        assert!(scanner.observe(keys(&["price_data:A:abc"])).new_keys.is_empty());
    }

    #[test]
    fn released_keys_come_back() {
        let mut scanner = scanner(None);
        scanner.observe(keys(&["price_data:A:1000", "price_data:A:2000"]));
        scanner.release(&keys(&["price_data:A:2000"]));
        let outcome = scanner.observe(keys(&["price_data:A:1000", "price_data:A:2000"]));
        assert_eq!(outcome.new_keys, keys(&["price_data:A:2000"]));
    }

    #[test]
    fn forgetting_an_instrument_rescans_only_that_instrument() {
        let mut scanner = scanner(None);
        let all = keys(&["price_data:A:1000", "price_data:A:2000", "price_data:B:1000"]);
        scanner.observe(all.clone());

        assert_eq!(scanner.forget_instrument("A"), 2);
        let outcome = scanner.observe(all);
        assert_eq!(outcome.new_keys, keys(&["price_data:A:1000", "price_data:A:2000"]));
    }

    #[test]
    fn forgetting_an_instrument_drops_its_watermark() {
        let mut scanner = scanner(Some(TimeDelta::seconds(10)));
        let all = keys(&["price_data:A:1000", "price_data:A:20000"]);
        scanner.observe(all.clone());
        scanner.commit();
        assert!(scanner.watermark("A").is_some());

        scanner.forget_instrument("A");
        assert_eq!(scanner.watermark("A"), None);
        assert_eq!(scanner.observe(all).new_keys.len(), 2);
    }

    #[tokio::test]
    async fn poll_reads_from_the_store() {
        let store = MemoryStore::new();
        store.insert("price_data:EUR_USD:1000", "{}");
        store.insert("other:EUR_USD:1000", "{}");
        let mut scanner = scanner(None);

        let outcome = scanner.poll(&store, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.new_keys, keys(&["price_data:EUR_USD:1000"]));

        store.set_offline(true);
        assert!(scanner.poll(&store, Duration::from_secs(1)).await.is_err());
    }

    proptest! {
        #[test]
        fn union_of_polls_is_every_key_exactly_once(
            tokens in proptest::collection::btree_set(0u32..100_000, 0..200),
            cuts in proptest::collection::vec(0usize..200, 0..8),
        ) {
            let all: Vec<String> = tokens.iter().map(|t| format!("price_data:X:{}", t)).collect();
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(all.len())).collect();
            cuts.push(all.len());
            cuts.sort_unstable();

            let mut scanner = scanner(None);
            let mut returned = Vec::new();
            for cut in cuts {
                // the store only grows between polls
                returned.extend(scanner.observe(all[..cut].to_vec()).new_keys);
            }

            let mut expected = all.clone();
            expected.sort_unstable();
            returned.sort_unstable();
            prop_assert_eq!(returned, expected);
        }

        #[test]
        fn pruning_never_returns_a_key_twice(
            tokens in proptest::collection::vec(0u32..60_000, 1..200),
            horizon_secs in 1i64..30,
        ) {
            let mut scanner = scanner(Some(TimeDelta::seconds(horizon_secs)));
            let mut listed: Vec<String> = Vec::new();
            let mut returned = HashSet::new();
            for token in tokens {
                listed.push(format!("price_data:X:{}", token));
                for key in scanner.observe(listed.clone()).new_keys {
                    prop_assert!(returned.insert(key));
                }
                scanner.commit();
            }
        }

        #[test]
        fn keys_within_the_horizon_are_never_dropped(
            events in proptest::collection::vec((0usize..3, 0u32..20_000, 0u32..1_000), 1..200),
            horizon_secs in 1i64..30,
        ) {
            // instruments far apart in time, each arriving at most one
            // horizon out of order
            let offsets = [0i64, 1_000_000_000, 5_000_000];
            let mut base = offsets;
            let mut scanner = scanner(Some(TimeDelta::seconds(horizon_secs)));
            let mut listed: Vec<String> = Vec::new();
            let mut expected = BTreeSet::new();
            let mut returned = BTreeSet::new();

            for (instrument, step, jitter) in events {
                base[instrument] += i64::from(step);
                let token = (base[instrument] - i64::from(jitter)).max(offsets[instrument]);
                let key = format!("price_data:I{}:{}", instrument, token);
                expected.insert(key.clone());
                listed.push(key);

                let outcome = scanner.observe(listed.clone());
                prop_assert_eq!(outcome.late, 0);
                for key in outcome.new_keys {
                    prop_assert!(returned.insert(key));
                }
                scanner.commit();
            }
            prop_assert_eq!(returned, expected);
        }
    }
}
