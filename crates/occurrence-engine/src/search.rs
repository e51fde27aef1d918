//! Search orchestrators: walk every item of every store, dispatch each rule
//! to its handler and merge the alarm side table into the result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::{Alarm, ItemRef, StoreId};
use crate::range::OccurrencesRange;
use crate::registry::RuleRegistry;
use crate::store::RuleStore;
use crate::utc_offset::UtcOffset;

/// Cooperative cancellation flag shared between a search and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.is_stopped() {
            return Err(EngineError::SearchStopped);
        }
        Ok(())
    }
}

/// Collects every occurrence touching `[mint, maxt]` in a set of stores.
pub struct OccurrencesRangeSearch<'a> {
    mint: i64,
    maxt: i64,
    stores: Vec<Arc<dyn RuleStore>>,
    registry: &'a RuleRegistry,
    utc_offset: UtcOffset,
    stop: StopHandle,
}

impl<'a> OccurrencesRangeSearch<'a> {
    pub fn new(
        mint: i64,
        maxt: i64,
        stores: Vec<Arc<dyn RuleStore>>,
        registry: &'a RuleRegistry,
        utc_offset: UtcOffset,
    ) -> Self {
        Self {
            mint,
            maxt,
            stores,
            registry,
            utc_offset,
            stop: StopHandle::new(),
        }
    }

    /// Share an existing stop flag instead of a private one.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the search.
    ///
    /// # Errors
    ///
    /// [`EngineError::SearchStopped`] once the stop handle has been
    /// triggered; otherwise the first store or rule error met.
    pub fn start(self) -> Result<OccurrencesRange, EngineError> {
        let mut occs = OccurrencesRange::new(self.mint, self.maxt);
        for store in &self.stores {
            self.search_store(store.as_ref(), &mut occs)?;
        }
        debug!(
            mint = self.mint,
            maxt = self.maxt,
            stores = self.stores.len(),
            found = occs.len(),
            "range search done"
        );
        Ok(occs)
    }

    fn search_store(
        &self,
        store: &dyn RuleStore,
        occs: &mut OccurrencesRange,
    ) -> Result<(), EngineError> {
        let id = store.store_id();
        for item in store.items_with_rules()? {
            for rule in store.get_item_rules(item)? {
                self.stop.check()?;
                self.registry.handler(&rule.kind)?.get_occurrences_range(
                    self.mint,
                    self.maxt,
                    &self.utc_offset,
                    ItemRef::new(id, item),
                    &rule,
                    occs,
                )?;
            }
        }
        for row in store.alarm_rows()? {
            let (occ, orig_alarm) = row.to_occurrence(id);
            if occ.alarm == Alarm::Active {
                occs.move_active(occ, orig_alarm);
            } else {
                occs.update(occ, orig_alarm);
            }
        }
        Ok(())
    }
}

/// Finds the soonest time point after each store's base time.
pub struct NextOccurrencesSearch<'a> {
    stores: Vec<Arc<dyn RuleStore>>,
    registry: &'a RuleRegistry,
    utc_offset: UtcOffset,
    base_time: i64,
    base_times: BTreeMap<StoreId, i64>,
    max_researches: u32,
    stop: StopHandle,
}

impl<'a> NextOccurrencesSearch<'a> {
    /// Search every store from `base_time`.
    pub fn new(
        base_time: i64,
        stores: Vec<Arc<dyn RuleStore>>,
        registry: &'a RuleRegistry,
        utc_offset: UtcOffset,
    ) -> Self {
        Self {
            stores,
            registry,
            utc_offset,
            base_time,
            base_times: BTreeMap::new(),
            max_researches: 256,
            stop: StopHandle::new(),
        }
    }

    /// Give some stores their own base time (e.g. their last-search
    /// watermark); the others keep the common one.
    pub fn with_base_times(mut self, base_times: BTreeMap<StoreId, i64>) -> Self {
        self.base_times = base_times;
        self
    }

    pub fn with_max_researches(mut self, max_researches: u32) -> Self {
        self.max_researches = max_researches;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the search.
    ///
    /// When exceptions empty the best-time bucket, the time they emptied is
    /// not a real next occurrence: every store's base is raised to it and
    /// the search starts over, at most `max_researches` times.
    pub fn start(self) -> Result<NextOccurrences, EngineError> {
        let mut bases: Vec<i64> = self
            .stores
            .iter()
            .map(|s| {
                self.base_times
                    .get(s.store_id())
                    .copied()
                    .unwrap_or(self.base_time)
            })
            .collect();

        for attempt in 0..=self.max_researches {
            let mut occs = NextOccurrences::new();
            for (store, base) in self.stores.iter().zip(&bases) {
                self.search_store(store.as_ref(), *base, &mut occs)?;
            }
            let next = occs.get_next_occurrence_time();
            match next {
                Some(lost) if occs.is_empty() => {
                    debug!(lost, attempt, "exceptions emptied next occurrences, searching again");
                    for base in bases.iter_mut() {
                        *base = (*base).max(lost);
                    }
                }
                _ => {
                    debug!(
                        next = ?next,
                        stores = self.stores.len(),
                        found = occs.get_list().len(),
                        "next search done"
                    );
                    return Ok(occs);
                }
            }
        }
        warn!(
            max_researches = self.max_researches,
            "giving up on next occurrences after repeated exceptions"
        );
        Ok(NextOccurrences::new())
    }

    fn search_store(
        &self,
        store: &dyn RuleStore,
        base_time: i64,
        occs: &mut NextOccurrences,
    ) -> Result<(), EngineError> {
        let id = store.store_id();
        for item in store.items_with_rules()? {
            for rule in store.get_item_rules(item)? {
                self.stop.check()?;
                self.registry.handler(&rule.kind)?.get_next_item_occurrences(
                    base_time,
                    &self.utc_offset,
                    ItemRef::new(id, item),
                    &rule,
                    occs,
                )?;
            }
        }
        // A snoozed alarm rings again at its snooze time instead of the time
        // its occurrence was generated with. Ringing alarms are already out.
        for row in store.alarm_rows()? {
            if row.snooze.is_none() {
                continue;
            }
            let (occ, orig_alarm) = row.to_occurrence(id);
            occs.try_delete_one(id, row.item, row.start, row.end, orig_alarm);
            occs.add_safe(base_time, occ);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::AlarmRow;
    use crate::rule::TimeStandard;
    use crate::rules::{daily, except, once, RelativeTiming, TimeOfDay};
    use crate::store::MemoryStore;
    use serde_json::Value;

    // 2026-01-05 00:00:00 UTC
    const DAY0: i64 = 1_767_571_200;
    const HOUR: i64 = 3600;
    const DAY: i64 = 86400;

    fn daily_rule() -> crate::rule::Rule {
        daily::make_every_day_rule(
            TimeOfDay::new(9, 0).unwrap(),
            RelativeTiming::new(Some(HOUR), Some(900)).unwrap(),
            TimeStandard::Utc,
            Value::Null,
        )
        .unwrap()
    }

    fn store_with(id: &str, rules: &[(i64, Vec<crate::rule::Rule>)]) -> Arc<MemoryStore> {
        let store = MemoryStore::new(id, 0);
        for (item, list) in rules {
            store.update_item_rules(*item, list).unwrap();
        }
        Arc::new(store)
    }

    fn utc() -> UtcOffset {
        UtcOffset::fixed(0)
    }

    // ── range ───────────────────────────────────────────────────────────

    #[test]
    fn test_range_across_stores() {
        let registry = RuleRegistry::with_basic_rules();
        let a = store_with("a", &[(1, vec![daily_rule()])]);
        let b = store_with("b", &[(2, vec![daily_rule()])]);
        let occs = OccurrencesRangeSearch::new(
            DAY0,
            DAY0 + 2 * DAY - 1,
            vec![a, b],
            &registry,
            utc(),
        )
        .start()
        .unwrap();
        assert_eq!(occs.len(), 4);
        assert_eq!(occs.get_dict().len(), 2);
    }

    #[test]
    fn test_range_exception_only_affects_preceding_rules() {
        let registry = RuleRegistry::with_basic_rules();
        let exception = except::make_once_rule(
            DAY0 + DAY + 9 * HOUR,
            DAY0 + DAY + 9 * HOUR + 1,
            false,
            TimeStandard::Utc,
            Value::Null,
        )
        .unwrap();
        let store = store_with("a", &[(1, vec![exception, daily_rule()])]);
        let occs =
            OccurrencesRangeSearch::new(DAY0, DAY0 + 3 * DAY - 1, vec![store], &registry, utc())
                .start()
                .unwrap();
        assert_eq!(occs.len(), 3);
    }

    #[test]
    fn test_range_merges_alarm_rows() {
        let registry = RuleRegistry::with_basic_rules();
        let store = store_with("a", &[(1, vec![daily_rule()])]);
        let start = DAY0 + 9 * HOUR;
        store.insert_alarm(AlarmRow {
            id: 1,
            item: 1,
            start,
            end: Some(start + HOUR),
            alarm: Some(start - 900),
            snooze: None,
        });
        let occs = OccurrencesRangeSearch::new(DAY0, DAY0 + DAY - 1, vec![store], &registry, utc())
            .start()
            .unwrap();
        assert!(occs.get_dict().is_empty());
        assert_eq!(occs.get_active_list().len(), 1);
        assert_eq!(occs.get_active_list()[0].alarm, Alarm::Active);
    }

    #[test]
    fn test_range_unknown_kind_fails() {
        let registry = RuleRegistry::new();
        let store = store_with("a", &[(1, vec![daily_rule()])]);
        let err = OccurrencesRangeSearch::new(DAY0, DAY0 + DAY, vec![store], &registry, utc())
            .start()
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRule(_)));
    }

    #[test]
    fn test_stopped_search_fails() {
        let registry = RuleRegistry::with_basic_rules();
        let store = store_with("a", &[(1, vec![daily_rule()])]);
        let search = OccurrencesRangeSearch::new(DAY0, DAY0 + DAY, vec![store], &registry, utc());
        search.stop_handle().stop();
        assert!(matches!(search.start(), Err(EngineError::SearchStopped)));
    }

    // ── next ────────────────────────────────────────────────────────────

    #[test]
    fn test_next_per_store_base_times() {
        let registry = RuleRegistry::with_basic_rules();
        let a = store_with("a", &[(1, vec![daily_rule()])]);
        let b = store_with("b", &[(1, vec![daily_rule()])]);
        // "a" has already handed out everything up to the first alarm
        let bases = BTreeMap::from([("a".to_string(), DAY0 + 9 * HOUR - 900)]);
        let occs = NextOccurrencesSearch::new(DAY0, vec![a, b], &registry, utc())
            .with_base_times(bases)
            .start()
            .unwrap();
        assert_eq!(occs.get_next_occurrence_time(), Some(DAY0 + 9 * HOUR - 900));
        let list = occs.get_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].store, "b");
    }

    #[test]
    fn test_next_searches_again_past_excepted_time() {
        let registry = RuleRegistry::with_basic_rules();
        let first = DAY0 + 9 * HOUR;
        let exception =
            except::make_once_rule(first, first + 1, false, TimeStandard::Utc, Value::Null).unwrap();
        let store = store_with("a", &[(1, vec![daily_rule(), exception])]);
        let occs = NextOccurrencesSearch::new(DAY0, vec![store], &registry, utc())
            .start()
            .unwrap();
        assert_eq!(occs.get_next_occurrence_time(), Some(first + DAY - 900));
    }

    #[test]
    fn test_next_research_cap() {
        let registry = RuleRegistry::with_basic_rules();
        let first = DAY0 + 9 * HOUR;
        let exception =
            except::make_once_rule(first, first + 1, false, TimeStandard::Utc, Value::Null).unwrap();
        let store = store_with("a", &[(1, vec![daily_rule(), exception])]);
        let occs = NextOccurrencesSearch::new(DAY0, vec![store], &registry, utc())
            .with_max_researches(0)
            .start()
            .unwrap();
        assert_eq!(occs.get_next_occurrence_time(), None);
    }

    #[test]
    fn test_next_snoozed_alarm_replaces_generated_one() {
        let registry = RuleRegistry::with_basic_rules();
        let start = DAY0 + DAY;
        let rule = once::make_rule(start, None, Some(start - HOUR), TimeStandard::Utc, Value::Null)
            .unwrap();
        let store = store_with("a", &[(1, vec![rule])]);
        store.insert_alarm(AlarmRow {
            id: 1,
            item: 1,
            start,
            end: None,
            alarm: Some(start - HOUR),
            snooze: Some(start - 600),
        });
        let occs = NextOccurrencesSearch::new(DAY0, vec![store], &registry, utc())
            .start()
            .unwrap();
        assert_eq!(occs.get_next_occurrence_time(), Some(start - 600));
        assert_eq!(occs.get_list().len(), 1);
    }
}
