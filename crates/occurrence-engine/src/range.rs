//! Accumulator for range queries.
//!
//! [`OccurrencesRange`] collects every occurrence whose start, end or alarm
//! touches `[mint, maxt]`. It is built fresh for each query and handed to the
//! caller once the search completes.

use crate::bucket::{self, OccurrenceMap};
use crate::error::EngineError;
use crate::occurrence::{Alarm, ItemId, Occurrence};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccurrencesRange {
    mint: i64,
    maxt: i64,
    d: OccurrenceMap,
    actd: OccurrenceMap,
}

impl OccurrencesRange {
    pub fn new(mint: i64, maxt: i64) -> Self {
        Self {
            mint,
            maxt,
            d: OccurrenceMap::new(),
            actd: OccurrenceMap::new(),
        }
    }

    pub fn mint(&self) -> i64 {
        self.mint
    }

    pub fn maxt(&self) -> i64 {
        self.maxt
    }

    /// Whether `occ` touches the query window.
    pub fn intersects(&self, occ: &Occurrence) -> bool {
        let (mint, maxt) = (self.mint, self.maxt);
        (mint <= occ.start && occ.start <= maxt)
            || occ.end.is_some_and(|end| occ.start <= mint && mint < end)
            || occ.alarm.time().is_some_and(|a| mint <= a && a <= maxt)
    }

    /// Validate `occ`, then [`add_safe`](Self::add_safe) it.
    pub fn add(&mut self, occ: Occurrence) -> Result<bool, EngineError> {
        occ.validate()?;
        Ok(self.add_safe(occ))
    }

    /// Insert `occ` if it touches the window. Returns whether it was inserted.
    pub fn add_safe(&mut self, occ: Occurrence) -> bool {
        self.intersects(&occ) && bucket::insert_unique(&mut self.d, occ)
    }

    /// Merge a snoozed alarm: the generated occurrence that carried
    /// `orig_alarm` takes the new alarm time in place; without such an
    /// occurrence `occ` is added like a generated one.
    ///
    /// Returns whether an existing occurrence was replaced.
    pub fn update(&mut self, occ: Occurrence, orig_alarm: Alarm) -> bool {
        let replaced = bucket::take_first(&mut self.d, &occ.store, occ.item, |o| {
            o.same_slot(&occ) && o.alarm == orig_alarm
        });
        match replaced {
            Some(_) => {
                bucket::insert_unique(&mut self.d, occ);
                true
            }
            None => {
                self.add_safe(occ);
                false
            }
        }
    }

    /// Merge a ringing alarm: the generated occurrence that carried
    /// `orig_alarm` leaves the main set, and `occ` joins the active set
    /// regardless of the window.
    ///
    /// Returns whether an existing occurrence was moved.
    pub fn move_active(&mut self, occ: Occurrence, orig_alarm: Alarm) -> bool {
        let moved = bucket::take_first(&mut self.d, &occ.store, occ.item, |o| {
            o.same_slot(&occ) && o.alarm == orig_alarm
        })
        .is_some();
        bucket::insert_unique(&mut self.actd, occ);
        moved
    }

    /// Validate the exception window, then [`except_safe`](Self::except_safe).
    pub fn except_(
        &mut self,
        store: &str,
        item: ItemId,
        start: i64,
        end: i64,
        inclusive: bool,
    ) -> Result<usize, EngineError> {
        if start == 0 || start >= end {
            return Err(EngineError::BadExceptRule(format!(
                "exception window [{}, {}] for item {} in '{}'",
                start, end, item, store
            )));
        }
        Ok(self.except_safe(store, item, start, end, inclusive))
    }

    /// Remove the item's occurrences starting in `[start, end]` (and, when
    /// `inclusive`, those in progress at `start`). Active alarms are never
    /// excepted. Returns how many were removed.
    pub fn except_safe(
        &mut self,
        store: &str,
        item: ItemId,
        start: i64,
        end: i64,
        inclusive: bool,
    ) -> usize {
        bucket::remove_where(&mut self.d, store, item, |o| {
            bucket::is_excepted(o, start, end, inclusive)
        })
    }

    pub fn get_dict(&self) -> &OccurrenceMap {
        &self.d
    }

    pub fn get_active_dict(&self) -> &OccurrenceMap {
        &self.actd
    }

    /// All occurrences, active alarms included.
    pub fn get_list(&self) -> Vec<Occurrence> {
        bucket::iter(&self.d)
            .chain(bucket::iter(&self.actd))
            .cloned()
            .collect()
    }

    /// Only the active alarms.
    pub fn get_active_list(&self) -> Vec<Occurrence> {
        bucket::iter(&self.actd).cloned().collect()
    }

    /// The earliest instant at which one of the held occurrences is over
    /// (its latest start/end/alarm has passed). Active alarms are ignored.
    pub fn get_next_completion_time(&self) -> Option<i64> {
        bucket::iter(&self.d).map(Occurrence::completion_time).min()
    }

    /// Earliest start and latest end (or start) among one item's generated
    /// occurrences. Active alarms are ignored.
    pub fn get_item_time_span(&self, store: &str, item: ItemId) -> Option<(i64, i64)> {
        bucket::item_time_span(&self.d, store, item)
    }

    pub fn len(&self) -> usize {
        bucket::iter(&self.d).count() + bucket::iter(&self.actd).count()
    }

    pub fn is_empty(&self) -> bool {
        self.d.is_empty() && self.actd.is_empty()
    }
}
