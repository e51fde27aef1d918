//! Accumulator for "what fires next" queries.
//!
//! [`NextOccurrences`] keeps only the occurrences whose first time point
//! after the base time is the soonest seen so far. Every held occurrence
//! shares that time point; a strictly earlier candidate evicts them all.

use crate::bucket::{self, OccurrenceMap};
use crate::error::EngineError;
use crate::occurrence::{Alarm, ItemId, Occurrence};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NextOccurrences {
    next: Option<i64>,
    d: OccurrenceMap,
    oldd: OccurrenceMap,
}

impl NextOccurrences {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first of `occ`'s alarm, start and end strictly after `base_time`.
    pub fn qualifying_time(base_time: i64, occ: &Occurrence) -> Option<i64> {
        occ.time_points()
            .into_iter()
            .flatten()
            .find(|t| *t > base_time)
    }

    /// Validate `occ`, then [`add_safe`](Self::add_safe) it.
    pub fn add(&mut self, base_time: i64, occ: Occurrence) -> Result<bool, EngineError> {
        occ.validate()?;
        Ok(self.add_safe(base_time, occ))
    }

    /// Offer a candidate. Returns `false` when it is later than the current
    /// best time or has nothing left after `base_time`.
    pub fn add_safe(&mut self, base_time: i64, occ: Occurrence) -> bool {
        let Some(time) = Self::qualifying_time(base_time, &occ) else {
            return false;
        };
        match self.next {
            Some(next) if time > next => false,
            Some(next) if time == next => {
                bucket::insert_unique(&mut self.d, occ);
                true
            }
            _ => {
                self.next = Some(time);
                self.d.clear();
                bucket::insert_unique(&mut self.d, occ);
                true
            }
        }
    }

    /// Hold a pre-existing occurrence (e.g. one missed while its store was
    /// closed) without comparing it to the best time.
    pub fn add_old(&mut self, occ: Occurrence) -> bool {
        bucket::insert_unique(&mut self.oldd, occ)
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

    /// Remove held occurrences under the same containment rule as
    /// [`OccurrencesRange::except_safe`](crate::range::OccurrencesRange::except_safe).
    ///
    /// The best time is left untouched even when nothing remains at it; only
    /// a new search can tell what the next time really is.
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

    /// Remove at most one held occurrence with exactly these times.
    pub fn try_delete_one(
        &mut self,
        store: &str,
        item: ItemId,
        start: i64,
        end: Option<i64>,
        alarm: Alarm,
    ) -> bool {
        bucket::take_first(&mut self.d, store, item, |o| {
            o.start == start && o.end == end && o.alarm == alarm
        })
        .is_some()
    }

    /// Earliest start and latest end (or start) among one item's held
    /// occurrences.
    pub fn get_item_time_span(&self, store: &str, item: ItemId) -> Option<(i64, i64)> {
        bucket::item_time_span(&self.d, store, item)
    }

    /// The current best time.
    pub fn get_next_occurrence_time(&self) -> Option<i64> {
        self.next
    }

    pub fn get_dict(&self) -> &OccurrenceMap {
        &self.d
    }

    pub fn get_list(&self) -> Vec<Occurrence> {
        bucket::iter(&self.d).cloned().collect()
    }

    pub fn get_old_list(&self) -> Vec<Occurrence> {
        bucket::iter(&self.oldd).cloned().collect()
    }

    /// Nothing held at the best time (old occurrences aside).
    pub fn is_empty(&self) -> bool {
        self.d.is_empty()
    }
}
