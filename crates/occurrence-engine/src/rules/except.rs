//! Exception families: they generate nothing and remove occurrences that
//! preceding rules of the same item put in the accumulator.
//!
//! - `except_once`: `[start, end, inclusive, gui_config]`
//! - `except_regularly_single`: `[refstart, rend, interval, inclusive, gui_config]`
//!
//! An occurrence is removed when it starts inside a window, or, for
//! inclusive exceptions, when it is in progress at the window's start.
//!
//! `except_once` windows are absolute in both standards. Repeating windows
//! follow the fixed-interval families: absolute steps for `local`, local
//! wall-clock steps for `UTC`.

use serde_json::Value;

use super::{check_interval, check_reference, stepped, Family};
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::WallClock;

type OnceParams = (i64, i64, bool, Value);
type RegularlyParams = (i64, i64, i64, bool, Value);

pub fn make_once_rule(
    start: i64,
    end: i64,
    inclusive: bool,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_reference("start", start)?;
    if start >= end {
        return Err(EngineError::BadRule(format!(
            "exception end {} is not after start {}",
            end, start
        )));
    }
    Ok(Rule::new(
        Family::ExceptOnce.kind(standard),
        vec![start.into(), end.into(), inclusive.into(), gui_config],
    ))
}

pub fn make_regularly_rule(
    refstart: i64,
    rend: i64,
    interval: i64,
    inclusive: bool,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_reference("refstart", refstart)?;
    check_interval(interval)?;
    if rend <= 0 {
        return Err(EngineError::BadRule(format!(
            "exception duration must be positive, got {}",
            rend
        )));
    }
    Ok(Rule::new(
        Family::ExceptRegularlySingle.kind(standard),
        vec![
            refstart.into(),
            rend.into(),
            interval.into(),
            inclusive.into(),
            gui_config,
        ],
    ))
}

/// Where exceptions are applied; both accumulators remove with the same
/// containment rule.
trait Excepted {
    fn item_time_span(&self, target: ItemRef<'_>) -> Option<(i64, i64)>;
    fn except(&mut self, target: ItemRef<'_>, start: i64, end: i64, inclusive: bool) -> usize;
}

impl Excepted for OccurrencesRange {
    fn item_time_span(&self, target: ItemRef<'_>) -> Option<(i64, i64)> {
        self.get_item_time_span(target.store, target.item)
    }

    fn except(&mut self, target: ItemRef<'_>, start: i64, end: i64, inclusive: bool) -> usize {
        self.except_safe(target.store, target.item, start, end, inclusive)
    }
}

impl Excepted for NextOccurrences {
    fn item_time_span(&self, target: ItemRef<'_>) -> Option<(i64, i64)> {
        self.get_item_time_span(target.store, target.item)
    }

    fn except(&mut self, target: ItemRef<'_>, start: i64, end: i64, inclusive: bool) -> usize {
        self.except_safe(target.store, target.item, start, end, inclusive)
    }
}

fn apply_once<A: Excepted>(target: ItemRef<'_>, rule: &Rule, occs: &mut A) -> Result<(), EngineError> {
    let (start, end, inclusive, _): OnceParams = rule.decode()?;
    occs.except(target, start, end, inclusive);
    Ok(())
}

/// Apply every window that can hold one of the item's occurrences.
fn apply_regularly<A: Excepted>(
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut A,
) -> Result<(), EngineError> {
    let (refstart, rend, interval, inclusive, _): RegularlyParams = rule.decode()?;
    check_interval(interval)?;
    let Some((first, last)) = occs.item_time_span(target) else {
        return Ok(());
    };
    let reference = clock.to_wall(refstart);
    let seed = clock
        .to_wall(first)
        .saturating_sub(rend)
        .saturating_sub(clock.seed_margin());
    let k = seed.saturating_sub(reference).div_euclid(interval);
    for wall in stepped(reference, interval, k) {
        let start = clock.to_absolute(wall);
        if start > last {
            break;
        }
        occs.except(
            target,
            start,
            clock.to_absolute(wall.saturating_add(rend)),
            inclusive,
        );
    }
    Ok(())
}

pub(crate) fn once_occurrences_range(
    _mint: i64,
    _maxt: i64,
    _clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    apply_once(target, rule, occs)
}

pub(crate) fn once_next_item_occurrences(
    _base_time: i64,
    _clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    apply_once(target, rule, occs)
}

pub(crate) fn regularly_occurrences_range(
    _mint: i64,
    _maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    apply_regularly(clock, target, rule, occs)
}

pub(crate) fn regularly_next_item_occurrences(
    _base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    apply_regularly(clock, target, rule, occs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::Occurrence;
    use crate::utc_offset::UtcOffset;

    const DAY: i64 = 86400;
    const T: i64 = 1_767_571_200;

    fn occ(item: i64, start: i64, end: Option<i64>) -> Occurrence {
        ItemRef::new("s", item).occurrence(start, end, None)
    }

    #[test]
    fn test_once_validates() {
        assert!(make_once_rule(0, 10, false, TimeStandard::Utc, Value::Null).is_err());
        assert!(make_once_rule(T, T, false, TimeStandard::Utc, Value::Null).is_err());
        let rule = make_once_rule(T, T + 1, true, TimeStandard::Local, Value::Null).unwrap();
        assert_eq!(rule.kind, "except_once_local");
    }

    #[test]
    fn test_once_removes_only_target_item() {
        let rule = make_once_rule(T + DAY, T + DAY + 1, false, TimeStandard::Utc, Value::Null)
            .unwrap();
        let offset = UtcOffset::fixed(0);
        let clock = WallClock::new(TimeStandard::Utc, &offset);
        let mut occs = OccurrencesRange::new(T, T + 7 * DAY);
        for k in 0..7 {
            occs.add_safe(occ(1, T + k * DAY, None));
        }
        occs.add_safe(occ(2, T + DAY, None));
        once_occurrences_range(T, T + 7 * DAY, &clock, ItemRef::new("s", 1), &rule, &mut occs)
            .unwrap();
        assert_eq!(occs.len(), 7);
        assert!(occs.get_dict()["s"][&1].iter().all(|o| o.start != T + DAY));
    }

    #[test]
    fn test_regularly_removes_every_window() {
        // One-hour window every other day starting at T
        let rule = make_regularly_rule(T, 3600, 2 * DAY, false, TimeStandard::Utc, Value::Null)
            .unwrap();
        let offset = UtcOffset::fixed(0);
        let clock = WallClock::new(TimeStandard::Utc, &offset);
        let mut occs = OccurrencesRange::new(T, T + 10 * DAY);
        for k in 0..10 {
            occs.add_safe(occ(1, T + k * DAY + 1800, None));
        }
        regularly_occurrences_range(T, T + 10 * DAY, &clock, ItemRef::new("s", 1), &rule, &mut occs)
            .unwrap();
        let mut starts: Vec<i64> = occs.get_list().iter().map(|o| o.start).collect();
        starts.sort_unstable();
        let expected: Vec<i64> = (0..10)
            .filter(|k| k % 2 == 1)
            .map(|k| T + k * DAY + 1800)
            .collect();
        assert_eq!(starts, expected);
    }

    #[test]
    fn test_regularly_inclusive_straddle() {
        let rule = make_regularly_rule(T, 60, DAY, true, TimeStandard::Utc, Value::Null).unwrap();
        let offset = UtcOffset::fixed(0);
        let clock = WallClock::new(TimeStandard::Utc, &offset);
        let mut occs = NextOccurrences::new();
        // In progress across the window start at T + 5 days
        occs.add_safe(T + 5 * DAY - 100, occ(1, T + 5 * DAY - 50, Some(T + 5 * DAY + 50)));
        regularly_next_item_occurrences(0, &clock, ItemRef::new("s", 1), &rule, &mut occs)
            .unwrap();
        assert!(occs.is_empty());
    }

    #[test]
    fn test_regularly_validates() {
        assert!(make_regularly_rule(T, 0, DAY, false, TimeStandard::Utc, Value::Null).is_err());
        assert!(make_regularly_rule(T, 60, 0, false, TimeStandard::Utc, Value::Null).is_err());
        assert!(make_regularly_rule(0, 60, DAY, false, TimeStandard::Utc, Value::Null).is_err());
    }
}
