//! Day-based calendar families.
//!
//! - `occur_every_day`: `[hour, minute, rend, ralarm, span, gui_config]`
//! - `occur_selected_weekdays`: `[weekdays, hour, minute, rend, ralarm, span, gui_config]`
//!
//! Weekdays are numbered from 0 (Monday) to 6 (Sunday).

use chrono::Datelike;
use serde_json::Value;

use super::{
    check_weekday, unroll_next, unroll_range, DateBounds, Family, RelativeTiming, TimeOfDay,
    LOOKAHEAD_YEARS,
};
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::WallClock;

type EveryDayParams = (u32, u32, Option<i64>, Option<i64>, i64, Value);
type WeekdaysParams = (Vec<u32>, u32, u32, Option<i64>, Option<i64>, i64, Value);

pub fn make_every_day_rule(
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    let mut params = vec![time.hour().into(), time.minute().into()];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurEveryDay.kind(standard), params))
}

pub fn make_selected_weekdays_rule(
    weekdays: &[u32],
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    if weekdays.is_empty() {
        return Err(EngineError::BadRule("no weekday selected".to_string()));
    }
    for &weekday in weekdays {
        check_weekday(weekday)?;
    }
    let mut weekdays = weekdays.to_vec();
    weekdays.sort_unstable();
    weekdays.dedup();

    let mut params = vec![
        Value::Array(weekdays.into_iter().map(Value::from).collect()),
        time.hour().into(),
        time.minute().into(),
    ];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurSelectedWeekdays.kind(standard), params))
}

/// Decoded day rule; an empty weekday mask means every day.
struct Daily {
    mask: [bool; 7],
    time: TimeOfDay,
    timing: RelativeTiming,
}

impl Daily {
    fn decode(rule: &Rule, every_day: bool) -> Result<Self, EngineError> {
        let (weekdays, hour, minute, rend, ralarm) = if every_day {
            let (hour, minute, rend, ralarm, _span, _): EveryDayParams = rule.decode()?;
            (Vec::new(), hour, minute, rend, ralarm)
        } else {
            let (weekdays, hour, minute, rend, ralarm, _span, _): WeekdaysParams =
                rule.decode()?;
            (weekdays, hour, minute, rend, ralarm)
        };
        let mut mask = [every_day; 7];
        for weekday in weekdays {
            mask[check_weekday(weekday)?.num_days_from_monday() as usize] = true;
        }
        Ok(Self {
            mask,
            time: TimeOfDay::new(hour, minute)?,
            timing: RelativeTiming::new(rend, ralarm)?,
        })
    }

    fn starts(&self, bounds: DateBounds) -> impl Iterator<Item = i64> + '_ {
        bounds
            .days()
            .filter(|d| self.mask[d.weekday().num_days_from_monday() as usize])
            .map(|d| self.time.on(d))
    }

    fn range(
        &self,
        mint: i64,
        maxt: i64,
        clock: &WallClock,
        target: ItemRef<'_>,
        occs: &mut OccurrencesRange,
    ) {
        if let Some(bounds) = DateBounds::for_range(mint, maxt, clock, &self.timing) {
            unroll_range(self.starts(bounds), maxt, clock, &self.timing, target, occs);
        }
    }

    fn next(
        &self,
        base_time: i64,
        clock: &WallClock,
        target: ItemRef<'_>,
        occs: &mut NextOccurrences,
    ) {
        if let Some(bounds) = DateBounds::for_next(base_time, clock, &self.timing, LOOKAHEAD_YEARS)
        {
            unroll_next(self.starts(bounds), base_time, clock, &self.timing, target, occs);
        }
    }
}

pub(crate) fn every_day_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    Daily::decode(rule, true)?.range(mint, maxt, clock, target, occs);
    Ok(())
}

pub(crate) fn every_day_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    Daily::decode(rule, true)?.next(base_time, clock, target, occs);
    Ok(())
}

pub(crate) fn selected_weekdays_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    Daily::decode(rule, false)?.range(mint, maxt, clock, target, occs);
    Ok(())
}

pub(crate) fn selected_weekdays_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    Daily::decode(rule, false)?.next(base_time, clock, target, occs);
    Ok(())
}
