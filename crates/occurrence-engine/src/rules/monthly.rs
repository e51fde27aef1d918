//! Month-based calendar families.
//!
//! - `occur_monthly_number_direct`: the Nth day of the selected months.
//! - `occur_monthly_number_inverse`: the Nth-from-last day (1 is the last).
//! - `occur_monthly_weekday_direct`: the Nth given weekday (N in 1..=5).
//! - `occur_monthly_weekday_inverse`: the Nth-from-last given weekday.
//!
//! Parameters: `[month_steps, day, hour, minute, rend, ralarm, span, gui_config]`
//! for the day-number families and `[month_steps, weekday, number, hour,
//! minute, rend, ralarm, span, gui_config]` for the weekday families, where
//! `month_steps[M - 1]` is how many months separate month M from the next
//! selected month.
//!
//! Months where the day does not exist (the 31st of April, the fifth Monday
//! of most months) are skipped.

use chrono::{NaiveDate, Weekday};
use serde_json::Value;

use super::{
    check_day_number, check_month_steps, check_week_number, check_weekday, days_in_month,
    find_nth_weekday_in_month, month_steps, selected_months, unroll_next, unroll_range,
    DateBounds, Family, RelativeTiming, TimeOfDay, LOOKAHEAD_YEARS,
};
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::WallClock;

type NumberParams = ([u32; 12], u32, u32, u32, Option<i64>, Option<i64>, i64, Value);
type WeekdayParams = (
    [u32; 12],
    u32,
    u32,
    u32,
    u32,
    Option<i64>,
    Option<i64>,
    i64,
    Value,
);

pub fn make_number_direct_rule(
    months: &[u32],
    day: u32,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_day_number(day)?;
    encode(
        Family::OccurMonthlyNumberDirect,
        months,
        vec![day.into()],
        time,
        timing,
        standard,
        gui_config,
    )
}

pub fn make_number_inverse_rule(
    months: &[u32],
    day: u32,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_day_number(day)?;
    encode(
        Family::OccurMonthlyNumberInverse,
        months,
        vec![day.into()],
        time,
        timing,
        standard,
        gui_config,
    )
}

pub fn make_weekday_direct_rule(
    months: &[u32],
    weekday: u32,
    number: u32,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_weekday(weekday)?;
    check_week_number(number)?;
    encode(
        Family::OccurMonthlyWeekdayDirect,
        months,
        vec![weekday.into(), number.into()],
        time,
        timing,
        standard,
        gui_config,
    )
}

pub fn make_weekday_inverse_rule(
    months: &[u32],
    weekday: u32,
    number: u32,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_weekday(weekday)?;
    check_week_number(number)?;
    encode(
        Family::OccurMonthlyWeekdayInverse,
        months,
        vec![weekday.into(), number.into()],
        time,
        timing,
        standard,
        gui_config,
    )
}

#[allow(clippy::too_many_arguments)]
fn encode(
    family: Family,
    months: &[u32],
    selector: Vec<Value>,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    let steps = month_steps(months)?;
    let mut params = vec![Value::Array(steps.iter().map(|s| Value::from(*s)).collect())];
    params.extend(selector);
    params.push(time.hour().into());
    params.push(time.minute().into());
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(family.kind(standard), params))
}

/// Which day of a selected month.
#[derive(Debug, Clone, Copy)]
enum DayPick {
    Number(u32),
    NumberFromEnd(u32),
    Weekday(Weekday, i32),
}

impl DayPick {
    fn date_in(&self, year: i32, month: u32) -> Option<NaiveDate> {
        match *self {
            DayPick::Number(day) => NaiveDate::from_ymd_opt(year, month, day),
            DayPick::NumberFromEnd(n) => {
                let last = days_in_month(year, month)?;
                let day = last.checked_sub(n - 1).filter(|d| *d >= 1)?;
                NaiveDate::from_ymd_opt(year, month, day)
            }
            DayPick::Weekday(weekday, ordinal) => {
                find_nth_weekday_in_month(year, month, weekday, ordinal)
            }
        }
    }
}

struct Monthly {
    steps: [u32; 12],
    pick: DayPick,
    time: TimeOfDay,
    timing: RelativeTiming,
}

impl Monthly {
    fn decode(rule: &Rule, family: Family) -> Result<Self, EngineError> {
        let (steps, pick, hour, minute, rend, ralarm) = match family {
            Family::OccurMonthlyNumberDirect | Family::OccurMonthlyNumberInverse => {
                let (steps, day, hour, minute, rend, ralarm, _span, _): NumberParams =
                    rule.decode()?;
                check_day_number(day)?;
                let pick = if family == Family::OccurMonthlyNumberDirect {
                    DayPick::Number(day)
                } else {
                    DayPick::NumberFromEnd(day)
                };
                (steps, pick, hour, minute, rend, ralarm)
            }
            _ => {
                let (steps, weekday, number, hour, minute, rend, ralarm, _span, _): WeekdayParams =
                    rule.decode()?;
                check_week_number(number)?;
                let ordinal = if family == Family::OccurMonthlyWeekdayDirect {
                    number as i32
                } else {
                    -(number as i32)
                };
                (
                    steps,
                    DayPick::Weekday(check_weekday(weekday)?, ordinal),
                    hour,
                    minute,
                    rend,
                    ralarm,
                )
            }
        };
        check_month_steps(&steps)?;
        Ok(Self {
            steps,
            pick,
            time: TimeOfDay::new(hour, minute)?,
            timing: RelativeTiming::new(rend, ralarm)?,
        })
    }

    fn starts(&self, bounds: DateBounds) -> impl Iterator<Item = i64> + '_ {
        selected_months(self.steps, bounds.first, bounds.last)
            .filter_map(|(year, month)| self.pick.date_in(year, month))
            .map(|date| self.time.on(date))
    }
}

fn range(
    family: Family,
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    let monthly = Monthly::decode(rule, family)?;
    if let Some(bounds) = DateBounds::for_range(mint, maxt, clock, &monthly.timing) {
        unroll_range(monthly.starts(bounds), maxt, clock, &monthly.timing, target, occs);
    }
    Ok(())
}

fn next(
    family: Family,
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    let monthly = Monthly::decode(rule, family)?;
    if let Some(bounds) = DateBounds::for_next(base_time, clock, &monthly.timing, LOOKAHEAD_YEARS)
    {
        unroll_next(monthly.starts(bounds), base_time, clock, &monthly.timing, target, occs);
    }
    Ok(())
}

pub(crate) fn number_direct_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    range(Family::OccurMonthlyNumberDirect, mint, maxt, clock, target, rule, occs)
}

pub(crate) fn number_direct_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    next(Family::OccurMonthlyNumberDirect, base_time, clock, target, rule, occs)
}

pub(crate) fn number_inverse_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    range(Family::OccurMonthlyNumberInverse, mint, maxt, clock, target, rule, occs)
}

pub(crate) fn number_inverse_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    next(Family::OccurMonthlyNumberInverse, base_time, clock, target, rule, occs)
}

pub(crate) fn weekday_direct_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    range(Family::OccurMonthlyWeekdayDirect, mint, maxt, clock, target, rule, occs)
}

pub(crate) fn weekday_direct_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    next(Family::OccurMonthlyWeekdayDirect, base_time, clock, target, rule, occs)
}

pub(crate) fn weekday_inverse_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    range(Family::OccurMonthlyWeekdayInverse, mint, maxt, clock, target, rule, occs)
}

pub(crate) fn weekday_inverse_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    next(Family::OccurMonthlyWeekdayInverse, base_time, clock, target, rule, occs)
}
