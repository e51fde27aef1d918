//! Year-based calendar families.
//!
//! - `occur_yearly_single`: `[interval, refyear, month, day, leap_fallback,
//!   hour, minute, rend, ralarm, span, gui_config]`
//! - `occur_yearly_inverse`: `[interval, refyear, month, day_from_end, hour,
//!   minute, rend, ralarm, span, gui_config]`
//!
//! Both repeat every `interval` years counting from `refyear`. A yearly
//! February 29th falls back to `leap_fallback` in common years when one is
//! given and is skipped otherwise.

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use super::{
    check_day_of_month, days_in_month, max_days_in_month, unroll_next, unroll_range, DateBounds,
    Family, RelativeTiming, TimeOfDay, LOOKAHEAD_YEARS,
};
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::WallClock;

type SingleParams = (
    u32,
    i32,
    u32,
    u32,
    Option<u32>,
    u32,
    u32,
    Option<i64>,
    Option<i64>,
    i64,
    Value,
);
type InverseParams = (u32, i32, u32, u32, u32, u32, Option<i64>, Option<i64>, i64, Value);

fn check_years(interval: u32) -> Result<(), EngineError> {
    if interval == 0 {
        return Err(EngineError::BadRule(
            "year interval must be positive".to_string(),
        ));
    }
    Ok(())
}

fn check_leap_fallback(month: u32, day: u32, fallback: Option<u32>) -> Result<(), EngineError> {
    match fallback {
        None => Ok(()),
        Some(f) if month == 2 && day == 29 && (1..=28).contains(&f) => Ok(()),
        Some(f) => Err(EngineError::BadRule(format!(
            "leap fallback {} only applies to February 29th",
            f
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn make_single_rule(
    interval: u32,
    refyear: i32,
    month: u32,
    day: u32,
    leap_fallback: Option<u32>,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_years(interval)?;
    check_day_of_month(month, day)?;
    check_leap_fallback(month, day, leap_fallback)?;
    let mut params = vec![
        interval.into(),
        refyear.into(),
        month.into(),
        day.into(),
        leap_fallback.into(),
        time.hour().into(),
        time.minute().into(),
    ];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurYearlySingle.kind(standard), params))
}

/// `day_from_end` 1 is the last day of `month`.
#[allow(clippy::too_many_arguments)]
pub fn make_inverse_rule(
    interval: u32,
    refyear: i32,
    month: u32,
    day_from_end: u32,
    time: TimeOfDay,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_years(interval)?;
    check_day_of_month(month, day_from_end)?;
    let mut params = vec![
        interval.into(),
        refyear.into(),
        month.into(),
        day_from_end.into(),
        time.hour().into(),
        time.minute().into(),
    ];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurYearlyInverse.kind(standard), params))
}

#[derive(Debug, Clone, Copy)]
enum YearDay {
    Direct { day: u32, leap_fallback: Option<u32> },
    FromEnd(u32),
}

struct Yearly {
    interval: u32,
    refyear: i32,
    month: u32,
    pick: YearDay,
    time: TimeOfDay,
    timing: RelativeTiming,
}

impl Yearly {
    fn decode(rule: &Rule, family: Family) -> Result<Self, EngineError> {
        let yearly = if family == Family::OccurYearlySingle {
            let (interval, refyear, month, day, leap_fallback, hour, minute, rend, ralarm, _, _): SingleParams =
                rule.decode()?;
            check_day_of_month(month, day)?;
            Self {
                interval,
                refyear,
                month,
                pick: YearDay::Direct { day, leap_fallback },
                time: TimeOfDay::new(hour, minute)?,
                timing: RelativeTiming::new(rend, ralarm)?,
            }
        } else {
            let (interval, refyear, month, day, hour, minute, rend, ralarm, _, _): InverseParams =
                rule.decode()?;
            if day == 0 || day > max_days_in_month(month) {
                return Err(EngineError::BadRule(format!(
                    "{}: day {} from the end of month {}",
                    rule.kind, day, month
                )));
            }
            Self {
                interval,
                refyear,
                month,
                pick: YearDay::FromEnd(day),
                time: TimeOfDay::new(hour, minute)?,
                timing: RelativeTiming::new(rend, ralarm)?,
            }
        };
        check_years(yearly.interval)?;
        Ok(yearly)
    }

    fn date_in(&self, year: i32) -> Option<NaiveDate> {
        match self.pick {
            YearDay::Direct { day, leap_fallback } => NaiveDate::from_ymd_opt(year, self.month, day)
                .or_else(|| NaiveDate::from_ymd_opt(year, self.month, leap_fallback?)),
            YearDay::FromEnd(n) => {
                let day = days_in_month(year, self.month)?.checked_sub(n - 1)?;
                NaiveDate::from_ymd_opt(year, self.month, day)
            }
        }
    }

    /// Matching years from `bounds.first`'s through `bounds.last`'s.
    fn years(&self, bounds: DateBounds) -> impl Iterator<Item = i32> {
        let interval = i64::from(self.interval);
        let first = i64::from(bounds.first.year());
        let last = i64::from(bounds.last.year());
        let start = first + (i64::from(self.refyear) - first).rem_euclid(interval);
        (0i64..)
            .map(move |k| start + k * interval)
            .take_while(move |y| *y <= last)
            .filter_map(|y| i32::try_from(y).ok())
    }

    fn starts(&self, bounds: DateBounds) -> impl Iterator<Item = i64> + '_ {
        self.years(bounds)
            .filter_map(|year| self.date_in(year))
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
    let yearly = Yearly::decode(rule, family)?;
    if let Some(bounds) = DateBounds::for_range(mint, maxt, clock, &yearly.timing) {
        unroll_range(yearly.starts(bounds), maxt, clock, &yearly.timing, target, occs);
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
    let yearly = Yearly::decode(rule, family)?;
    let horizon = LOOKAHEAD_YEARS.saturating_mul(yearly.interval);
    if let Some(bounds) = DateBounds::for_next(base_time, clock, &yearly.timing, horizon) {
        unroll_next(yearly.starts(bounds), base_time, clock, &yearly.timing, target, occs);
    }
    Ok(())
}

pub(crate) fn single_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    range(Family::OccurYearlySingle, mint, maxt, clock, target, rule, occs)
}

pub(crate) fn single_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    next(Family::OccurYearlySingle, base_time, clock, target, rule, occs)
}

pub(crate) fn inverse_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    range(Family::OccurYearlyInverse, mint, maxt, clock, target, rule, occs)
}

pub(crate) fn inverse_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    next(Family::OccurYearlyInverse, base_time, clock, target, rule, occs)
}
