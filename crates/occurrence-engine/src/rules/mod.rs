//! Built-in rule families.
//!
//! Each family module provides a `make_rule` encoder and a pair of
//! generators sharing the same unrolling logic:
//!
//! - `get_occurrences_range` feeds an [`OccurrencesRange`] until candidates
//!   (and their alarms) pass the end of the window;
//! - `get_next_item_occurrences` feeds a [`NextOccurrences`] until candidates
//!   are provably later than the accumulator's best time.
//!
//! Occurring families are unrolled on a [`WallClock`]: candidate starts are
//! produced as wall seconds in ascending order and converted to absolute
//! timestamps one by one. Encoders validate everything, so generators add
//! with the unchecked `add_safe`.

pub mod daily;
pub mod except;
pub mod monthly;
pub mod once;
pub mod regularly;
pub mod synodic;
pub mod yearly;

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Weekday};
use serde_json::Value;

use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::registry::{RuleHandler, RuleRegistry};
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::{UtcOffset, WallClock};

/// Gregorian calendar patterns repeat every 400 years: a calendar family
/// that yields no valid date within this horizon never will.
pub const LOOKAHEAD_YEARS: u32 = 400;

// ── Families ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    OccurOnce,
    OccurRegularlySingle,
    OccurRegularlyGroup,
    OccurEveryDay,
    OccurSelectedWeekdays,
    OccurMonthlyNumberDirect,
    OccurMonthlyNumberInverse,
    OccurMonthlyWeekdayDirect,
    OccurMonthlyWeekdayInverse,
    OccurYearlySingle,
    OccurYearlyInverse,
    OccurEverySynodicMonth,
    ExceptOnce,
    ExceptRegularlySingle,
}

impl Family {
    pub const ALL: [Family; 14] = [
        Family::OccurOnce,
        Family::OccurRegularlySingle,
        Family::OccurRegularlyGroup,
        Family::OccurEveryDay,
        Family::OccurSelectedWeekdays,
        Family::OccurMonthlyNumberDirect,
        Family::OccurMonthlyNumberInverse,
        Family::OccurMonthlyWeekdayDirect,
        Family::OccurMonthlyWeekdayInverse,
        Family::OccurYearlySingle,
        Family::OccurYearlyInverse,
        Family::OccurEverySynodicMonth,
        Family::ExceptOnce,
        Family::ExceptRegularlySingle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Family::OccurOnce => "occur_once",
            Family::OccurRegularlySingle => "occur_regularly_single",
            Family::OccurRegularlyGroup => "occur_regularly_group",
            Family::OccurEveryDay => "occur_every_day",
            Family::OccurSelectedWeekdays => "occur_selected_weekdays",
            Family::OccurMonthlyNumberDirect => "occur_monthly_number_direct",
            Family::OccurMonthlyNumberInverse => "occur_monthly_number_inverse",
            Family::OccurMonthlyWeekdayDirect => "occur_monthly_weekday_direct",
            Family::OccurMonthlyWeekdayInverse => "occur_monthly_weekday_inverse",
            Family::OccurYearlySingle => "occur_yearly_single",
            Family::OccurYearlyInverse => "occur_yearly_inverse",
            Family::OccurEverySynodicMonth => "occur_every_synodic_month",
            Family::ExceptOnce => "except_once",
            Family::ExceptRegularlySingle => "except_regularly_single",
        }
    }

    /// The kind name of this family in `standard`, e.g. `occur_every_day_UTC`.
    pub fn kind(&self, standard: TimeStandard) -> String {
        format!("{}_{}", self.name(), standard.suffix())
    }

    /// Whether the family counts fixed intervals of seconds rather than
    /// calendar dates and times of day.
    pub fn is_interval(&self) -> bool {
        matches!(
            self,
            Family::OccurRegularlySingle
                | Family::OccurRegularlyGroup
                | Family::OccurEverySynodicMonth
                | Family::ExceptRegularlySingle
        )
    }

    /// The clock this family's rules in `standard` are unrolled on.
    ///
    /// Calendar families read dates and times of day off the clock their
    /// standard names. Interval families in the `local` standard step in
    /// absolute seconds; in the `UTC` standard they step on the local wall
    /// clock, going through the offset at every occurrence.
    pub fn clock<'a>(&self, standard: TimeStandard, utc_offset: &'a UtcOffset) -> WallClock<'a> {
        match (self.is_interval(), standard) {
            (true, TimeStandard::Local) => WallClock::absolute(),
            (true, TimeStandard::Utc) => WallClock::shifted(utc_offset),
            (false, standard) => WallClock::new(standard, utc_offset),
        }
    }
}

struct BasicRuleHandler {
    family: Family,
    standard: TimeStandard,
}

impl RuleHandler for BasicRuleHandler {
    fn get_occurrences_range(
        &self,
        mint: i64,
        maxt: i64,
        utc_offset: &UtcOffset,
        target: ItemRef<'_>,
        rule: &Rule,
        occs: &mut OccurrencesRange,
    ) -> Result<(), EngineError> {
        let clock = self.family.clock(self.standard, utc_offset);
        let f = match self.family {
            Family::OccurOnce => once::get_occurrences_range,
            Family::OccurRegularlySingle => regularly::single_occurrences_range,
            Family::OccurRegularlyGroup => regularly::group_occurrences_range,
            Family::OccurEveryDay => daily::every_day_occurrences_range,
            Family::OccurSelectedWeekdays => daily::selected_weekdays_occurrences_range,
            Family::OccurMonthlyNumberDirect => monthly::number_direct_occurrences_range,
            Family::OccurMonthlyNumberInverse => monthly::number_inverse_occurrences_range,
            Family::OccurMonthlyWeekdayDirect => monthly::weekday_direct_occurrences_range,
            Family::OccurMonthlyWeekdayInverse => monthly::weekday_inverse_occurrences_range,
            Family::OccurYearlySingle => yearly::single_occurrences_range,
            Family::OccurYearlyInverse => yearly::inverse_occurrences_range,
            Family::OccurEverySynodicMonth => synodic::get_occurrences_range,
            Family::ExceptOnce => except::once_occurrences_range,
            Family::ExceptRegularlySingle => except::regularly_occurrences_range,
        };
        f(mint, maxt, &clock, target, rule, occs)
    }

    fn get_next_item_occurrences(
        &self,
        base_time: i64,
        utc_offset: &UtcOffset,
        target: ItemRef<'_>,
        rule: &Rule,
        occs: &mut NextOccurrences,
    ) -> Result<(), EngineError> {
        let clock = self.family.clock(self.standard, utc_offset);
        let f = match self.family {
            Family::OccurOnce => once::get_next_item_occurrences,
            Family::OccurRegularlySingle => regularly::single_next_item_occurrences,
            Family::OccurRegularlyGroup => regularly::group_next_item_occurrences,
            Family::OccurEveryDay => daily::every_day_next_item_occurrences,
            Family::OccurSelectedWeekdays => daily::selected_weekdays_next_item_occurrences,
            Family::OccurMonthlyNumberDirect => monthly::number_direct_next_item_occurrences,
            Family::OccurMonthlyNumberInverse => monthly::number_inverse_next_item_occurrences,
            Family::OccurMonthlyWeekdayDirect => monthly::weekday_direct_next_item_occurrences,
            Family::OccurMonthlyWeekdayInverse => monthly::weekday_inverse_next_item_occurrences,
            Family::OccurYearlySingle => yearly::single_next_item_occurrences,
            Family::OccurYearlyInverse => yearly::inverse_next_item_occurrences,
            Family::OccurEverySynodicMonth => synodic::get_next_item_occurrences,
            Family::ExceptOnce => except::once_next_item_occurrences,
            Family::ExceptRegularlySingle => except::regularly_next_item_occurrences,
        };
        f(base_time, &clock, target, rule, occs)
    }
}

/// Register every built-in family in both standards.
pub(crate) fn install_basic_rules(registry: &mut RuleRegistry) {
    for family in Family::ALL {
        for standard in TimeStandard::ALL {
            // Built-in kind names are unique, the registry is fresh.
            let _ = registry.install_rule_handler(
                family.kind(standard),
                Box::new(BasicRuleHandler { family, standard }),
            );
        }
    }
}

/// Split a kind name into its family and standard.
pub fn parse_kind(kind: &str) -> Option<(Family, TimeStandard)> {
    TimeStandard::ALL.into_iter().find_map(|standard| {
        let name = kind.strip_suffix(standard.suffix())?.strip_suffix('_')?;
        Family::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .map(|f| (f, standard))
    })
}

// ── Relative timing ─────────────────────────────────────────────────────────

/// Optional duration and alarm offset relative to an occurrence's start.
///
/// Missing values propagate: an occurrence of a rule without `rend` has no
/// end, one without `ralarm` has no alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelativeTiming {
    rend: Option<i64>,
    ralarm: Option<i64>,
}

impl RelativeTiming {
    /// `rend` must be positive; `ralarm` is seconds before the start
    /// (negative: after the start).
    pub fn new(rend: Option<i64>, ralarm: Option<i64>) -> Result<Self, EngineError> {
        if let Some(rend) = rend {
            if rend <= 0 {
                return Err(EngineError::BadRule(format!(
                    "duration must be positive, got {}",
                    rend
                )));
            }
        }
        Ok(Self { rend, ralarm })
    }

    pub fn rend(&self) -> Option<i64> {
        self.rend
    }

    pub fn ralarm(&self) -> Option<i64> {
        self.ralarm
    }

    pub fn end(&self, start: i64) -> Option<i64> {
        self.rend.map(|rend| start.saturating_add(rend))
    }

    pub fn alarm(&self, start: i64) -> Option<i64> {
        self.ralarm.map(|ralarm| start.saturating_sub(ralarm))
    }

    /// How far before a query time an occurrence may start and still reach
    /// it with its end or a trailing alarm.
    pub fn span(&self) -> i64 {
        self.rend
            .unwrap_or(0)
            .max(self.ralarm.map_or(0, |ralarm| -ralarm))
            .max(0)
    }

    /// How far after a query time an occurrence may start and still reach
    /// it with a leading alarm.
    pub fn lead(&self) -> i64 {
        self.ralarm.unwrap_or(0).max(0)
    }

    fn to_params(self) -> [Value; 3] {
        [self.rend.into(), self.ralarm.into(), self.span().into()]
    }
}

// ── Time of day ─────────────────────────────────────────────────────────────

/// Hour and minute of a calendar family's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, EngineError> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .filter(|_| hour < 24 && minute < 60)
            .map(Self)
            .ok_or_else(|| {
                EngineError::BadRule(format!("invalid time of day {}:{:02}", hour, minute))
            })
    }

    pub fn hour(&self) -> u32 {
        chrono::Timelike::hour(&self.0)
    }

    pub fn minute(&self) -> u32 {
        chrono::Timelike::minute(&self.0)
    }

    /// Wall seconds of this time on `date`.
    pub(crate) fn on(&self, date: NaiveDate) -> i64 {
        date.and_time(self.0).and_utc().timestamp()
    }
}

// ── Shared validation ───────────────────────────────────────────────────────

pub(crate) fn check_reference(name: &str, value: i64) -> Result<(), EngineError> {
    if value == 0 {
        return Err(EngineError::BadRule(format!("{} must be set", name)));
    }
    Ok(())
}

pub(crate) fn check_interval(interval: i64) -> Result<(), EngineError> {
    if interval <= 0 {
        return Err(EngineError::BadRule(format!(
            "interval must be positive, got {}",
            interval
        )));
    }
    Ok(())
}

pub(crate) fn check_month(month: u32) -> Result<(), EngineError> {
    if !(1..=12).contains(&month) {
        return Err(EngineError::BadRule(format!("invalid month {}", month)));
    }
    Ok(())
}

pub(crate) fn check_weekday(weekday: u32) -> Result<Weekday, EngineError> {
    u8::try_from(weekday)
        .ok()
        .and_then(|w| Weekday::try_from(w).ok())
        .ok_or_else(|| EngineError::BadRule(format!("invalid weekday {}", weekday)))
}

/// `day` must exist in `month` of at least one year.
pub(crate) fn check_day_of_month(month: u32, day: u32) -> Result<(), EngineError> {
    check_month(month)?;
    if day == 0 || day > max_days_in_month(month) {
        return Err(EngineError::BadRule(format!(
            "day {} does not exist in month {}",
            day, month
        )));
    }
    Ok(())
}

pub(crate) fn check_day_number(day: u32) -> Result<(), EngineError> {
    if !(1..=31).contains(&day) {
        return Err(EngineError::BadRule(format!("invalid day number {}", day)));
    }
    Ok(())
}

pub(crate) fn check_week_number(number: u32) -> Result<(), EngineError> {
    if !(1..=5).contains(&number) {
        return Err(EngineError::BadRule(format!(
            "invalid weekday number {}",
            number
        )));
    }
    Ok(())
}

// ── Calendar helpers ────────────────────────────────────────────────────────

pub(crate) fn max_days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

pub(crate) fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_next = NaiveDate::from_ymd_opt(ny, nm, 1)?;
    Some(first_next.pred_opt()?.day())
}

/// Find the Nth weekday in a month. ordinal < 0 counts from the end
/// (-1 is the last).
pub(crate) fn find_nth_weekday_in_month(
    year: i32,
    month: u32,
    weekday: Weekday,
    ordinal: i32,
) -> Option<NaiveDate> {
    let target = if ordinal > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let diff = (weekday.num_days_from_monday() as i64
            - first.weekday().num_days_from_monday() as i64
            + 7)
            % 7;
        first + chrono::Duration::days(diff) + chrono::Duration::weeks((ordinal - 1) as i64)
    } else {
        let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)?)?;
        let diff = (last.weekday().num_days_from_monday() as i64
            - weekday.num_days_from_monday() as i64
            + 7)
            % 7;
        last - chrono::Duration::days(diff) - chrono::Duration::weeks((-ordinal - 1) as i64)
    };
    (target.month() == month).then_some(target)
}

/// Expand a month selection into "months to advance from month M to the
/// next selected month" (index M - 1, values 1..=12).
pub(crate) fn month_steps(months: &[u32]) -> Result<[u32; 12], EngineError> {
    if months.is_empty() {
        return Err(EngineError::BadRule("no month selected".to_string()));
    }
    let mut selected = [false; 12];
    for &month in months {
        check_month(month)?;
        selected[(month - 1) as usize] = true;
    }
    let mut steps = [0u32; 12];
    for (index, step) in steps.iter_mut().enumerate() {
        *step = (1..=12)
            .find(|s| selected[(index + *s as usize) % 12])
            .unwrap_or(12);
    }
    Ok(steps)
}

pub(crate) fn check_month_steps(steps: &[u32; 12]) -> Result<(), EngineError> {
    if steps.iter().any(|s| !(1..=12).contains(s)) {
        return Err(EngineError::BadRule("corrupt month table".to_string()));
    }
    Ok(())
}

fn advance_month((year, month): (i32, u32), steps: u32) -> (i32, u32) {
    let index = month - 1 + steps;
    (year + (index / 12) as i32, index % 12 + 1)
}

/// Selected `(year, month)` pairs from `first`'s month through `last`'s.
pub(crate) fn selected_months(
    steps: [u32; 12],
    first: NaiveDate,
    last: NaiveDate,
) -> impl Iterator<Item = (i32, u32)> {
    // Month M is selected iff the month before it is one step away from it.
    let previous = (first.month() + 10) % 12;
    let here = (first.year(), first.month());
    let start = if steps[previous as usize] == 1 {
        here
    } else {
        advance_month(here, steps[(first.month() - 1) as usize])
    };
    let end = (last.year(), last.month());
    std::iter::successors(Some(start), move |&current| {
        Some(advance_month(current, steps[(current.1 - 1) as usize]))
    })
    .take_while(move |current| *current <= end)
}

/// The calendar dates a search has to visit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DateBounds {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateBounds {
    /// Dates whose occurrences can touch `[mint, maxt]`.
    pub fn for_range(
        mint: i64,
        maxt: i64,
        clock: &WallClock,
        timing: &RelativeTiming,
    ) -> Option<Self> {
        let first = date_of_wall(seed_for(mint, clock, timing))?;
        let last = date_of_wall(
            clock
                .to_wall(maxt)
                .saturating_add(timing.lead())
                .saturating_add(clock.seed_margin()),
        )?;
        Some(Self { first, last })
    }

    /// Dates from the earliest one whose occurrences can reach past
    /// `base_time`, through the lookahead horizon.
    pub fn for_next(
        base_time: i64,
        clock: &WallClock,
        timing: &RelativeTiming,
        horizon_years: u32,
    ) -> Option<Self> {
        let first = date_of_wall(seed_for(base_time, clock, timing))?;
        let last = first
            .checked_add_months(Months::new(horizon_years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MAX);
        Some(Self { first, last })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last;
        self.first.iter_days().take_while(move |d| *d <= last)
    }
}

/// The wall-clock instant from which unrolling must start so that no
/// occurrence reaching `time` with its end or a trailing alarm is missed.
pub(crate) fn seed_for(time: i64, clock: &WallClock, timing: &RelativeTiming) -> i64 {
    clock
        .to_wall(time)
        .saturating_sub(timing.span())
        .saturating_sub(clock.seed_margin())
}

/// `reference + k * interval` for `k` from `first` on, ending where the
/// arithmetic would overflow.
pub(crate) fn stepped(reference: i64, interval: i64, first: i64) -> impl Iterator<Item = i64> {
    (first..).map_while(move |k| {
        k.checked_mul(interval)
            .and_then(|offset| reference.checked_add(offset))
    })
}

pub(crate) fn date_of_wall(wall: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(wall, 0).map(|dt| dt.date_naive())
}

// ── Unrolling drivers ───────────────────────────────────────────────────────

/// Feed ascending wall-clock starts into a range accumulator until both the
/// start and the alarm of a candidate are past `maxt`.
pub(crate) fn unroll_range<I>(
    starts: I,
    maxt: i64,
    clock: &WallClock,
    timing: &RelativeTiming,
    target: ItemRef<'_>,
    occs: &mut OccurrencesRange,
) where
    I: IntoIterator<Item = i64>,
{
    for wall in starts {
        let start = clock.to_absolute(wall);
        let alarm = timing.alarm(start);
        if start > maxt && alarm.map_or(true, |a| a > maxt) {
            break;
        }
        occs.add_safe(target.occurrence(start, timing.end(start), alarm));
    }
}

/// Feed ascending wall-clock starts into a next-occurrence accumulator until
/// a candidate begins after the best time found so far.
///
/// Acceptance alone does not end the search: a later candidate whose alarm
/// leads its start by more than the spacing may still beat it.
pub(crate) fn unroll_next<I>(
    starts: I,
    base_time: i64,
    clock: &WallClock,
    timing: &RelativeTiming,
    target: ItemRef<'_>,
    occs: &mut NextOccurrences,
) where
    I: IntoIterator<Item = i64>,
{
    for wall in starts {
        let start = clock.to_absolute(wall);
        let occ = target.occurrence(start, timing.end(start), timing.alarm(start));
        let earliest = occ.earliest();
        occs.add_safe(base_time, occ);
        if occs
            .get_next_occurrence_time()
            .is_some_and(|next| earliest > next)
        {
            break;
        }
    }
}
