//! Fixed-interval families.
//!
//! - `occur_regularly_single`: `[refstart, interval, rend, ralarm, span, gui_config]`
//! - `occur_regularly_group`: `[refstarts, interval, rend, ralarm, span, gui_config]`
//!
//! A group repeats several reference starts with a common interval, e.g.
//! selected days of the week with `interval` one week. Reference starts are
//! normalised into `[min, min + interval)`, sorted and deduplicated when
//! encoding.
//!
//! `local` rules step in absolute seconds, so consecutive occurrences are
//! exactly `interval` apart. `UTC` rules step on the local wall clock and
//! convert each occurrence with the offset in effect at it, so the gap
//! across a DST transition differs from `interval` by the DST delta.

use serde_json::Value;

use super::{
    check_interval, check_reference, seed_for, stepped, unroll_next, unroll_range, Family,
    RelativeTiming,
};
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::WallClock;

pub const WEEK: i64 = 7 * 86400;

type SingleParams = (i64, i64, Option<i64>, Option<i64>, i64, Value);
type GroupParams = (Vec<i64>, i64, Option<i64>, Option<i64>, i64, Value);

pub fn make_single_rule(
    refstart: i64,
    interval: i64,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_reference("refstart", refstart)?;
    check_interval(interval)?;
    let mut params = vec![refstart.into(), interval.into()];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurRegularlySingle.kind(standard), params))
}

pub fn make_group_rule(
    refstarts: &[i64],
    interval: i64,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_interval(interval)?;
    for &refstart in refstarts {
        check_reference("refstart", refstart)?;
    }
    let Some(&first) = refstarts.iter().min() else {
        return Err(EngineError::BadRule("no reference start".to_string()));
    };
    let mut normalised: Vec<i64> = refstarts
        .iter()
        .map(|r| first + (r - first).rem_euclid(interval))
        .collect();
    normalised.sort_unstable();
    normalised.dedup();

    let refs = Value::Array(normalised.into_iter().map(Value::from).collect());
    let mut params = vec![refs, interval.into()];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurRegularlyGroup.kind(standard), params))
}

/// A group repeating every week.
pub fn make_weekly_rule(
    refstarts: &[i64],
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    make_group_rule(refstarts, WEEK, timing, standard, gui_config)
}

// ── single ──────────────────────────────────────────────────────────────────

fn decode_single(rule: &Rule) -> Result<(i64, i64, RelativeTiming), EngineError> {
    let (refstart, interval, rend, ralarm, _span, _): SingleParams = rule.decode()?;
    check_interval(interval)?;
    Ok((refstart, interval, RelativeTiming::new(rend, ralarm)?))
}

fn single_starts(
    refstart: i64,
    interval: i64,
    seed: i64,
    clock: &WallClock,
) -> impl Iterator<Item = i64> {
    let reference = clock.to_wall(refstart);
    let first = seed.saturating_sub(reference).div_euclid(interval);
    stepped(reference, interval, first)
}

pub(crate) fn single_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    let (refstart, interval, timing) = decode_single(rule)?;
    let seed = seed_for(mint, clock, &timing);
    let starts = single_starts(refstart, interval, seed, clock);
    unroll_range(starts, maxt, clock, &timing, target, occs);
    Ok(())
}

pub(crate) fn single_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    let (refstart, interval, timing) = decode_single(rule)?;
    let seed = seed_for(base_time, clock, &timing);
    let starts = single_starts(refstart, interval, seed, clock);
    unroll_next(starts, base_time, clock, &timing, target, occs);
    Ok(())
}

// ── group ───────────────────────────────────────────────────────────────────

struct Group {
    base: i64,
    offsets: Vec<i64>,
    interval: i64,
    timing: RelativeTiming,
}

impl Group {
    fn decode(rule: &Rule, clock: &WallClock) -> Result<Self, EngineError> {
        let (refstarts, interval, rend, ralarm, _span, _): GroupParams = rule.decode()?;
        check_interval(interval)?;
        // Offsets are taken on the rule's clock so that every member keeps
        // its wall-clock time across offset changes.
        let walls: Vec<i64> = refstarts.iter().map(|r| clock.to_wall(*r)).collect();
        let Some(&base) = walls.iter().min() else {
            return Err(EngineError::BadRule(format!(
                "{}: no reference start",
                rule.kind
            )));
        };
        let mut offsets: Vec<i64> = walls
            .iter()
            .map(|w| (w - base).rem_euclid(interval))
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        Ok(Self {
            base,
            offsets,
            interval,
            timing: RelativeTiming::new(rend, ralarm)?,
        })
    }

    fn starts(&self, seed: i64) -> impl Iterator<Item = i64> + '_ {
        let first = seed.saturating_sub(self.base).div_euclid(self.interval);
        stepped(self.base, self.interval, first).flat_map(move |period| {
            self.offsets
                .iter()
                .map_while(move |o| period.checked_add(*o))
        })
    }
}

pub(crate) fn group_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    let group = Group::decode(rule, clock)?;
    let seed = seed_for(mint, clock, &group.timing);
    unroll_range(group.starts(seed), maxt, clock, &group.timing, target, occs);
    Ok(())
}

pub(crate) fn group_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    let group = Group::decode(rule, clock)?;
    let seed = seed_for(base_time, clock, &group.timing);
    unroll_next(group.starts(seed), base_time, clock, &group.timing, target, occs);
    Ok(())
}
