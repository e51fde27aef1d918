//! `occur_every_synodic_month`: lunar-cycle repetition.
//!
//! Parameters: `[refstart, rend, ralarm, span, gui_config]`. The k-th
//! occurrence starts at `refstart + round(k * SYNODIC_MONTH)`, counted in
//! absolute seconds for `local` rules and on the local wall clock for `UTC`
//! rules.

use serde_json::Value;

use super::{check_reference, seed_for, unroll_next, unroll_range, Family, RelativeTiming};
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::utc_offset::WallClock;

/// Mean synodic month, in seconds (29.530588853 days).
pub const SYNODIC_MONTH: f64 = 29.530_588_853 * 86400.0;

type Params = (i64, Option<i64>, Option<i64>, i64, Value);

pub fn make_rule(
    refstart: i64,
    timing: RelativeTiming,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_reference("refstart", refstart)?;
    let mut params = vec![refstart.into()];
    params.extend(timing.to_params());
    params.push(gui_config);
    Ok(Rule::new(Family::OccurEverySynodicMonth.kind(standard), params))
}

fn decode(rule: &Rule) -> Result<(i64, RelativeTiming), EngineError> {
    let (refstart, rend, ralarm, _span, _): Params = rule.decode()?;
    Ok((refstart, RelativeTiming::new(rend, ralarm)?))
}

fn starts(refstart: i64, seed: i64, clock: &WallClock) -> impl Iterator<Item = i64> {
    let reference = clock.to_wall(refstart);
    // One cycle early so that rounding never skips the first candidate.
    let first = (seed.saturating_sub(reference) as f64 / SYNODIC_MONTH).floor() as i64 - 1;
    (first..).map_while(move |k| {
        reference.checked_add((k as f64 * SYNODIC_MONTH).round() as i64)
    })
}

pub(crate) fn get_occurrences_range(
    mint: i64,
    maxt: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    let (refstart, timing) = decode(rule)?;
    let seed = seed_for(mint, clock, &timing);
    unroll_range(starts(refstart, seed, clock), maxt, clock, &timing, target, occs);
    Ok(())
}

pub(crate) fn get_next_item_occurrences(
    base_time: i64,
    clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    let (refstart, timing) = decode(rule)?;
    let seed = seed_for(base_time, clock, &timing);
    unroll_next(starts(refstart, seed, clock), base_time, clock, &timing, target, occs);
    Ok(())
}
