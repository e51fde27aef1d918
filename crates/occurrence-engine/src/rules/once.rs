//! `occur_once`: a single occurrence at fixed absolute times.
//!
//! Parameters: `[start, end, alarm, gui_config]`.
//!
//! The times are instants, not wall-clock readings, so `occur_once_local`
//! and `occur_once_UTC` produce the same occurrence. The standard is kept in
//! the kind name for the interface that edits the rule.

use serde_json::Value;

use super::check_reference;
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::{Rule, TimeStandard};
use crate::rules::Family;
use crate::utc_offset::WallClock;

type Params = (i64, Option<i64>, Option<i64>, Value);

pub fn make_rule(
    start: i64,
    end: Option<i64>,
    alarm: Option<i64>,
    standard: TimeStandard,
    gui_config: Value,
) -> Result<Rule, EngineError> {
    check_reference("start", start)?;
    if let Some(end) = end {
        if end <= start {
            return Err(EngineError::BadRule(format!(
                "end {} is not after start {}",
                end, start
            )));
        }
    }
    Ok(Rule::new(
        Family::OccurOnce.kind(standard),
        vec![start.into(), end.into(), alarm.into(), gui_config],
    ))
}

pub(crate) fn get_occurrences_range(
    _mint: i64,
    _maxt: i64,
    _clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut OccurrencesRange,
) -> Result<(), EngineError> {
    let (start, end, alarm, _): Params = rule.decode()?;
    occs.add_safe(target.occurrence(start, end, alarm));
    Ok(())
}

pub(crate) fn get_next_item_occurrences(
    base_time: i64,
    _clock: &WallClock,
    target: ItemRef<'_>,
    rule: &Rule,
    occs: &mut NextOccurrences,
) -> Result<(), EngineError> {
    let (start, end, alarm, _): Params = rule.decode()?;
    occs.add_safe(base_time, target.occurrence(start, end, alarm));
    Ok(())
}
