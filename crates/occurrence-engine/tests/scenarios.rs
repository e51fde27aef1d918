//! End-to-end scenarios: rules stored in a store, queried through the
//! timeline facade.

use std::sync::Arc;

use chrono::TimeZone;
use chrono_tz::Europe::London;
use occurrence_engine::rules::{daily, except, once, regularly, synodic};
use occurrence_engine::{
    EngineError, MemoryStore, Occurrence, RelativeTiming, Rule, RuleRegistry, RuleStore,
    StoreSet, TimeOfDay, TimeStandard, Timeline, UtcOffset,
};
use serde_json::{json, Value};

const HOUR: i64 = 3600;
const DAY: i64 = 86400;

fn london(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
    London
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .unwrap()
        .timestamp()
}

fn timeline_with(rules: Vec<Rule>) -> Timeline {
    let store = MemoryStore::new("notes.osl", 0);
    store.update_item_rules(1, &rules).unwrap();
    let stores = Arc::new(StoreSet::new());
    stores.open(Arc::new(store));
    Timeline::new(
        stores,
        Arc::new(RuleRegistry::with_basic_rules()),
        UtcOffset::named("Europe/London").unwrap(),
    )
}

fn sorted(mut list: Vec<Occurrence>) -> Vec<Occurrence> {
    list.sort_by_key(|o| o.start);
    list
}

fn nine_am_daily() -> Rule {
    daily::make_every_day_rule(
        TimeOfDay::new(9, 0).unwrap(),
        RelativeTiming::new(Some(HOUR), Some(900)).unwrap(),
        TimeStandard::Local,
        json!({"note": "opaque"}),
    )
    .unwrap()
}

// ── scenario 1 ──────────────────────────────────────────────────────────────

#[test]
fn test_daily_local_rule_over_three_days() {
    let timeline = timeline_with(vec![nine_am_daily()]);
    let mint = london(2026, 7, 6, 0, 0);
    let occs = timeline
        .get_occurrences_range(mint, mint + 3 * DAY - 1)
        .unwrap();
    let list = sorted(occs.get_list());
    assert_eq!(list.len(), 3);
    for (day, occ) in list.iter().enumerate() {
        let start = london(2026, 7, 6 + day as u32, 9, 0);
        assert_eq!(occ.start, start);
        assert_eq!(occ.end, Some(start + HOUR));
        assert_eq!(occ.alarm.time(), Some(start - 900));
    }
}

// ── scenario 2 ──────────────────────────────────────────────────────────────

#[test]
fn test_fixed_interval_inclusive_boundaries() {
    let t0 = london(2026, 7, 6, 12, 0);
    let rule = regularly::make_single_rule(
        t0,
        HOUR,
        RelativeTiming::new(None, None).unwrap(),
        TimeStandard::Utc,
        Value::Null,
    )
    .unwrap();
    let timeline = timeline_with(vec![rule]);
    let occs = timeline
        .get_occurrences_range(t0 + 7200, t0 + 10800)
        .unwrap();
    let starts: Vec<i64> = sorted(occs.get_list()).iter().map(|o| o.start).collect();
    assert_eq!(starts, vec![t0 + 7200, t0 + 10800]);
    assert!(occs.get_list().iter().all(|o| o.end.is_none() && o.alarm.time().is_none()));
}

// ── scenario 3 ──────────────────────────────────────────────────────────────

#[test]
fn test_exception_removes_exactly_one_daily_occurrence() {
    let excepted = london(2026, 7, 8, 9, 0);
    let exception = except::make_once_rule(
        excepted,
        excepted + HOUR,
        false,
        TimeStandard::Local,
        Value::Null,
    )
    .unwrap();
    let timeline = timeline_with(vec![nine_am_daily(), exception]);
    let mint = london(2026, 7, 6, 0, 0);
    let list = timeline
        .get_occurrences_range(mint, mint + 7 * DAY - 1)
        .unwrap()
        .get_list();
    assert_eq!(list.len(), 6);
    assert!(list.iter().all(|o| o.start != excepted));
}

// ── scenario 4 ──────────────────────────────────────────────────────────────

#[test]
fn test_unset_reference_start_is_rejected() {
    let timing = RelativeTiming::new(Some(HOUR), Some(0)).unwrap();
    let standard = TimeStandard::Local;
    let results = [
        once::make_rule(0, Some(HOUR), None, standard, Value::Null),
        regularly::make_single_rule(0, DAY, timing, standard, Value::Null),
        regularly::make_weekly_rule(&[0], timing, standard, Value::Null),
        synodic::make_rule(0, timing, standard, Value::Null),
        except::make_once_rule(0, HOUR, true, standard, Value::Null),
        except::make_regularly_rule(0, HOUR, DAY, true, standard, Value::Null),
    ];
    for result in results {
        assert!(matches!(result, Err(EngineError::BadRule(_))));
    }
}

// ── DST ─────────────────────────────────────────────────────────────────────

fn regular_daily(standard: TimeStandard, refstart: i64) -> Vec<i64> {
    let rule = regularly::make_single_rule(
        refstart,
        DAY,
        RelativeTiming::default(),
        standard,
        Value::Null,
    )
    .unwrap();
    let timeline = timeline_with(vec![rule]);
    let starts: Vec<i64> = sorted(
        timeline
            .get_occurrences_range(refstart, refstart + 6 * DAY + HOUR)
            .unwrap()
            .get_list(),
    )
    .iter()
    .map(|o| o.start)
    .collect();
    assert_eq!(starts.len(), 7);
    starts
}

fn gaps(starts: &[i64]) -> Vec<i64> {
    starts.windows(2).map(|w| w[1] - w[0]).collect()
}

fn walls(starts: &[i64]) -> Vec<i64> {
    let offset = UtcOffset::named("Europe/London").unwrap();
    starts.iter().map(|s| offset.to_wall(*s)).collect()
}

#[test]
fn test_local_interval_is_even_across_spring_forward() {
    // London moves to BST on 2026-03-29
    let starts = regular_daily(TimeStandard::Local, london(2026, 3, 26, 12, 0));
    assert!(gaps(&starts).iter().all(|g| *g == DAY));

    // the local wall-clock reading moves from 12:00 to 13:00
    let wall = gaps(&walls(&starts));
    assert_eq!(wall.iter().filter(|g| **g == DAY + HOUR).count(), 1);
}

#[test]
fn test_local_interval_is_even_across_fall_back() {
    // London returns to GMT on 2026-10-25
    let starts = regular_daily(TimeStandard::Local, london(2026, 10, 22, 12, 0));
    assert!(gaps(&starts).iter().all(|g| *g == DAY));
}

#[test]
fn test_utc_interval_shifts_by_dst_delta_across_spring_forward() {
    let starts = regular_daily(TimeStandard::Utc, london(2026, 3, 26, 12, 0));
    let absolute = gaps(&starts);
    assert_eq!(absolute.iter().filter(|g| **g == DAY - HOUR).count(), 1);
    assert!(absolute.iter().all(|g| *g == DAY || *g == DAY - HOUR));
    assert!(gaps(&walls(&starts)).iter().all(|g| *g == DAY));
}

#[test]
fn test_utc_interval_shifts_by_dst_delta_across_fall_back() {
    let starts = regular_daily(TimeStandard::Utc, london(2026, 10, 22, 12, 0));
    let absolute = gaps(&starts);
    assert_eq!(absolute.iter().filter(|g| **g == DAY + HOUR).count(), 1);
    assert!(absolute.iter().all(|g| *g == DAY || *g == DAY + HOUR));
}

#[test]
fn test_local_exception_interval_is_even() {
    // daily 12:00 local wall clock, excepted every 24 absolute hours from
    // before the transition: after it the windows start at 13:00 BST
    let refstart = london(2026, 3, 26, 12, 0);
    let occurring = daily::make_every_day_rule(
        TimeOfDay::new(12, 0).unwrap(),
        RelativeTiming::default(),
        TimeStandard::Local,
        Value::Null,
    )
    .unwrap();
    let exception =
        except::make_regularly_rule(refstart, 1800, DAY, false, TimeStandard::Local, Value::Null)
            .unwrap();
    let timeline = timeline_with(vec![occurring, exception]);
    let starts: Vec<i64> = sorted(
        timeline
            .get_occurrences_range(refstart, refstart + 6 * DAY)
            .unwrap()
            .get_list(),
    )
    .iter()
    .map(|o| o.start)
    .collect();
    // 29th to 1st survive, one hour before each window
    assert_eq!(
        starts,
        vec![
            london(2026, 3, 29, 12, 0),
            london(2026, 3, 30, 12, 0),
            london(2026, 3, 31, 12, 0),
            london(2026, 4, 1, 12, 0),
        ]
    );
}

// ── consistency between the two search modes ────────────────────────────────

#[test]
fn test_next_agrees_with_range() {
    let timeline = timeline_with(vec![nine_am_daily()]);
    let base = london(2026, 7, 6, 8, 50);
    let next = timeline.get_next_occurrences(base).unwrap();
    // the alarm at 08:45 has passed, the start at 09:00 has not
    assert_eq!(next.get_next_occurrence_time(), Some(london(2026, 7, 6, 9, 0)));

    let earliest = timeline
        .get_occurrences_range(base, base + DAY)
        .unwrap()
        .get_list()
        .iter()
        .flat_map(|o| o.time_points())
        .flatten()
        .filter(|t| *t > base)
        .min();
    assert_eq!(earliest, next.get_next_occurrence_time());
}

#[test]
fn test_gui_config_is_preserved() {
    let rule = nine_am_daily();
    let store = MemoryStore::new("notes.osl", 0);
    store.update_item_rules(4, &[rule.clone()]).unwrap();
    let back = store.get_item_rules(4).unwrap();
    assert_eq!(back, vec![rule]);
    let params = back[0].params.as_array().unwrap();
    assert_eq!(params.last(), Some(&json!({"note": "opaque"})));
}
