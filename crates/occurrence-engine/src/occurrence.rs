//! Concrete occurrences and the alarm side-table rows merged with them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Identifies an open store (the database file an item lives in).
pub type StoreId = String;

/// Identifies an item within its store.
pub type ItemId = i64;

// ── Alarm ───────────────────────────────────────────────────────────────────

/// The alarm attached to an occurrence.
///
/// Serialized as `null`, `false` or an integer timestamp, in that order of
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Alarm {
    /// The occurrence has no alarm.
    #[default]
    Unset,
    /// The alarm already fired and is ringing (not snoozed, not dismissed).
    Active,
    /// The alarm is scheduled for this timestamp.
    At(i64),
}

impl Alarm {
    /// The scheduled time, if any.
    pub fn time(&self) -> Option<i64> {
        match self {
            Alarm::At(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<Option<i64>> for Alarm {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Alarm::Unset, Alarm::At)
    }
}

impl Serialize for Alarm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Alarm::Unset => serializer.serialize_none(),
            Alarm::Active => serializer.serialize_bool(false),
            Alarm::At(t) => serializer.serialize_i64(*t),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AlarmRepr {
    Time(i64),
    Flag(bool),
}

impl<'de> Deserialize<'de> for Alarm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<AlarmRepr>::deserialize(deserializer)? {
            None => Ok(Alarm::Unset),
            Some(AlarmRepr::Flag(false)) => Ok(Alarm::Active),
            Some(AlarmRepr::Flag(true)) => Err(serde::de::Error::custom(
                "alarm must be null, false or a timestamp",
            )),
            Some(AlarmRepr::Time(t)) => Ok(Alarm::At(t)),
        }
    }
}

// ── Occurrence ──────────────────────────────────────────────────────────────

/// One concrete instance produced by expanding a rule. All times are Unix
/// timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    pub store: StoreId,
    pub item: ItemId,
    pub start: i64,
    pub end: Option<i64>,
    pub alarm: Alarm,
}

impl Occurrence {
    pub fn new(
        store: impl Into<StoreId>,
        item: ItemId,
        start: i64,
        end: Option<i64>,
        alarm: Alarm,
    ) -> Self {
        Self {
            store: store.into(),
            item,
            start,
            end,
            alarm,
        }
    }

    /// Check the invariants generators guarantee by construction.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.start == 0 {
            return Err(EngineError::BadOccurrence(format!(
                "item {} in '{}' has no start",
                self.item, self.store
            )));
        }
        if let Some(end) = self.end {
            if end <= self.start {
                return Err(EngineError::BadOccurrence(format!(
                    "item {} in '{}' ends at {} which is not after its start {}",
                    self.item, self.store, end, self.start
                )));
            }
        }
        Ok(())
    }

    /// Same item and same times, alarm ignored.
    pub fn same_slot(&self, other: &Occurrence) -> bool {
        self.item == other.item
            && self.store == other.store
            && self.start == other.start
            && self.end == other.end
    }

    /// The earlier of start and scheduled alarm.
    pub fn earliest(&self) -> i64 {
        self.alarm.time().map_or(self.start, |a| a.min(self.start))
    }

    /// The instant after which nothing about this occurrence changes any more.
    pub fn completion_time(&self) -> i64 {
        [Some(self.start), self.end, self.alarm.time()]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.start)
    }

    /// `(alarm, start, end)` sorted ascending, missing values first.
    pub fn time_points(&self) -> [Option<i64>; 3] {
        let mut points = [self.alarm.time(), Some(self.start), self.end];
        points.sort();
        points
    }
}

/// The item a generator is producing occurrences for.
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    pub store: &'a str,
    pub item: ItemId,
}

impl<'a> ItemRef<'a> {
    pub fn new(store: &'a str, item: ItemId) -> Self {
        Self { store, item }
    }

    pub fn occurrence(&self, start: i64, end: Option<i64>, alarm: Option<i64>) -> Occurrence {
        Occurrence::new(self.store, self.item, start, end, alarm.into())
    }
}

// ── Alarm side table ────────────────────────────────────────────────────────

/// A persisted alarm instance: an occurrence whose alarm has been activated,
/// and possibly snoozed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRow {
    pub id: i64,
    pub item: ItemId,
    pub start: i64,
    pub end: Option<i64>,
    /// The alarm time the occurrence was generated with.
    pub alarm: Option<i64>,
    /// Snoozed until this time; `None` while the alarm is ringing.
    pub snooze: Option<i64>,
}

impl AlarmRow {
    /// The occurrence this row stands for, and the alarm it was originally
    /// generated with.
    pub fn to_occurrence(&self, store: &str) -> (Occurrence, Alarm) {
        let alarm = match self.snooze {
            Some(t) => Alarm::At(t),
            None => Alarm::Active,
        };
        (
            Occurrence::new(store, self.item, self.start, self.end, alarm),
            self.alarm.into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_serializes_tri_state() {
        assert_eq!(serde_json::to_string(&Alarm::Unset).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Alarm::Active).unwrap(), "false");
        assert_eq!(serde_json::to_string(&Alarm::At(42)).unwrap(), "42");
    }

    #[test]
    fn test_alarm_deserializes_tri_state() {
        assert_eq!(serde_json::from_str::<Alarm>("null").unwrap(), Alarm::Unset);
        assert_eq!(serde_json::from_str::<Alarm>("false").unwrap(), Alarm::Active);
        assert_eq!(serde_json::from_str::<Alarm>("42").unwrap(), Alarm::At(42));
        assert!(serde_json::from_str::<Alarm>("true").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_start() {
        let occ = Occurrence::new("a", 1, 0, None, Alarm::Unset);
        assert!(matches!(occ.validate(), Err(EngineError::BadOccurrence(_))));
    }

    #[test]
    fn test_validate_rejects_end_not_after_start() {
        let occ = Occurrence::new("a", 1, 100, Some(100), Alarm::Unset);
        assert!(occ.validate().is_err());
        let occ = Occurrence::new("a", 1, 100, Some(101), Alarm::Unset);
        assert!(occ.validate().is_ok());
    }

    #[test]
    fn test_time_points_sort_missing_first() {
        let occ = Occurrence::new("a", 1, 100, None, Alarm::At(200));
        assert_eq!(occ.time_points(), [None, Some(100), Some(200)]);
    }

    #[test]
    fn test_completion_and_earliest() {
        let occ = Occurrence::new("a", 1, 100, Some(160), Alarm::At(40));
        assert_eq!(occ.completion_time(), 160);
        assert_eq!(occ.earliest(), 40);
    }

    #[test]
    fn test_alarm_row_ringing_and_snoozed() {
        let mut row = AlarmRow {
            id: 1,
            item: 7,
            start: 1000,
            end: None,
            alarm: Some(900),
            snooze: None,
        };
        let (occ, orig) = row.to_occurrence("s");
        assert_eq!(occ.alarm, Alarm::Active);
        assert_eq!(orig, Alarm::At(900));

        row.snooze = Some(1200);
        let (occ, _) = row.to_occurrence("s");
        assert_eq!(occ.alarm, Alarm::At(1200));
    }
}
