//! Item-rule storage collaborators.
//!
//! A [`RuleStore`] is one open database: items with their ordered rule
//! lists, the alarm side table and the last-search watermark. A
//! [`StoreSet`] holds the stores currently open together with the coarse
//! lock serializing read-modify-write sequences across all of them.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::error::EngineError;
use crate::occurrence::{AlarmRow, ItemId, StoreId};
use crate::rule::{rules_to_string, string_to_rules, Rule};

pub trait RuleStore: Send + Sync {
    fn store_id(&self) -> &str;

    /// Items holding at least one rule, in ascending id order.
    fn items_with_rules(&self) -> Result<Vec<ItemId>, EngineError>;

    fn get_item_rules(&self, item: ItemId) -> Result<Vec<Rule>, EngineError>;

    fn update_item_rules(&self, item: ItemId, rules: &[Rule]) -> Result<(), EngineError>;

    fn item_exists(&self, item: ItemId) -> bool;

    fn alarm_rows(&self) -> Result<Vec<AlarmRow>, EngineError>;

    /// The time up to which occurrences have already been handed out.
    fn last_search(&self) -> Result<i64, EngineError>;

    fn set_last_search(&self, time: i64) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    items: BTreeMap<ItemId, String>,
    alarms: Vec<AlarmRow>,
    last_search: i64,
}

/// A [`RuleStore`] kept in memory. Rules are held in their serialized form,
/// so every read decodes them afresh like a database-backed store would.
#[derive(Debug)]
pub struct MemoryStore {
    id: StoreId,
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new(id: impl Into<StoreId>, last_search: i64) -> Self {
        Self {
            id: id.into(),
            inner: RwLock::new(MemoryInner {
                last_search,
                ..MemoryInner::default()
            }),
        }
    }

    /// Build a store from `{ "<item-id>": [<rule>, ...] }`.
    pub fn from_json(
        id: impl Into<StoreId>,
        json: &str,
        last_search: i64,
    ) -> Result<Self, EngineError> {
        let items: BTreeMap<ItemId, Vec<Rule>> = serde_json::from_str(json)?;
        let store = Self::new(id, last_search);
        for (item, rules) in items {
            store.update_item_rules(item, &rules)?;
        }
        Ok(store)
    }

    pub fn delete_item(&self, item: ItemId) -> bool {
        let mut inner = self.inner.write();
        inner.alarms.retain(|a| a.item != item);
        inner.items.remove(&item).is_some()
    }

    pub fn insert_alarm(&self, row: AlarmRow) {
        self.inner.write().alarms.push(row);
    }

    pub fn remove_alarm(&self, id: i64) -> bool {
        let mut inner = self.inner.write();
        let before = inner.alarms.len();
        inner.alarms.retain(|a| a.id != id);
        inner.alarms.len() != before
    }

    /// Set a row's snooze time; `None` makes it ring.
    pub fn snooze_alarm(&self, id: i64, until: Option<i64>) -> bool {
        let mut inner = self.inner.write();
        match inner.alarms.iter_mut().find(|a| a.id == id) {
            Some(row) => {
                row.snooze = until;
                true
            }
            None => false,
        }
    }
}

impl RuleStore for MemoryStore {
    fn store_id(&self) -> &str {
        &self.id
    }

    fn items_with_rules(&self) -> Result<Vec<ItemId>, EngineError> {
        Ok(self
            .inner
            .read()
            .items
            .iter()
            .filter(|(_, rules)| !rules.is_empty() && rules.as_str() != "[]")
            .map(|(item, _)| *item)
            .collect())
    }

    fn get_item_rules(&self, item: ItemId) -> Result<Vec<Rule>, EngineError> {
        let inner = self.inner.read();
        let Some(raw) = inner.items.get(&item) else {
            return Err(EngineError::Store(format!(
                "item {} not found in '{}'",
                item, self.id
            )));
        };
        string_to_rules(raw)
    }

    fn update_item_rules(&self, item: ItemId, rules: &[Rule]) -> Result<(), EngineError> {
        let raw = rules_to_string(rules)?;
        self.inner.write().items.insert(item, raw);
        Ok(())
    }

    fn item_exists(&self, item: ItemId) -> bool {
        self.inner.read().items.contains_key(&item)
    }

    fn alarm_rows(&self) -> Result<Vec<AlarmRow>, EngineError> {
        Ok(self.inner.read().alarms.clone())
    }

    fn last_search(&self) -> Result<i64, EngineError> {
        Ok(self.inner.read().last_search)
    }

    fn set_last_search(&self, time: i64) -> Result<(), EngineError> {
        self.inner.write().last_search = time;
        Ok(())
    }
}

/// The stores currently open.
#[derive(Default)]
pub struct StoreSet {
    stores: RwLock<BTreeMap<StoreId, Arc<dyn RuleStore>>>,
    lock: Mutex<()>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open store, replacing any store with the same id.
    pub fn open(&self, store: Arc<dyn RuleStore>) {
        let id = store.store_id().to_string();
        debug!(store = %id, "store opened");
        self.stores.write().insert(id, store);
    }

    pub fn close(&self, id: &str) -> Option<Arc<dyn RuleStore>> {
        let closed = self.stores.write().remove(id);
        if closed.is_some() {
            debug!(store = %id, "store closed");
        }
        closed
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RuleStore>> {
        self.stores.read().get(id).cloned()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.stores.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<StoreId> {
        self.stores.read().keys().cloned().collect()
    }

    /// The open stores at this instant. Later opens and closes do not
    /// affect the returned list.
    pub fn snapshot(&self) -> Vec<Arc<dyn RuleStore>> {
        self.stores.read().values().cloned().collect()
    }

    /// Block mutation of every store until the guard is dropped.
    pub fn block_databases(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::once;
    use crate::rule::TimeStandard;
    use serde_json::Value;

    fn rule() -> Rule {
        once::make_rule(1_780_000_000, None, None, TimeStandard::Utc, Value::Null).unwrap()
    }

    #[test]
    fn test_rules_round_trip_through_store() {
        let store = MemoryStore::new("a", 0);
        store.update_item_rules(3, &[rule()]).unwrap();
        store.update_item_rules(1, &[]).unwrap();
        assert_eq!(store.get_item_rules(3).unwrap(), vec![rule()]);
        assert_eq!(store.items_with_rules().unwrap(), vec![3]);
        assert!(store.item_exists(1));
        assert!(store.get_item_rules(9).is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r##"{"7": [{"rule": "occur_once_UTC", "#": [1780000000, null, null, null]}]}"##;
        let store = MemoryStore::from_json("a", json, 0).unwrap();
        assert_eq!(store.get_item_rules(7).unwrap(), vec![rule()]);
        assert!(MemoryStore::from_json("a", "[1]", 0).is_err());
    }

    #[test]
    fn test_delete_item_drops_its_alarms() {
        let store = MemoryStore::new("a", 0);
        store.update_item_rules(1, &[rule()]).unwrap();
        store.insert_alarm(AlarmRow {
            id: 1,
            item: 1,
            start: 10,
            end: None,
            alarm: Some(5),
            snooze: None,
        });
        assert!(store.delete_item(1));
        assert!(store.alarm_rows().unwrap().is_empty());
        assert!(!store.item_exists(1));
    }

    #[test]
    fn test_snooze_alarm() {
        let store = MemoryStore::new("a", 0);
        store.insert_alarm(AlarmRow {
            id: 4,
            item: 1,
            start: 10,
            end: None,
            alarm: Some(5),
            snooze: None,
        });
        assert!(store.snooze_alarm(4, Some(20)));
        assert_eq!(store.alarm_rows().unwrap()[0].snooze, Some(20));
        assert!(!store.snooze_alarm(5, None));
        assert!(store.remove_alarm(4));
    }

    #[test]
    fn test_store_set_open_close() {
        let set = StoreSet::new();
        set.open(Arc::new(MemoryStore::new("b", 0)));
        set.open(Arc::new(MemoryStore::new("a", 0)));
        assert_eq!(set.ids(), vec!["a".to_string(), "b".to_string()]);
        let snapshot = set.snapshot();
        assert!(set.close("a").is_some());
        assert!(set.close("a").is_none());
        assert!(!set.is_open("a"));
        assert_eq!(snapshot.len(), 2);
    }
}
