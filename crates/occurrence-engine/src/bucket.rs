//! `store → item → occurrences` maps shared by the accumulators.
//!
//! Invariants: an item's list never holds the same occurrence twice, and no
//! empty item list or store map is ever retained.

use std::collections::BTreeMap;

use crate::occurrence::{ItemId, Occurrence, StoreId};

pub type OccurrenceMap = BTreeMap<StoreId, BTreeMap<ItemId, Vec<Occurrence>>>;

/// Insert unless already present. Returns whether it was inserted.
pub(crate) fn insert_unique(map: &mut OccurrenceMap, occ: Occurrence) -> bool {
    let list = map
        .entry(occ.store.clone())
        .or_default()
        .entry(occ.item)
        .or_default();
    if list.contains(&occ) {
        return false;
    }
    list.push(occ);
    true
}

/// Remove every occurrence of one item matching `pred`, pruning emptied
/// containers. Returns how many were removed.
pub(crate) fn remove_where<F>(map: &mut OccurrenceMap, store: &str, item: ItemId, pred: F) -> usize
where
    F: Fn(&Occurrence) -> bool,
{
    let Some(items) = map.get_mut(store) else {
        return 0;
    };
    let Some(list) = items.get_mut(&item) else {
        return 0;
    };
    let before = list.len();
    list.retain(|o| !pred(o));
    let removed = before - list.len();
    prune(map, store, item);
    removed
}

/// Remove the first occurrence of one item matching `pred`.
pub(crate) fn take_first<F>(
    map: &mut OccurrenceMap,
    store: &str,
    item: ItemId,
    pred: F,
) -> Option<Occurrence>
where
    F: Fn(&Occurrence) -> bool,
{
    let list = map.get_mut(store)?.get_mut(&item)?;
    let index = list.iter().position(pred)?;
    let occ = list.remove(index);
    prune(map, store, item);
    Some(occ)
}

fn prune(map: &mut OccurrenceMap, store: &str, item: ItemId) {
    if let Some(items) = map.get_mut(store) {
        if items.get(&item).is_some_and(|list| list.is_empty()) {
            items.remove(&item);
        }
        if items.is_empty() {
            map.remove(store);
        }
    }
}

pub(crate) fn iter(map: &OccurrenceMap) -> impl Iterator<Item = &Occurrence> {
    map.values().flat_map(|items| items.values().flatten())
}

/// Earliest start and latest end (or start) among one item's occurrences.
pub(crate) fn item_time_span(map: &OccurrenceMap, store: &str, item: ItemId) -> Option<(i64, i64)> {
    map.get(store)?.get(&item)?.iter().fold(None, |span, o| {
        let last = o.end.unwrap_or(o.start);
        Some(match span {
            None => (o.start, last),
            Some((min, max)) => (min.min(o.start), max.max(last)),
        })
    })
}

/// The rule shared by both accumulators' `except_safe`: an occurrence is
/// excepted when it starts inside `[start, end]`, or, for inclusive
/// exceptions, when it is in progress at `start`.
pub(crate) fn is_excepted(occ: &Occurrence, start: i64, end: i64, inclusive: bool) -> bool {
    (start <= occ.start && occ.start <= end)
        || (inclusive && occ.start < start && occ.end.is_some_and(|e| start < e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::Alarm;

    fn occ(item: ItemId, start: i64) -> Occurrence {
        Occurrence::new("s", item, start, None, Alarm::Unset)
    }

    #[test]
    fn test_insert_unique_rejects_duplicates() {
        let mut map = OccurrenceMap::new();
        assert!(insert_unique(&mut map, occ(1, 10)));
        assert!(!insert_unique(&mut map, occ(1, 10)));
        assert!(insert_unique(&mut map, occ(1, 20)));
        assert_eq!(iter(&map).count(), 2);
    }

    #[test]
    fn test_remove_prunes_empty_containers() {
        let mut map = OccurrenceMap::new();
        insert_unique(&mut map, occ(1, 10));
        insert_unique(&mut map, occ(2, 10));
        assert_eq!(remove_where(&mut map, "s", 1, |_| true), 1);
        assert!(!map["s"].contains_key(&1));
        assert!(take_first(&mut map, "s", 2, |o| o.start == 10).is_some());
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_from_missing_item_is_noop() {
        let mut map = OccurrenceMap::new();
        assert_eq!(remove_where(&mut map, "nope", 1, |_| true), 0);
        assert!(take_first(&mut map, "nope", 1, |_| true).is_none());
    }

    #[test]
    fn test_is_excepted_inclusive_straddle() {
        let o = Occurrence::new("s", 1, 100, Some(200), Alarm::Unset);
        assert!(!is_excepted(&o, 150, 300, false));
        assert!(is_excepted(&o, 150, 300, true));
        assert!(is_excepted(&o, 100, 100, false));
        assert!(!is_excepted(&o, 200, 300, true));
    }
}
