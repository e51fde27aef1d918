//! Consumer-facing queries over the open stores.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::Occurrence;
use crate::range::OccurrencesRange;
use crate::registry::RuleRegistry;
use crate::search::{NextOccurrencesSearch, OccurrencesRangeSearch};
use crate::store::StoreSet;
use crate::utc_offset::UtcOffset;

/// Length of the window covered by [`Timeline::get_daily_occurrences`].
pub const DAY_SECONDS: i64 = 86400;

/// Shared handles to the stores, the rule handlers and the local clock.
#[derive(Clone)]
pub struct Timeline {
    stores: Arc<StoreSet>,
    registry: Arc<RuleRegistry>,
    utc_offset: UtcOffset,
    max_researches: u32,
}

impl Timeline {
    pub fn new(stores: Arc<StoreSet>, registry: Arc<RuleRegistry>, utc_offset: UtcOffset) -> Self {
        Self {
            stores,
            registry,
            utc_offset,
            max_researches: EngineConfig::default().max_researches,
        }
    }

    pub fn from_config(
        stores: Arc<StoreSet>,
        registry: Arc<RuleRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            max_researches: config.max_researches,
            ..Self::new(stores, registry, config.utc_offset())
        }
    }

    pub fn stores(&self) -> &Arc<StoreSet> {
        &self.stores
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn utc_offset(&self) -> UtcOffset {
        self.utc_offset
    }

    pub fn max_researches(&self) -> u32 {
        self.max_researches
    }

    /// Every occurrence touching `[mint, maxt]` in the open stores.
    pub fn get_occurrences_range(
        &self,
        mint: i64,
        maxt: i64,
    ) -> Result<OccurrencesRange, EngineError> {
        self.range_search(mint, maxt).start()
    }

    /// A range search over the open stores, not yet started.
    pub fn range_search(&self, mint: i64, maxt: i64) -> OccurrencesRangeSearch<'_> {
        OccurrencesRangeSearch::new(
            mint,
            maxt,
            self.stores.snapshot(),
            &self.registry,
            self.utc_offset,
        )
    }

    /// The soonest time point after `base_time` in the open stores.
    pub fn get_next_occurrences(&self, base_time: i64) -> Result<NextOccurrences, EngineError> {
        self.next_search(base_time).start()
    }

    /// A next-occurrence search over the open stores, not yet started.
    pub fn next_search(&self, base_time: i64) -> NextOccurrencesSearch<'_> {
        NextOccurrencesSearch::new(
            base_time,
            self.stores.snapshot(),
            &self.registry,
            self.utc_offset,
        )
        .with_max_researches(self.max_researches)
    }

    /// The occurrences of the day starting at `day_start`, sorted by start.
    pub fn get_daily_occurrences(&self, day_start: i64) -> Result<Vec<Occurrence>, EngineError> {
        let mut list = self
            .get_occurrences_range(day_start, day_start + DAY_SECONDS - 1)?
            .get_list();
        list.sort_by_key(|o| (o.start, o.store.clone(), o.item));
        Ok(list)
    }
}
