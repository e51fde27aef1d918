//! Rule-kind → handler dispatch.
//!
//! A [`RuleRegistry`] is built once at startup (usually with
//! [`RuleRegistry::with_basic_rules`]), optionally extended with further
//! handlers, and then shared read-only by every search.

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::next::NextOccurrences;
use crate::occurrence::ItemRef;
use crate::range::OccurrencesRange;
use crate::rule::Rule;
use crate::utc_offset::UtcOffset;

/// Unrolls the rules of one kind into an accumulator.
pub trait RuleHandler: Send + Sync {
    /// Feed every occurrence touching `[mint, maxt]` into `occs`.
    fn get_occurrences_range(
        &self,
        mint: i64,
        maxt: i64,
        utc_offset: &UtcOffset,
        target: ItemRef<'_>,
        rule: &Rule,
        occs: &mut OccurrencesRange,
    ) -> Result<(), EngineError>;

    /// Feed the occurrences that may hold the next time point after
    /// `base_time` into `occs`.
    fn get_next_item_occurrences(
        &self,
        base_time: i64,
        utc_offset: &UtcOffset,
        target: ItemRef<'_>,
        rule: &Rule,
        occs: &mut NextOccurrences,
    ) -> Result<(), EngineError>;
}

#[derive(Default)]
pub struct RuleRegistry {
    handlers: BTreeMap<String, Box<dyn RuleHandler>>,
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in rule family in both standards.
    pub fn with_basic_rules() -> Self {
        let mut registry = Self::new();
        crate::rules::install_basic_rules(&mut registry);
        registry
    }

    /// Register `handler` for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConflictingRuleHandler`] if `kind` already has
    /// a handler.
    pub fn install_rule_handler(
        &mut self,
        kind: impl Into<String>,
        handler: Box<dyn RuleHandler>,
    ) -> Result<(), EngineError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(EngineError::ConflictingRuleHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn handler(&self, kind: &str) -> Result<&dyn RuleHandler, EngineError> {
        self.handlers
            .get(kind)
            .map(|h| &**h)
            .ok_or_else(|| EngineError::UnknownRule(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
