//! # occurrence-engine
//!
//! Recurrence-rule occurrence engine for the Outspline organizer.
//!
//! Items carry ordered lists of declarative rules ("every day at 09:00",
//! "the second-to-last Friday of March", "every 90 minutes from T"). The
//! engine unrolls them into concrete occurrences (start, optional end,
//! optional alarm) for a time window, finds the soonest upcoming time point
//! across every open store, and drives a timer that hands due occurrences to
//! an alarm consumer.
//!
//! ## Modules
//!
//! - [`utc_offset`] — UTC offset (DST included) at any timestamp; local vs UTC wall clocks
//! - [`rule`] — Rule representation and its JSON string encoding
//! - [`rules`] — Built-in rule families: encoders and occurrence generators
//! - [`occurrence`] — Occurrences, the tri-state alarm and alarm side-table rows
//! - [`range`] — `OccurrencesRange`, the accumulator for window queries
//! - [`next`] — `NextOccurrences`, the accumulator for "what fires next"
//! - [`registry`] — Rule-kind → handler dispatch
//! - [`store`] — Item-rule storage collaborators and the open-store set
//! - [`search`] — Range and next-occurrence search orchestrators
//! - [`timeline`] — Consumer-facing query API
//! - [`engine`] — The scheduling engine
//! - [`config`] — Environment-driven configuration
//! - [`error`] — Error types

mod bucket;

pub mod config;
pub mod engine;
pub mod error;
pub mod next;
pub mod occurrence;
pub mod range;
pub mod registry;
pub mod rule;
pub mod rules;
pub mod search;
pub mod store;
pub mod timeline;
pub mod utc_offset;

pub use bucket::OccurrenceMap;
pub use config::EngineConfig;
pub use engine::{AlarmSink, Clock, EngineState, NextOccurrencesEngine, SystemClock};
pub use error::{EngineError, Result};
pub use next::NextOccurrences;
pub use occurrence::{Alarm, AlarmRow, ItemId, ItemRef, Occurrence, StoreId};
pub use range::OccurrencesRange;
pub use registry::{RuleHandler, RuleRegistry};
pub use rule::{rules_to_string, string_to_rules, Rule, TimeStandard};
pub use rules::{Family, RelativeTiming, TimeOfDay};
pub use search::{NextOccurrencesSearch, OccurrencesRangeSearch, StopHandle};
pub use store::{MemoryStore, RuleStore, StoreSet};
pub use timeline::Timeline;
pub use utc_offset::{UtcOffset, WallClock};
