//! Error types for occurrence-engine operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Bad rule: {0}")]
    BadRule(String),

    #[error("Bad occurrence: {0}")]
    BadOccurrence(String),

    #[error("Bad except rule: {0}")]
    BadExceptRule(String),

    #[error("Conflicting rule handler: {0}")]
    ConflictingRuleHandler(String),

    #[error("Unknown rule kind: {0}")]
    UnknownRule(String),

    #[error("Search stopped")]
    SearchStopped,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
