//! Engine configuration, read from `OUTSPLINE_*` environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utc_offset::UtcOffset;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IANA zone used as the local clock. `None` means the host zone.
    pub timezone: Option<String>,
    /// Offset in seconds used when `timezone` cannot be resolved.
    pub fallback_utc_offset: i32,
    /// Seconds to wait before re-arming after a failed search cycle.
    pub retry_delay_secs: u64,
    /// How many times a next-occurrence search may start over after
    /// exceptions emptied its result.
    pub max_researches: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            fallback_utc_offset: 0,
            retry_delay_secs: 60,
            max_researches: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timezone: env_opt("OUTSPLINE_TIMEZONE"),
            fallback_utc_offset: env_parse(
                "OUTSPLINE_FALLBACK_UTC_OFFSET",
                defaults.fallback_utc_offset,
            ),
            retry_delay_secs: env_parse("OUTSPLINE_RETRY_DELAY", defaults.retry_delay_secs),
            max_researches: env_parse("OUTSPLINE_MAX_RESEARCHES", defaults.max_researches),
        }
    }

    /// The local clock this configuration describes.
    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_config(self.timezone.as_deref(), self.fallback_utc_offset)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
