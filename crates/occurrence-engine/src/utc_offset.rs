//! Local-vs-UTC offset computation.
//!
//! Generators unroll rules on a [`WallClock`]. A shifted clock reads the
//! local wall clock: every generated occurrence is converted to an absolute
//! instant with the offset in effect at *that* occurrence, so two
//! occurrences on either side of a DST transition get different offsets. An
//! absolute clock steps in plain Unix seconds.
//!
//! Which clock a rule gets depends on its family and standard (see
//! `rules::Family::clock`): interval families in the `UTC` standard and
//! calendar families in the `local` standard are shifted.
//!
//! "Wall seconds" in this crate are seconds since the epoch as read off a
//! wall clock, i.e. `timestamp + utc_offset(timestamp)`.

use chrono::{DateTime, Local, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::EngineError;
use crate::rule::TimeStandard;

/// Largest difference between two UTC offsets of one zone that the
/// generators must tolerate when seeding a search on the wall clock.
pub const MAX_OFFSET_SHIFT: i64 = 2 * 3600;

#[derive(Debug, Clone, Copy, PartialEq)]
enum LocalZone {
    Host,
    Named(Tz),
    Fixed(i32),
}

/// Computes the UTC offset (seconds east of UTC, DST included) in effect at
/// an arbitrary timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtcOffset {
    zone: LocalZone,
    fallback: i32,
}

impl UtcOffset {
    /// The host's local timezone.
    pub fn host() -> Self {
        Self {
            zone: LocalZone::Host,
            fallback: 0,
        }
    }

    /// An IANA timezone (e.g. `"Europe/London"`).
    pub fn named(name: &str) -> Result<Self, EngineError> {
        let tz = parse_timezone(name)?;
        Ok(Self {
            zone: LocalZone::Named(tz),
            fallback: 0,
        })
    }

    /// A zone without DST.
    pub fn fixed(seconds: i32) -> Self {
        Self {
            zone: LocalZone::Fixed(seconds),
            fallback: seconds,
        }
    }

    /// Resolve the configured zone, falling back to a fixed offset when the
    /// name is unknown. `None` selects the host zone.
    pub fn from_config(timezone: Option<&str>, fallback: i32) -> Self {
        let zone = match timezone {
            None => LocalZone::Host,
            Some(name) => match parse_timezone(name) {
                Ok(tz) => LocalZone::Named(tz),
                Err(e) => {
                    warn!(timezone = %name, error = %e, fallback, "using fixed UTC offset");
                    LocalZone::Fixed(fallback)
                }
            },
        };
        Self { zone, fallback }
    }

    /// The offset in effect at `timestamp`.
    pub fn compute(&self, timestamp: i64) -> i64 {
        let Some(utc) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
            return i64::from(self.fallback);
        };
        let naive = utc.naive_utc();
        let seconds = match self.zone {
            LocalZone::Host => Local.offset_from_utc_datetime(&naive).fix().local_minus_utc(),
            LocalZone::Named(tz) => tz.offset_from_utc_datetime(&naive).fix().local_minus_utc(),
            LocalZone::Fixed(seconds) => seconds,
        };
        i64::from(seconds)
    }

    /// Absolute timestamp → local wall seconds.
    pub fn to_wall(&self, timestamp: i64) -> i64 {
        timestamp.saturating_add(self.compute(timestamp))
    }

    /// Local wall seconds → absolute timestamp.
    ///
    /// Wall times skipped by a spring-forward transition land after the gap;
    /// wall times repeated by a fall-back transition resolve to the later
    /// instant.
    pub fn to_absolute(&self, wall: i64) -> i64 {
        let guess = wall.saturating_sub(self.compute(wall));
        wall.saturating_sub(self.compute(guess))
    }
}

impl Default for UtcOffset {
    fn default() -> Self {
        Self::host()
    }
}

/// The clock a rule is unrolled on.
#[derive(Debug, Clone, Copy)]
pub struct WallClock<'a> {
    local: Option<&'a UtcOffset>,
}

impl<'a> WallClock<'a> {
    /// The clock whose wall seconds read `standard` time: the local wall
    /// clock for `local`, plain Unix seconds for `UTC`.
    pub fn new(standard: TimeStandard, offset: &'a UtcOffset) -> Self {
        match standard {
            TimeStandard::Local => Self::shifted(offset),
            TimeStandard::Utc => Self::absolute(),
        }
    }

    /// Plain Unix seconds.
    pub fn absolute() -> Self {
        Self { local: None }
    }

    /// The local wall clock described by `offset`.
    pub fn shifted(offset: &'a UtcOffset) -> Self {
        Self {
            local: Some(offset),
        }
    }

    pub fn is_shifted(&self) -> bool {
        self.local.is_some()
    }

    pub fn to_wall(&self, timestamp: i64) -> i64 {
        match self.local {
            Some(offset) => offset.to_wall(timestamp),
            None => timestamp,
        }
    }

    pub fn to_absolute(&self, wall: i64) -> i64 {
        match self.local {
            Some(offset) => offset.to_absolute(wall),
            None => wall,
        }
    }

    /// Extra distance to step back when seeding a search on this clock.
    pub fn seed_margin(&self) -> i64 {
        if self.local.is_some() {
            MAX_OFFSET_SHIFT
        } else {
            0
        }
    }
}

/// Parse an IANA timezone string into `Tz`.
fn parse_timezone(s: &str) -> Result<Tz, EngineError> {
    s.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(format!("'{}'", s)))
}
