//! Clock Resolver.
//!
//! Every source stamps its records differently: the memory service emits
//! RFC 3339 strings, perception tokens carry integer epoch seconds, and some
//! clients send epoch milliseconds.  [`resolve_timestamp`] folds all of them
//! into one `f64` epoch-seconds value.
//!
//! # Policy
//!
//! | Input | Result |
//! |---|---|
//! | below [`YEAR_2286_SECONDS`] | used as seconds |
//! | below [`YEAR_2286_MILLIS`] | divided by 1000 |
//! | still above [`YEAR_2100_SECONDS`] | replaced with `now` |
//! | ahead of `now` | clamped to `now` |
//! | unparseable, NaN, infinite, negative | replaced with `now` |
//!
//! Substituting `now` can misplace a record on the timeline. That is kept for
//! compatibility with the upstream services and logged at `debug` level.

use chrono::{DateTime, Utc};
use memline_types::RawTimestamp;
use tracing::debug;

/// Seconds-equivalent of the year 2286 (`10^10`). Anything smaller is
/// treated as epoch seconds.
pub const YEAR_2286_SECONDS: f64 = 10_000_000_000.0;

/// Milliseconds-equivalent of the year 2286.
pub const YEAR_2286_MILLIS: f64 = YEAR_2286_SECONDS * 1000.0;

/// 2100-01-01T00:00:00Z in epoch seconds.
pub const YEAR_2100_SECONDS: f64 = 4_102_444_800.0;

/// Current wall-clock time in epoch seconds (microsecond resolution).
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Coerce a numeric timestamp into epoch seconds.
///
/// The result always lies in `[0, now]`. Idempotent: applying it to its own
/// output returns the same value.
pub fn resolve_seconds(raw: f64, now: f64) -> f64 {
    if !raw.is_finite() || raw < 0.0 {
        debug!(raw, "unusable timestamp; substituting now");
        return now;
    }
    let seconds = if raw < YEAR_2286_SECONDS {
        raw
    } else if raw < YEAR_2286_MILLIS {
        raw / 1000.0
    } else {
        raw
    };
    if seconds > YEAR_2100_SECONDS {
        debug!(raw, "timestamp beyond 2100; substituting now");
        return now;
    }
    if seconds > now {
        debug!(raw, now, "timestamp ahead of now; clamping");
        return now;
    }
    seconds
}

/// Resolve an optional wire timestamp into epoch seconds.
///
/// A missing timestamp resolves to `now`, as does any text that is neither a
/// number nor an RFC 3339 date-time.
pub fn resolve_timestamp(raw: Option<&RawTimestamp>, now: f64) -> f64 {
    match raw {
        None => now,
        Some(RawTimestamp::Number(value)) => resolve_seconds(*value, now),
        Some(RawTimestamp::Text(text)) => match parse_text(text) {
            Some(value) => resolve_seconds(value, now),
            None => {
                debug!(text = %text, "unparseable timestamp text; substituting now");
                now
            }
        },
    }
}

fn parse_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return Some(value);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_micros() as f64 / 1_000_000.0)
}
