//! Natural-language temporal range extraction.
//!
//! The parser recognizes a small closed set of English time phrases and turns
//! them into a `[after, before]` window plus the remaining query text. It is
//! deliberately shallow: anything it does not recognize is left in
//! `remaining` for full-text search.

use chrono::{TimeZone, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::DAY_MS;

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;

static LAST_N_UNITS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:last|past)\s+(\d+)\s+(minute|hour|day|week|month)s?").expect("temporal regex")
});

static N_DAYS_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+days?\s+ago").expect("temporal regex"));

/// A parsed temporal query: an optional time window and the residual text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalQuery {
    /// Window start (unix ms, inclusive), if any phrase matched.
    pub after: Option<i64>,
    /// Window end (unix ms, inclusive), if any phrase matched.
    pub before: Option<i64>,
    /// The query with the matched phrase removed.
    pub remaining: String,
}

impl TemporalQuery {
    /// Returns whether any time range was recognized.
    #[must_use]
    pub const fn has_range(&self) -> bool {
        self.after.is_some() || self.before.is_some()
    }
}

/// Midnight UTC of the day containing `now_ms`.
fn start_of_day(now_ms: i64) -> i64 {
    let dt = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now_ms, |d| d.and_utc().timestamp_millis())
}

/// Extracts a time window from `query` relative to `now_ms`.
///
/// Recognized phrases, first match wins:
/// `last/past N minutes|hours|days|weeks|months`, `N days ago`,
/// `yesterday`, `today`, `last week`, `last month`, `last hour`.
#[must_use]
pub fn parse_temporal(query: &str, now_ms: i64) -> TemporalQuery {
    let lowered = query.to_lowercase();
    let sod = start_of_day(now_ms);

    if let Some(caps) = LAST_N_UNITS.captures(&lowered) {
        let n: i64 = caps[1].parse().unwrap_or(1);
        let unit = match &caps[2] {
            "minute" => MINUTE_MS,
            "hour" => HOUR_MS,
            "week" => 7 * DAY_MS,
            "month" => 30 * DAY_MS,
            _ => DAY_MS,
        };
        let span = caps.get(0).map_or(0..0, |m| m.range());
        return with_range(&lowered, span, now_ms - n * unit, now_ms);
    }

    if let Some(caps) = N_DAYS_AGO.captures(&lowered) {
        let n: i64 = caps[1].parse().unwrap_or(1);
        let span = caps.get(0).map_or(0..0, |m| m.range());
        // The whole calendar day, n days back
        return with_range(&lowered, span, sod - n * DAY_MS, sod - (n - 1) * DAY_MS);
    }

    let phrases: [(&str, i64, i64); 6] = [
        ("yesterday", sod - DAY_MS, sod),
        ("today", sod, now_ms),
        ("last week", now_ms - 7 * DAY_MS, now_ms),
        ("last month", now_ms - 30 * DAY_MS, now_ms),
        ("last hour", now_ms - HOUR_MS, now_ms),
        ("this week", now_ms - 7 * DAY_MS, now_ms),
    ];
    for (phrase, after, before) in phrases {
        if let Some(pos) = lowered.find(phrase) {
            return with_range(&lowered, pos..pos + phrase.len(), after, before);
        }
    }

    TemporalQuery {
        after: None,
        before: None,
        remaining: lowered.trim().to_string(),
    }
}

fn with_range(
    lowered: &str,
    span: std::ops::Range<usize>,
    after: i64,
    before: i64,
) -> TemporalQuery {
    let mut remaining = String::with_capacity(lowered.len());
    remaining.push_str(&lowered[..span.start]);
    remaining.push(' ');
    remaining.push_str(&lowered[span.end..]);
    let remaining = remaining.split_whitespace().collect::<Vec<_>>().join(" ");

    TemporalQuery {
        after: Some(after),
        before: Some(before),
        remaining,
    }
}
