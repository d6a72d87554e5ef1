//! Canonicalizes the upstream's assorted time representations.
//!
//! GTFS schedule times are wall-clock strings in the agency timezone, with
//! hour values allowed past 24 to mark late-night trips that belong to the
//! previous day's service. The prediction feed mixes those with RFC 3339
//! instants. Everything funnels through here into a comparable UTC instant;
//! anything unparsable becomes `None` rather than an error.

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Seconds in one nominal service day.
const SERVICE_DAY_SECS: u32 = 86_400;

/// Upper bound on accepted hour values. GTFS rollover times run past 24:00
/// but never a second full day; larger values are garbage, not data.
const MAX_SERVICE_HOUR: u32 = 48;

/// A time already elapsed by less than this is clock skew, not yesterday's
/// departure, and must not be rolled forward a day.
const SKEW_GRACE_SECS: i64 = 60;

/// Parses `H:MM`, `HH:MM` or `HH:MM:SS` into seconds past service midnight.
/// Hours may exceed 24 (service-day rollover). Returns `None` for anything
/// that does not fit.
pub fn parse_service_time(raw: &str) -> Option<u32> {
    let mut parts = raw.trim().split(':');
    let hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = parts.next()?.trim().parse().ok()?;
    let seconds: u32 = match parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    if hours >= MAX_SERVICE_HOUR || minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Resolves seconds-past-service-midnight against a service day origin into
/// a UTC instant. Rollover values (>= 24h) land on the following calendar
/// day while remaining ordered within the origin's service day.
///
/// Returns `None` if the wall-clock time does not exist in `tz` (DST gap).
pub fn service_instant(
    seconds_past_midnight: u32,
    service_day: NaiveDate,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    let days = seconds_past_midnight / SERVICE_DAY_SECS;
    let rem = seconds_past_midnight % SERVICE_DAY_SECS;
    let date = service_day.checked_add_days(Days::new(days as u64))?;
    let naive = date.and_hms_opt(rem / 3600, (rem % 3600) / 60, rem % 60)?;
    let local = tz.from_local_datetime(&naive).earliest()?;
    Some(local.with_timezone(&Utc))
}

/// Normalizes a raw upstream time string into the next instant it can mean,
/// relative to `now`.
///
/// RFC 3339 instants pass through unchanged. Wall-clock strings anchor on
/// `now`'s service day in `tz`; a time already elapsed (beyond a small skew
/// grace) is taken to mean the next service day, and rollover values anchor
/// on the previous service day first so a late-night "25:10:00" seen shortly
/// after midnight is not pushed a day into the future.
pub fn upcoming_instant(raw: &str, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(instant.with_timezone(&Utc));
    }

    let seconds = parse_service_time(trimmed)?;
    let today = now.with_timezone(&tz).date_naive();
    let elapsed = |t: DateTime<Utc>| (now - t).num_seconds() > SKEW_GRACE_SECS;

    if seconds >= SERVICE_DAY_SECS {
        let yesterday = today.checked_sub_days(Days::new(1))?;
        if let Some(t) = service_instant(seconds, yesterday, tz) {
            if !elapsed(t) {
                return Some(t);
            }
        }
        return service_instant(seconds, today, tz);
    }

    let t = service_instant(seconds, today, tz)?;
    if elapsed(t) {
        service_instant(seconds, today.checked_add_days(Days::new(1))?, tz)
    } else {
        Some(t)
    }
}
