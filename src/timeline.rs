//! Builds the reconciled, ordered stop timeline.
//!
//! Orchestration order: stop pattern (structurally required) → stop-level
//! predictions (bounded fan-out) → trip-update gap fill → per-stop time
//! reconciliation. Every step after the stop pattern degrades instead of
//! failing, and provenance is recorded per stop so a display can show how
//! fresh each time is.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::error::BuildError;
use crate::merge;
use crate::model::{
    Prediction, RouteSelector, StopPatternEntry, TimeSource, TimelineSnapshot, TimelineStop,
};
use crate::normalize;
use crate::parser;
use crate::predictions::PredictionFetcher;
use crate::services::transit_api::TransitApi;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Pacific::Auckland;

/// Interchange name fragments that mark a stop as a hub, compared
/// case-insensitively against the stop name.
pub const HUB_KEYWORDS: &[&str] = &[
    "station",
    "interchange",
    "terminal",
    "centre",
    "plaza",
    "wellington",
    "petone",
    "lower hutt",
    "upper hutt",
    "masterton",
    "johnsonville",
    "porirua",
    "paraparaumu",
    "waikanae",
];

pub fn is_hub_stop(stop_name: &str) -> bool {
    let name = stop_name.to_lowercase();
    HUB_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

/// Renders a duration-until as the display layer shows it: seconds under a
/// minute, minutes and seconds under an hour, hours and minutes beyond.
/// Negative inputs clamp to zero.
pub fn format_eta(eta_seconds: i64) -> String {
    let eta = eta_seconds.max(0);
    if eta < 60 {
        format!("{eta}s")
    } else if eta < 3600 {
        format!("{}m {}s", eta / 60, eta % 60)
    } else {
        format!("{}h {}m", eta / 3600, (eta % 3600) / 60)
    }
}

pub struct TimelineBuilder {
    api: Arc<dyn TransitApi>,
    catalog: Arc<Catalog>,
    fetcher: PredictionFetcher,
    tz: Tz,
}

impl TimelineBuilder {
    pub fn new(api: Arc<dyn TransitApi>) -> Self {
        let catalog = Arc::new(Catalog::new(api.clone()));
        let fetcher = PredictionFetcher::new(api.clone());
        Self::with_parts(api, catalog, fetcher, DEFAULT_TIMEZONE)
    }

    pub fn with_parts(
        api: Arc<dyn TransitApi>,
        catalog: Arc<Catalog>,
        fetcher: PredictionFetcher,
        tz: Tz,
    ) -> Self {
        Self {
            api,
            catalog,
            fetcher,
            tz,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Builds the timeline for `target` as of `now`.
    ///
    /// Fails only when the stop pattern itself is unavailable; an unknown
    /// route yields an empty timeline, and missing real-time data degrades
    /// per stop down the realtime → trip-update → scheduled chain.
    #[instrument(skip(self, target), fields(route = %target.route_id, direction = target.direction))]
    pub async fn build(
        &self,
        target: &RouteSelector,
        now: DateTime<Utc>,
    ) -> Result<TimelineSnapshot, BuildError> {
        let pattern = self
            .catalog
            .stop_pattern(&target.route_id, target.direction)
            .await
            .map_err(|reason| BuildError::StopPatternUnavailable {
                route: target.route_id.clone(),
                direction: target.direction,
                reason,
            })?;

        if pattern.is_empty() {
            info!("empty stop pattern, emitting empty timeline");
            return Ok(assemble_snapshot(target, now, Vec::new()));
        }

        let stop_ids: Vec<String> = pattern.iter().map(|e| e.stop_id.clone()).collect();
        let mut by_stop = self.fetcher.fetch_all(&stop_ids, target).await;
        self.fill_from_trip_updates(&mut by_stop, target, &pattern).await;

        let last = pattern.len() - 1;
        let stops: Vec<TimelineStop> = pattern
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                self.reconcile_stop(entry, by_stop.get(&entry.stop_id), now, idx == 0, idx == last)
            })
            .collect();

        let snapshot = assemble_snapshot(target, now, stops);
        info!(
            total = snapshot.total_stops,
            realtime = snapshot.realtime_stops,
            trip_update = snapshot.trip_update_stops,
            scheduled = snapshot.scheduled_stops,
            "timeline built"
        );
        Ok(snapshot)
    }

    /// Trip updates are fetched once per build and only fill gaps; any
    /// failure here leaves the prediction map as it was.
    async fn fill_from_trip_updates(
        &self,
        by_stop: &mut HashMap<String, Vec<Prediction>>,
        target: &RouteSelector,
        pattern: &[StopPatternEntry],
    ) {
        let bytes = match self.api.trip_updates().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "trip-updates fetch failed, skipping gap fill");
                return;
            }
        };
        match parser::parse_trip_updates(&bytes) {
            Ok(body) => {
                let records = merge::trip_update_records(&body, target);
                debug!(records = records.len(), "trip-update records matched");
                merge::fill_gaps(by_stop, records, pattern);
            }
            Err(e) => warn!(error = %e, "undecodable trip-updates feed, skipping gap fill"),
        }
    }

    /// Picks the highest-precedence source whose time normalizes. A stop
    /// where nothing normalizes is explicitly unknown, never a stale guess.
    fn reconcile_stop(
        &self,
        entry: &StopPatternEntry,
        predictions: Option<&Vec<Prediction>>,
        now: DateTime<Utc>,
        is_departure: bool,
        is_destination: bool,
    ) -> TimelineStop {
        let mut chosen: Option<(DateTime<Utc>, String, TimeSource)> = None;

        for prediction in predictions.into_iter().flatten() {
            if let Some(instant) =
                normalize::upcoming_instant(&prediction.expected_time, now, self.tz)
            {
                chosen = Some((instant, prediction.expected_time.clone(), prediction.source));
                break;
            }
        }
        if chosen.is_none() {
            if let Some(scheduled) = entry.scheduled_time() {
                if let Some(instant) = normalize::upcoming_instant(scheduled, now, self.tz) {
                    chosen = Some((instant, scheduled.to_string(), TimeSource::Scheduled));
                }
            }
        }

        let (eta_seconds, eta_display, next_departure, time_source) = match chosen {
            Some((instant, raw, source)) => {
                let eta = (instant - now).num_seconds().max(0);
                (Some(eta), format_eta(eta), Some(raw), source)
            }
            None => (None, "unknown".to_string(), None, TimeSource::Unknown),
        };

        TimelineStop {
            stop_id: entry.stop_id.clone(),
            stop_name: entry.stop_name.clone(),
            sequence: entry.sequence,
            scheduled_time: entry.scheduled_time().map(str::to_string),
            next_departure,
            eta_seconds,
            eta_display,
            time_source,
            is_departure,
            is_destination,
            is_hub: is_hub_stop(&entry.stop_name),
            stop_lat: entry.stop_lat,
            stop_lon: entry.stop_lon,
        }
    }
}

fn assemble_snapshot(
    target: &RouteSelector,
    now: DateTime<Utc>,
    stops: Vec<TimelineStop>,
) -> TimelineSnapshot {
    let count = |source: TimeSource| stops.iter().filter(|s| s.time_source == source).count();
    let realtime_stops = count(TimeSource::Realtime);
    let trip_update_stops = count(TimeSource::TripUpdate);
    let scheduled_stops = count(TimeSource::Scheduled);
    let unknown_stops = count(TimeSource::Unknown);

    TimelineSnapshot {
        route_id: target.route_id.clone(),
        route_short_name: target.route_short_name.clone(),
        direction: target.direction,
        generated_at: now,
        preview: preview(&stops),
        summary: format!(
            "{} stops: {} realtime, {} trip-update, {} scheduled, {} unknown",
            stops.len(),
            realtime_stops,
            trip_update_stops,
            scheduled_stops,
            unknown_stops
        ),
        total_stops: stops.len(),
        realtime_stops,
        trip_update_stops,
        scheduled_stops,
        unknown_stops,
        stops,
    }
}

/// One line for displays that cannot nest: departure, hubs, destination.
fn preview(stops: &[TimelineStop]) -> String {
    if stops.is_empty() {
        return String::new();
    }
    let last = stops.len() - 1;
    let mut picks = vec![0];
    picks.extend(
        stops
            .iter()
            .enumerate()
            .filter(|(i, s)| s.is_hub && *i != 0 && *i != last)
            .map(|(i, _)| i),
    );
    if last != 0 {
        picks.push(last);
    }
    picks
        .iter()
        .map(|&i| format!("{} ({})", stops[i].stop_name, stops[i].eta_display))
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_eta_under_a_minute() {
        assert_eq!(format_eta(0), "0s");
        assert_eq!(format_eta(45), "45s");
        assert_eq!(format_eta(59), "59s");
    }

    #[test]
    fn test_format_eta_under_an_hour() {
        assert_eq!(format_eta(60), "1m 0s");
        assert_eq!(format_eta(90), "1m 30s");
        assert_eq!(format_eta(330), "5m 30s");
        assert_eq!(format_eta(3599), "59m 59s");
    }

    #[test]
    fn test_format_eta_hours() {
        assert_eq!(format_eta(3600), "1h 0m");
        assert_eq!(format_eta(3700), "1h 1m");
        assert_eq!(format_eta(4500), "1h 15m");
    }

    #[test]
    fn test_format_eta_clamps_negative() {
        assert_eq!(format_eta(-30), "0s");
    }

    #[test]
    fn test_hub_matching_is_case_insensitive() {
        assert!(is_hub_stop("Wellington Station"));
        assert!(is_hub_stop("PETONE"));
        assert!(is_hub_stop("Queensgate Interchange"));
        assert!(!is_hub_stop("Main Road opposite School"));
    }
}
