//! Fills prediction gaps from the trip-updates delta feed.
//!
//! Trip updates are the secondary real-time source: they only ever supply
//! stops the stop-prediction feed said nothing about. An existing prediction
//! is never overwritten, and stops neither feed covers fall through to the
//! scheduled time in the timeline builder.

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::matcher::{self, loose_i64, loose_str};
use crate::model::{Prediction, RouteSelector, StopPatternEntry, TimeSource};
use crate::parser::TripUpdatesBody;

/// How many upcoming departures are kept per stop.
pub const PREDICTIONS_PER_STOP: usize = 3;

/// Extracts the trip-update records relevant to `target` from a decoded
/// feed body, in the same shape as stop predictions.
pub fn trip_update_records(body: &TripUpdatesBody, target: &RouteSelector) -> Vec<Prediction> {
    match body {
        TripUpdatesBody::Json(entities) => records_from_json(entities, target),
        TripUpdatesBody::Protobuf(feed) => records_from_feed(feed, target),
    }
}

fn records_from_json(entities: &[Value], target: &RouteSelector) -> Vec<Prediction> {
    let mut records = Vec::new();

    for entity in entities {
        let Some(trip_update) = entity.get("trip_update") else {
            continue;
        };
        let Some(trip) = trip_update.get("trip") else {
            continue;
        };
        if !matcher::matches_route(trip, target) {
            continue;
        }
        let trip_id = loose_str(trip, "trip_id");

        let stop_time_updates = trip_update
            .get("stop_time_update")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for update in stop_time_updates {
            let Some(stop_id) = loose_str(update, "stop_id") else {
                continue;
            };
            let Some(expected_time) = json_event_time(update) else {
                continue;
            };
            records.push(Prediction {
                stop_id,
                route_id: loose_str(trip, "route_id").unwrap_or_else(|| target.route_id.clone()),
                route_short_name: target.route_short_name.clone(),
                direction: target.direction,
                expected_time,
                trip_id: trip_id.clone(),
                source: TimeSource::TripUpdate,
            });
        }
    }

    records
}

/// Departure wins over arrival, matching the prediction feed's convention.
fn json_event_time(update: &Value) -> Option<String> {
    for key in ["departure", "arrival"] {
        if let Some(event) = update.get(key) {
            if let Some(epoch) = loose_i64(event, "time") {
                return epoch_to_rfc3339(epoch);
            }
        }
    }
    None
}

fn records_from_feed(feed: &gtfs_rt::FeedMessage, target: &RouteSelector) -> Vec<Prediction> {
    let mut records = Vec::new();

    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else {
            continue;
        };
        let trip = &trip_update.trip;

        // The protobuf descriptor has no short name, so only the route id
        // can match; direction remains exact.
        let id_match = trip.route_id.as_deref() == Some(target.route_id.as_str());
        let dir_match = trip.direction_id == Some(u32::from(target.direction));
        if !id_match || !dir_match {
            continue;
        }

        for update in &trip_update.stop_time_update {
            let Some(stop_id) = update.stop_id.clone() else {
                continue;
            };
            let event = update.departure.as_ref().or(update.arrival.as_ref());
            let Some(expected_time) = event.and_then(|e| e.time).and_then(epoch_to_rfc3339) else {
                continue;
            };
            records.push(Prediction {
                stop_id,
                route_id: target.route_id.clone(),
                route_short_name: target.route_short_name.clone(),
                direction: target.direction,
                expected_time,
                trip_id: trip.trip_id.clone(),
                source: TimeSource::TripUpdate,
            });
        }
    }

    records
}

fn epoch_to_rfc3339(epoch: i64) -> Option<String> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Fills every pattern stop lacking a prediction from the trip-update
/// records. Stops that already carry predictions are left untouched.
pub fn fill_gaps(
    by_stop: &mut HashMap<String, Vec<Prediction>>,
    updates: Vec<Prediction>,
    pattern: &[StopPatternEntry],
) {
    let mut grouped: HashMap<String, Vec<Prediction>> = HashMap::new();
    for update in updates {
        grouped.entry(update.stop_id.clone()).or_default().push(update);
    }

    for entry in pattern {
        let covered = by_stop
            .get(&entry.stop_id)
            .is_some_and(|preds| !preds.is_empty());
        if covered {
            continue;
        }
        if let Some(mut records) = grouped.remove(&entry.stop_id) {
            records.sort_by(|a, b| a.expected_time.cmp(&b.expected_time));
            records.truncate(PREDICTIONS_PER_STOP);
            by_stop.insert(entry.stop_id.clone(), records);
        }
    }
}
