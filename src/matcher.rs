//! Tolerant matching of loose upstream records to a route/direction.
//!
//! The upstream serializes identifiers inconsistently: `route_id` arrives as
//! a number in one feed and a string in another, and some records populate
//! only `route_short_name`. Both sides are normalized to strings before
//! comparison, and a record matches when either identifying field does.
//! Direction has no such leeway and must match exactly.

use serde_json::Value;
use tracing::debug;

use crate::model::{Prediction, RouteSelector, TimeSource};

/// Reads `record[key]` as a string, accepting string or numeric values.
/// Empty and whitespace-only strings count as absent.
pub fn loose_str(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads `record[key]` as an integer, accepting numbers and numeric strings.
pub fn loose_i64(record: &Value, key: &str) -> Option<i64> {
    match record.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decides whether a loose prediction or trip record belongs to the target
/// route/direction.
pub fn matches_route(record: &Value, target: &RouteSelector) -> bool {
    let id_match = loose_str(record, "route_id")
        .map(|id| id == target.route_id)
        .unwrap_or(false);

    let name_match = !target.route_short_name.is_empty()
        && loose_str(record, "route_short_name")
            .map(|name| name.eq_ignore_ascii_case(&target.route_short_name))
            .unwrap_or(false);

    if !id_match && !name_match {
        return false;
    }

    loose_i64(record, "direction_id")
        .map(|d| d == i64::from(target.direction))
        .unwrap_or(false)
}

/// Validates a matched record into a typed [`Prediction`], or drops it with
/// a recorded reason. This is the only place loose real-time records become
/// typed values.
pub fn to_prediction(record: &Value, target: &RouteSelector, source: TimeSource) -> Option<Prediction> {
    let Some(stop_id) = loose_str(record, "stop_id") else {
        debug!(source = source.label(), "dropping record without stop_id");
        return None;
    };
    let Some(expected_time) = expected_time(record) else {
        debug!(
            stop_id = %stop_id,
            source = source.label(),
            "dropping record without a usable time"
        );
        return None;
    };

    Some(Prediction {
        stop_id,
        route_id: loose_str(record, "route_id").unwrap_or_else(|| target.route_id.clone()),
        route_short_name: loose_str(record, "route_short_name")
            .unwrap_or_else(|| target.route_short_name.clone()),
        direction: target.direction,
        expected_time,
        trip_id: loose_str(record, "trip_id"),
        source,
    })
}

/// Pulls the departure time out of a record, trying the flat fields the
/// original feed documents and the nested `departure` object it actually
/// sends on some endpoints. Expected beats aimed.
fn expected_time(record: &Value) -> Option<String> {
    for key in ["expected_departure_time", "departure_time", "arrival_time"] {
        if let Some(t) = loose_str(record, key) {
            return Some(t);
        }
    }
    let departure = record.get("departure")?;
    loose_str(departure, "expected").or_else(|| loose_str(departure, "aimed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> RouteSelector {
        RouteSelector::new("830", "83", 0)
    }

    #[test]
    fn test_matches_string_route_id() {
        let record = json!({"route_id": "830", "direction_id": 0});
        assert!(matches_route(&record, &target()));
    }

    #[test]
    fn test_matches_numeric_route_id_against_string_query() {
        let record = json!({"route_id": 830, "direction_id": 0});
        assert!(matches_route(&record, &target()));
    }

    #[test]
    fn test_matches_on_short_name_when_id_differs() {
        let record = json!({"route_id": "999", "route_short_name": "83", "direction_id": 0});
        assert!(matches_route(&record, &target()));
    }

    #[test]
    fn test_short_name_comparison_ignores_case() {
        let selector = RouteSelector::new("HVL", "hvl", 1);
        let record = json!({"route_short_name": "HVL", "direction_id": 1});
        assert!(matches_route(&record, &selector));
    }

    #[test]
    fn test_direction_must_match_exactly() {
        let record = json!({"route_id": "830", "direction_id": 1});
        assert!(!matches_route(&record, &target()));

        let missing = json!({"route_id": "830"});
        assert!(!matches_route(&missing, &target()));
    }

    #[test]
    fn test_direction_as_numeric_string() {
        let record = json!({"route_id": "830", "direction_id": "0"});
        assert!(matches_route(&record, &target()));
    }

    #[test]
    fn test_empty_short_names_do_not_match_each_other() {
        let selector = RouteSelector::new("830", "", 0);
        let record = json!({"route_id": "999", "route_short_name": "", "direction_id": 0});
        assert!(!matches_route(&record, &selector));
    }

    #[test]
    fn test_to_prediction_reads_flat_departure_time() {
        let record = json!({
            "stop_id": 5012,
            "route_id": "830",
            "direction_id": 0,
            "departure_time": "14:05:00",
            "trip_id": "t-1"
        });
        let p = to_prediction(&record, &target(), TimeSource::Realtime).unwrap();
        assert_eq!(p.stop_id, "5012");
        assert_eq!(p.expected_time, "14:05:00");
        assert_eq!(p.trip_id.as_deref(), Some("t-1"));
        assert_eq!(p.source, TimeSource::Realtime);
    }

    #[test]
    fn test_to_prediction_reads_nested_departure_expected_over_aimed() {
        let record = json!({
            "stop_id": "5012",
            "departure": {"aimed": "14:00:00", "expected": "14:03:30"}
        });
        let p = to_prediction(&record, &target(), TimeSource::Realtime).unwrap();
        assert_eq!(p.expected_time, "14:03:30");
        // identifying fields backfilled from the target
        assert_eq!(p.route_id, "830");
    }

    #[test]
    fn test_to_prediction_drops_unusable_records() {
        let no_stop = json!({"departure_time": "14:05:00"});
        assert!(to_prediction(&no_stop, &target(), TimeSource::Realtime).is_none());

        let no_time = json!({"stop_id": "5012"});
        assert!(to_prediction(&no_time, &target(), TimeSource::Realtime).is_none());
    }
}
