//! End-to-end pipeline tests against an in-process fixture API.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Pacific::Auckland;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use transit_timeline::catalog::Catalog;
use transit_timeline::model::{RouteSelector, TimeSource};
use transit_timeline::predictions::PredictionFetcher;
use transit_timeline::services::transit_api::TransitApi;
use transit_timeline::timeline::{DEFAULT_TIMEZONE, TimelineBuilder};

/// 09:30 local on a fixed service day.
fn fixture_now() -> DateTime<Utc> {
    Auckland
        .with_ymd_and_hms(2025, 3, 10, 9, 30, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn local_epoch(hour: u32, minute: u32) -> i64 {
    Auckland
        .with_ymd_and_hms(2025, 3, 10, hour, minute, 0)
        .unwrap()
        .timestamp()
}

#[derive(Default)]
struct FixtureApi {
    trips: Vec<Value>,
    stop_times: Vec<Value>,
    stops: Vec<Value>,
    predictions: HashMap<String, Vec<Value>>,
    trip_updates: Vec<u8>,
    fail_trips: bool,
    trips_calls: AtomicUsize,
    stop_times_calls: AtomicUsize,
}

#[async_trait]
impl TransitApi for FixtureApi {
    async fn validate_key(&self) -> Result<bool> {
        Ok(true)
    }

    async fn routes(&self) -> Result<Vec<Value>> {
        Ok(vec![json!({
            "route_id": 83,
            "route_short_name": "83",
            "route_long_name": "Courtenay Place - Petone - Eastbourne",
            "route_type": 3
        })])
    }

    async fn stops(&self) -> Result<Vec<Value>> {
        Ok(self.stops.clone())
    }

    async fn trips(&self) -> Result<Vec<Value>> {
        self.trips_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_trips {
            bail!("503 from upstream");
        }
        Ok(self.trips.clone())
    }

    async fn stop_times(&self, trip_id: &str) -> Result<Vec<Value>> {
        self.stop_times_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(trip_id, "trip-83-0", "stop_times must be asked per trip");
        Ok(self.stop_times.clone())
    }

    async fn stop_predictions(&self, stop_id: &str) -> Result<Vec<Value>> {
        Ok(self.predictions.get(stop_id).cloned().unwrap_or_default())
    }

    async fn trip_updates(&self) -> Result<Vec<u8>> {
        Ok(self.trip_updates.clone())
    }
}

/// Route "83" direction 0 with 12 stops: predictions cover stops 1 to 8, a
/// trip update covers stop 9, stops 10 to 12 have only schedule data.
fn scenario_api() -> FixtureApi {
    // the upstream sends route_id as an integer; queries use the string "83"
    let trips = vec![
        json!({"trip_id": "trip-83-1", "route_id": 83, "direction_id": 1}),
        json!({"trip_id": "trip-83-0", "route_id": 83, "direction_id": 0}),
    ];

    let mut stop_times = Vec::new();
    let mut stops = Vec::new();
    for i in 1..=12u32 {
        let stop_id = format!("S{i:02}");
        // scheduled departures from 09:41 local onwards, one minute apart
        stop_times.push(json!({
            "trip_id": "trip-83-0",
            "stop_id": stop_id,
            "stop_sequence": i,
            "arrival_time": format!("09:{}:00", 40 + i),
            "departure_time": format!("09:{}:00", 40 + i),
        }));
        let name = if i == 6 {
            "Petone Station".to_string()
        } else {
            format!("Ordinary Road at {i}")
        };
        stops.push(json!({
            "stop_id": stop_id,
            "stop_name": name,
            "stop_lat": -41.2 - f64::from(i) / 100.0,
            "stop_lon": 174.8,
        }));
    }

    // live predictions for stops 1..=8, deliberately out of sequence order
    let mut predictions = HashMap::new();
    for i in (1..=8u32).rev() {
        let stop_id = format!("S{i:02}");
        predictions.insert(
            stop_id.clone(),
            vec![json!({
                "stop_id": stop_id,
                "route_id": 83,
                "direction_id": 0,
                "departure_time": format!("09:{}:30", 32 + i),
            })],
        );
    }

    // trip updates: a gap-fill for stop 9, a decoy for the wrong direction,
    // and a record for stop 1 that must lose to the live prediction
    let feed = json!({
        "header": {"gtfs_realtime_version": "2.0"},
        "entity": [
            {
                "trip_update": {
                    "trip": {"trip_id": "trip-83-0", "route_id": 83, "direction_id": 0},
                    "stop_time_update": [
                        {"stop_id": "S09", "departure": {"time": local_epoch(9, 48)}},
                        {"stop_id": "S01", "departure": {"time": local_epoch(9, 59)}},
                    ]
                }
            },
            {
                "trip_update": {
                    "trip": {"trip_id": "trip-83-1", "route_id": 83, "direction_id": 1},
                    "stop_time_update": [
                        {"stop_id": "S10", "departure": {"time": local_epoch(9, 50)}}
                    ]
                }
            }
        ]
    });

    FixtureApi {
        trips,
        stop_times,
        stops,
        predictions,
        trip_updates: serde_json::to_vec(&feed).unwrap(),
        ..FixtureApi::default()
    }
}

fn builder_over(api: Arc<FixtureApi>) -> TimelineBuilder {
    let api: Arc<dyn TransitApi> = api;
    let catalog = Arc::new(Catalog::new(api.clone()));
    let fetcher = PredictionFetcher::new(api.clone());
    TimelineBuilder::with_parts(api, catalog, fetcher, DEFAULT_TIMEZONE)
}

fn target() -> RouteSelector {
    RouteSelector::new("83", "83", 0)
}

#[tokio::test]
async fn test_twelve_stop_scenario_sources_and_tags() {
    let builder = builder_over(Arc::new(scenario_api()));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    assert_eq!(snapshot.total_stops, 12);
    assert_eq!(snapshot.stops.len(), 12);

    for (idx, stop) in snapshot.stops.iter().enumerate() {
        let expected = match idx {
            0..=7 => TimeSource::Realtime,
            8 => TimeSource::TripUpdate,
            _ => TimeSource::Scheduled,
        };
        assert_eq!(
            stop.time_source, expected,
            "stop {} has wrong source",
            stop.stop_id
        );
        assert_eq!(stop.is_departure, idx == 0);
        assert_eq!(stop.is_destination, idx == 11);
    }

    assert_eq!(snapshot.realtime_stops, 8);
    assert_eq!(snapshot.trip_update_stops, 1);
    assert_eq!(snapshot.scheduled_stops, 3);
    assert_eq!(snapshot.unknown_stops, 0);
}

#[tokio::test]
async fn test_timeline_keeps_sequence_order_not_arrival_order() {
    let builder = builder_over(Arc::new(scenario_api()));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    let sequences: Vec<u32> = snapshot.stops.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, (1..=12).collect::<Vec<u32>>());

    // ETAs are not monotone here (the S01 prediction is later than S02's);
    // order must still follow the pattern
    let ids: Vec<&str> = snapshot.stops.iter().map(|s| s.stop_id.as_str()).collect();
    assert_eq!(ids[0], "S01");
    assert_eq!(ids[11], "S12");
}

#[tokio::test]
async fn test_realtime_beats_trip_update_for_covered_stop() {
    let builder = builder_over(Arc::new(scenario_api()));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    // S01 appears in the trip-updates feed too, with a later time; the live
    // prediction must win
    let first = &snapshot.stops[0];
    assert_eq!(first.time_source, TimeSource::Realtime);
    assert_eq!(first.next_departure.as_deref(), Some("09:33:30"));
}

#[tokio::test]
async fn test_eta_values_and_display() {
    let builder = builder_over(Arc::new(scenario_api()));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    // S01 predicted 09:33:30, now 09:30:00 -> 210 seconds
    let first = &snapshot.stops[0];
    assert_eq!(first.eta_seconds, Some(210));
    assert_eq!(first.eta_display, "3m 30s");
    assert_eq!(snapshot.next_eta_seconds(), Some(210));

    // S12 scheduled 09:52:00 -> 22 minutes
    let last = &snapshot.stops[11];
    assert_eq!(last.eta_seconds, Some(22 * 60));
    assert_eq!(last.eta_display, "22m 0s");
}

#[tokio::test]
async fn test_hub_tagging_and_derived_fields() {
    let builder = builder_over(Arc::new(scenario_api()));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    let hubs = snapshot.hub_names();
    assert_eq!(hubs, vec!["Petone Station"]);
    assert_eq!(snapshot.destination_name(), Some("Ordinary Road at 12"));
    assert_eq!(snapshot.time_source_label(), Some("realtime"));

    assert!(snapshot.preview.starts_with("Ordinary Road at 1 (3m 30s)"));
    assert!(snapshot.preview.contains("Petone Station"));
    assert!(snapshot.preview.ends_with("Ordinary Road at 12 (22m 0s)"));
    assert_eq!(
        snapshot.summary,
        "12 stops: 8 realtime, 1 trip-update, 3 scheduled, 0 unknown"
    );
}

#[tokio::test]
async fn test_identical_inputs_build_identical_timelines() {
    let builder = builder_over(Arc::new(scenario_api()));
    let now = fixture_now();

    let first = builder.build(&target(), now).await.unwrap();
    let second = builder.build(&target(), now).await.unwrap();

    let displays =
        |s: &transit_timeline::model::TimelineSnapshot| -> Vec<String> {
            s.stops.iter().map(|st| st.eta_display.clone()).collect()
        };
    assert_eq!(displays(&first), displays(&second));
    assert_eq!(first.preview, second.preview);
}

#[tokio::test]
async fn test_concurrent_builds_fetch_stop_pattern_once() {
    let api = Arc::new(scenario_api());
    let builder = Arc::new(builder_over(api.clone()));
    let now = fixture_now();

    let (a, b) = tokio::join!(builder.build(&target(), now), builder.build(&target(), now));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(api.trips_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.stop_times_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_pattern_failure_is_structural() {
    let api = FixtureApi {
        fail_trips: true,
        ..scenario_api()
    };
    let builder = builder_over(Arc::new(api));

    let err = builder.build(&target(), fixture_now()).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("stop pattern unavailable"));
    assert!(message.contains("83"));
}

#[tokio::test]
async fn test_unknown_route_yields_empty_timeline() {
    let builder = builder_over(Arc::new(scenario_api()));
    let unknown = RouteSelector::new("999", "999", 0);

    let snapshot = builder.build(&unknown, fixture_now()).await.unwrap();
    assert_eq!(snapshot.total_stops, 0);
    assert!(snapshot.stops.is_empty());
    assert_eq!(snapshot.preview, "");
}

#[tokio::test]
async fn test_unparsable_times_are_marked_unknown() {
    let mut api = scenario_api();
    // strip all real-time coverage and break the schedule for stop 12
    api.predictions.clear();
    api.trip_updates = serde_json::to_vec(&json!({"entity": []})).unwrap();
    let stop_times = std::mem::take(&mut api.stop_times);
    api.stop_times = stop_times
        .into_iter()
        .map(|mut st| {
            if st["stop_id"] == "S12" {
                st["arrival_time"] = Value::Null;
                st["departure_time"] = json!("not a time");
            }
            st
        })
        .collect();

    let builder = builder_over(Arc::new(api));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    let last = &snapshot.stops[11];
    assert_eq!(last.time_source, TimeSource::Unknown);
    assert_eq!(last.eta_seconds, None);
    assert_eq!(last.eta_display, "unknown");
    assert_eq!(snapshot.scheduled_stops, 11);
    assert_eq!(snapshot.unknown_stops, 1);
}

#[tokio::test]
async fn test_protobuf_trip_updates_also_fill_gaps() {
    use prost::Message;

    let mut api = scenario_api();
    let feed = gtfs_rt::FeedMessage {
        header: gtfs_rt::FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: None,
        },
        entity: vec![gtfs_rt::FeedEntity {
            id: "1".to_string(),
            is_deleted: None,
            trip_update: Some(gtfs_rt::TripUpdate {
                trip: gtfs_rt::TripDescriptor {
                    trip_id: Some("trip-83-0".to_string()),
                    route_id: Some("83".to_string()),
                    direction_id: Some(0),
                    start_time: None,
                    start_date: None,
                    schedule_relationship: None,
                    modified_trip: None,
                },
                vehicle: None,
                stop_time_update: vec![gtfs_rt::trip_update::StopTimeUpdate {
                    stop_sequence: None,
                    stop_id: Some("S09".to_string()),
                    arrival: None,
                    departure: Some(gtfs_rt::trip_update::StopTimeEvent {
                        delay: None,
                        time: Some(local_epoch(9, 48)),
                        uncertainty: None,
                    }),
                    departure_occupancy_status: None,
                    schedule_relationship: None,
                    stop_time_properties: None,
                }],
                timestamp: None,
                delay: None,
                trip_properties: None,
            }),
            vehicle: None,
            alert: None,
            shape: None,
            stop: None,
            trip_modifications: None,
        }],
    };
    api.trip_updates = feed.encode_to_vec();

    let builder = builder_over(Arc::new(api));
    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    assert_eq!(snapshot.stops[8].time_source, TimeSource::TripUpdate);
    assert_eq!(snapshot.stops[8].eta_seconds, Some(18 * 60));
}

#[tokio::test]
async fn test_failed_trip_updates_feed_degrades_to_schedule() {
    struct NoUpdates(FixtureApi);

    #[async_trait]
    impl TransitApi for NoUpdates {
        async fn validate_key(&self) -> Result<bool> {
            self.0.validate_key().await
        }
        async fn routes(&self) -> Result<Vec<Value>> {
            self.0.routes().await
        }
        async fn stops(&self) -> Result<Vec<Value>> {
            self.0.stops().await
        }
        async fn trips(&self) -> Result<Vec<Value>> {
            self.0.trips().await
        }
        async fn stop_times(&self, trip_id: &str) -> Result<Vec<Value>> {
            self.0.stop_times(trip_id).await
        }
        async fn stop_predictions(&self, stop_id: &str) -> Result<Vec<Value>> {
            self.0.stop_predictions(stop_id).await
        }
        async fn trip_updates(&self) -> Result<Vec<u8>> {
            bail!("tripupdates endpoint down")
        }
    }

    let api: Arc<dyn TransitApi> = Arc::new(NoUpdates(scenario_api()));
    let catalog = Arc::new(Catalog::with_ttl(api.clone(), Duration::from_secs(60)));
    let fetcher = PredictionFetcher::new(api.clone());
    let builder = TimelineBuilder::with_parts(api, catalog, fetcher, DEFAULT_TIMEZONE);

    let snapshot = builder.build(&target(), fixture_now()).await.unwrap();

    // build survives; stop 9 falls back to its scheduled time
    assert_eq!(snapshot.total_stops, 12);
    assert_eq!(snapshot.stops[8].time_source, TimeSource::Scheduled);
    assert_eq!(snapshot.realtime_stops, 8);
    assert_eq!(snapshot.scheduled_stops, 4);
}
