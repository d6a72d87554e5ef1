//! Rendering and persistence of timeline snapshots.
//!
//! Supports a plain-text timeline for the terminal, JSON for piping, and an
//! append-only CSV history of poll summaries.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use crate::model::{TimeSource, TimelineSnapshot};

/// Single-character provenance marker used in the text rendering.
fn source_marker(source: TimeSource) -> char {
    match source {
        TimeSource::Realtime => '*',
        TimeSource::TripUpdate => '+',
        TimeSource::Scheduled => '.',
        TimeSource::Unknown => '?',
    }
}

/// Renders a snapshot as an aligned text timeline.
pub fn render_timeline(snapshot: &TimelineSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Route {} direction {}: {}",
        snapshot.route_short_name, snapshot.direction, snapshot.summary
    );

    for stop in &snapshot.stops {
        let mut tags = String::new();
        if stop.is_departure {
            tags.push_str(" [departure]");
        }
        if stop.is_destination {
            tags.push_str(" [destination]");
        }
        if stop.is_hub {
            tags.push_str(" [hub]");
        }
        let _ = writeln!(
            out,
            "{:>3}. {} {:<42} {:>9}{}",
            stop.sequence,
            source_marker(stop.time_source),
            stop.stop_name,
            stop.eta_display,
            tags
        );
    }
    out
}

pub fn to_json(snapshot: &TimelineSnapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// One CSV row summarizing a poll.
#[derive(Debug, Serialize)]
pub struct PollRecord {
    pub generated_at: DateTime<Utc>,
    pub route_id: String,
    pub direction: u8,
    pub total_stops: usize,
    pub realtime_stops: usize,
    pub trip_update_stops: usize,
    pub scheduled_stops: usize,
    pub unknown_stops: usize,
    pub next_eta_seconds: Option<i64>,
    pub next_departure: Option<String>,
}

impl PollRecord {
    pub fn from_snapshot(snapshot: &TimelineSnapshot) -> Self {
        Self {
            generated_at: snapshot.generated_at,
            route_id: snapshot.route_id.clone(),
            direction: snapshot.direction,
            total_stops: snapshot.total_stops,
            realtime_stops: snapshot.realtime_stops,
            trip_update_stops: snapshot.trip_update_stops,
            scheduled_stops: snapshot.scheduled_stops,
            unknown_stops: snapshot.unknown_stops,
            next_eta_seconds: snapshot.next_eta_seconds(),
            next_departure: snapshot.next_departure().map(str::to_string),
        }
    }
}

/// Appends a [`PollRecord`] row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_summary(path: &str, record: &PollRecord) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "appending poll record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Direction label for display: direction 0 reads the route long name as-is,
/// direction 1 reverses its " - "-separated legs. Display-only; the engine
/// never consumes this.
pub fn direction_label(route_long_name: &str, direction: u8) -> String {
    if direction == 0 {
        return route_long_name.to_string();
    }
    let mut legs = route_long_name.split(" - ").collect::<Vec<_>>();
    legs.reverse();
    legs.join(" - ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimelineStop;
    use chrono::TimeZone;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn sample_snapshot() -> TimelineSnapshot {
        TimelineSnapshot {
            route_id: "830".to_string(),
            route_short_name: "83".to_string(),
            direction: 0,
            generated_at: Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap(),
            stops: vec![TimelineStop {
                stop_id: "A".to_string(),
                stop_name: "Courtenay Place".to_string(),
                sequence: 1,
                scheduled_time: Some("10:05:00".to_string()),
                next_departure: Some("10:06:30".to_string()),
                eta_seconds: Some(390),
                eta_display: "6m 30s".to_string(),
                time_source: TimeSource::Realtime,
                is_departure: true,
                is_destination: false,
                is_hub: false,
                stop_lat: None,
                stop_lon: None,
            }],
            total_stops: 1,
            realtime_stops: 1,
            trip_update_stops: 0,
            scheduled_stops: 0,
            unknown_stops: 0,
            preview: "Courtenay Place (6m 30s)".to_string(),
            summary: "1 stops: 1 realtime, 0 trip-update, 0 scheduled, 0 unknown".to_string(),
        }
    }

    #[test]
    fn test_render_contains_stop_and_tags() {
        let text = render_timeline(&sample_snapshot());
        assert!(text.contains("Courtenay Place"));
        assert!(text.contains("6m 30s"));
        assert!(text.contains("[departure]"));
        assert!(text.contains("Route 83 direction 0"));
    }

    #[test]
    fn test_append_summary_creates_file_and_writes_header_once() {
        let path = temp_path("transit_timeline_test_history.csv");
        let _ = fs::remove_file(&path); // clean up any prior run

        let record = PollRecord::from_snapshot(&sample_snapshot());
        append_summary(&path, &record).unwrap();
        append_summary(&path, &record).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content
            .lines()
            .filter(|l| l.contains("generated_at"))
            .count();
        assert_eq!(header_count, 1);
        // 1 header + 2 data rows
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(
            direction_label("Wellington - Eastbourne", 0),
            "Wellington - Eastbourne"
        );
        assert_eq!(
            direction_label("Wellington - Petone - Eastbourne", 1),
            "Eastbourne - Petone - Wellington"
        );
        assert_eq!(direction_label("Loop", 1), "Loop");
    }
}
