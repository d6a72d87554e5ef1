//! Trait for the upstream transit open-data API.
//!
//! Response schemas are advisory, not authoritative: every endpoint returns
//! loosely-typed JSON records that callers validate field-by-field. The
//! trip-updates feed returns raw bytes because the upstream answers with
//! either JSON or a protobuf GTFS-realtime message depending on mood;
//! [`crate::parser::parse_trip_updates`] sniffs the shape.

use anyhow::Result;
use serde_json::Value;

/// Abstraction over the transit data provider (e.g. Metlink Open Data).
#[async_trait::async_trait]
pub trait TransitApi: Send + Sync {
    /// Cheap credential probe against the agency endpoint.
    async fn validate_key(&self) -> Result<bool>;

    /// All GTFS routes.
    async fn routes(&self) -> Result<Vec<Value>>;

    /// All GTFS stops.
    async fn stops(&self) -> Result<Vec<Value>>;

    /// All GTFS trips.
    async fn trips(&self) -> Result<Vec<Value>>;

    /// Stop times for one trip. The upstream requires the trip id parameter;
    /// omitting it yields a client error, so it is part of the signature.
    async fn stop_times(&self, trip_id: &str) -> Result<Vec<Value>>;

    /// Real-time departure predictions for one stop.
    async fn stop_predictions(&self, stop_id: &str) -> Result<Vec<Value>>;

    /// The GTFS-realtime trip-updates feed, undecoded.
    async fn trip_updates(&self) -> Result<Vec<u8>>;
}
