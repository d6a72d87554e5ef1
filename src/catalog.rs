//! TTL-cached GTFS reference data.
//!
//! Routes, stops and per-route-direction stop patterns change rarely; each
//! gets its own short-TTL cache so polls do not hammer the catalog
//! endpoints. Concurrent misses for one key share a single upstream fetch,
//! and a failed fetch is never cached: the next demand retries.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::matcher::{loose_i64, loose_str};
use crate::model::StopPatternEntry;
use crate::services::transit_api::TransitApi;

/// Catalog entries are good for five minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<V> {
    value: V,
    fetched_at: Instant,
}

struct Slot<V> {
    /// Serializes fetches for this key; waiters re-check the entry after
    /// acquiring it instead of issuing their own upstream call.
    fetch_gate: tokio::sync::Mutex<()>,
    entry: Mutex<Option<Entry<V>>>,
}

impl<V: Clone> Slot<V> {
    fn new() -> Self {
        Self {
            fetch_gate: tokio::sync::Mutex::new(()),
            entry: Mutex::new(None),
        }
    }

    /// Returns the value if present and younger than `ttl`. Expired entries
    /// are absent for all purposes, never served stale.
    fn fresh(&self, ttl: Duration) -> Option<V> {
        let entry = self.entry.lock().expect("cache slot poisoned");
        entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < ttl)
            .map(|e| e.value.clone())
    }

    fn store(&self, value: V) {
        let mut entry = self.entry.lock().expect("cache slot poisoned");
        *entry = Some(Entry {
            value,
            fetched_at: Instant::now(),
        });
    }
}

/// A lazily-evicted TTL cache with per-key fetch deduplication.
pub struct TtlCache<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let mut slots = self.slots.lock().expect("cache map poisoned");
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Returns the cached value for `key`, or runs `fetch` to fill it.
    ///
    /// Concurrent callers missing on the same key produce exactly one
    /// upstream call; the rest wait and read the stored result. A fetch
    /// error propagates to its caller and leaves the slot as it was.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = self.slot(&key);
        if let Some(value) = slot.fresh(self.ttl) {
            return Ok(value);
        }

        let _gate = slot.fetch_gate.lock().await;
        if let Some(value) = slot.fresh(self.ttl) {
            return Ok(value);
        }

        let value = fetch().await?;
        slot.store(value.clone());
        Ok(value)
    }
}

/// Basic route identity pulled from the routes table, used by the CLI to
/// build a [`crate::model::RouteSelector`] and direction labels.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub route_id: String,
    pub short_name: String,
    pub long_name: String,
    pub route_type: Option<i64>,
}

/// GTFS reference data behind independent per-resource caches.
pub struct Catalog {
    api: Arc<dyn TransitApi>,
    routes: TtlCache<(), Arc<Vec<Value>>>,
    stops: TtlCache<(), Arc<Vec<Value>>>,
    patterns: TtlCache<(String, u8), Arc<Vec<StopPatternEntry>>>,
}

impl Catalog {
    pub fn new(api: Arc<dyn TransitApi>) -> Self {
        Self::with_ttl(api, DEFAULT_TTL)
    }

    pub fn with_ttl(api: Arc<dyn TransitApi>, ttl: Duration) -> Self {
        Self {
            api,
            routes: TtlCache::new(ttl),
            stops: TtlCache::new(ttl),
            patterns: TtlCache::new(ttl),
        }
    }

    pub async fn routes(&self) -> Result<Arc<Vec<Value>>> {
        self.routes
            .get_or_fetch((), || async {
                Ok(Arc::new(self.api.routes().await.context("fetching routes")?))
            })
            .await
    }

    pub async fn stops(&self) -> Result<Arc<Vec<Value>>> {
        self.stops
            .get_or_fetch((), || async {
                Ok(Arc::new(self.api.stops().await.context("fetching stops")?))
            })
            .await
    }

    /// Looks a route up by id in the cached routes table.
    pub async fn route_info(&self, route_id: &str) -> Result<Option<RouteInfo>> {
        let routes = self.routes().await?;
        Ok(routes
            .iter()
            .find(|r| loose_str(r, "route_id").as_deref() == Some(route_id))
            .map(|r| RouteInfo {
                route_id: route_id.to_string(),
                short_name: loose_str(r, "route_short_name").unwrap_or_default(),
                long_name: loose_str(r, "route_long_name").unwrap_or_default(),
                route_type: loose_i64(r, "route_type"),
            }))
    }

    /// The ordered stop pattern for a route/direction.
    ///
    /// An unknown route or a direction with no trips yields an empty pattern,
    /// not an error; upstream failures propagate.
    pub async fn stop_pattern(
        &self,
        route_id: &str,
        direction: u8,
    ) -> Result<Arc<Vec<StopPatternEntry>>> {
        self.patterns
            .get_or_fetch((route_id.to_string(), direction), || {
                self.assemble_pattern(route_id, direction)
            })
            .await
    }

    /// trips → first trip of the direction → its stop_times (sequence
    /// order) → joined with the stops table for names and coordinates.
    async fn assemble_pattern(
        &self,
        route_id: &str,
        direction: u8,
    ) -> Result<Arc<Vec<StopPatternEntry>>> {
        let trips = self.api.trips().await.context("fetching trips")?;

        let sample_trip_id = trips
            .iter()
            .find(|t| {
                loose_str(t, "route_id").as_deref() == Some(route_id)
                    && loose_i64(t, "direction_id") == Some(i64::from(direction))
            })
            .and_then(|t| loose_str(t, "trip_id"));

        let Some(trip_id) = sample_trip_id else {
            warn!(route_id = %route_id, direction, "no trips for route/direction");
            return Ok(Arc::new(Vec::new()));
        };

        let mut stop_times = self
            .api
            .stop_times(&trip_id)
            .await
            .with_context(|| format!("fetching stop times for trip {trip_id}"))?;
        stop_times.sort_by_key(|st| loose_i64(st, "stop_sequence").unwrap_or(0));

        let stops = self.stops().await?;
        let stops_by_id: HashMap<String, &Value> = stops
            .iter()
            .filter_map(|s| loose_str(s, "stop_id").map(|id| (id, s)))
            .collect();

        let entries: Vec<StopPatternEntry> = stop_times
            .iter()
            .filter_map(|st| {
                let stop_id = loose_str(st, "stop_id")?;
                let sequence = loose_i64(st, "stop_sequence")? as u32;
                let stop = stops_by_id.get(&stop_id).copied();
                if stop.is_none() {
                    // keep the stop anyway: the timeline must show every
                    // scheduled stop even when the stops table is behind
                    warn!(stop_id = %stop_id, "stop missing from stops table");
                }
                Some(StopPatternEntry {
                    stop_name: stop
                        .and_then(|s| loose_str(s, "stop_name"))
                        .unwrap_or_else(|| stop_id.clone()),
                    scheduled_arrival: loose_str(st, "arrival_time"),
                    scheduled_departure: loose_str(st, "departure_time"),
                    stop_lat: stop.and_then(|s| s.get("stop_lat")).and_then(Value::as_f64),
                    stop_lon: stop.and_then(|s| s.get("stop_lon")).and_then(Value::as_f64),
                    stop_id,
                    sequence,
                })
            })
            .collect();

        Ok(Arc::new(entries))
    }
}
