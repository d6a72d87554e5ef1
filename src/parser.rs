//! Decoding for the GTFS-realtime trip-updates feed.
//!
//! The upstream serves the feed as JSON when asked nicely and as a protobuf
//! [`FeedMessage`] otherwise; some deployments ignore the Accept header
//! entirely. The body is sniffed rather than trusted: JSON first, protobuf
//! as the fallback.

use anyhow::Result;
use gtfs_rt::FeedMessage;
use prost::Message;
use serde_json::Value;
use tracing::warn;

/// A decoded trip-updates body, shape preserved until record extraction.
#[derive(Debug)]
pub enum TripUpdatesBody {
    /// Loose JSON feed entities.
    Json(Vec<Value>),
    /// A protobuf GTFS-realtime message.
    Protobuf(FeedMessage),
}

/// Decodes a raw trip-updates response.
///
/// # Errors
///
/// Returns an error only when the bytes are neither JSON nor a valid
/// protobuf `FeedMessage`.
pub fn parse_trip_updates(bytes: &[u8]) -> Result<TripUpdatesBody> {
    if let Ok(body) = serde_json::from_slice::<Value>(bytes) {
        return Ok(TripUpdatesBody::Json(json_entities(body)));
    }
    Ok(TripUpdatesBody::Protobuf(FeedMessage::decode(bytes)?))
}

/// Unwraps the entity list from either a bare array or the standard
/// `{header, entity: [...]}` envelope. Anything else is empty, not fatal.
fn json_entities(body: Value) -> Vec<Value> {
    match body {
        Value::Array(entities) => entities,
        Value::Object(mut map) => match map.remove("entity") {
            Some(Value::Array(entities)) => entities,
            Some(_) | None => {
                warn!("trip-updates JSON has no entity list");
                Vec::new()
            }
        },
        _ => {
            warn!("unexpected trip-updates JSON shape");
            Vec::new()
        }
    }
}
