//! Metlink Open Data API client.

mod client;

pub use client::{DEFAULT_BASE_URL, MetlinkClient, REQUEST_TIMEOUT};
