use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient, fetch_bytes, fetch_json};
use crate::services::transit_api::TransitApi;

pub const DEFAULT_BASE_URL: &str = "https://api.opendata.metlink.org.nz/v1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const AGENCY: &str = "/gtfs/agency";
const ROUTES: &str = "/gtfs/routes";
const STOPS: &str = "/gtfs/stops";
const TRIPS: &str = "/gtfs/trips";
const STOP_TIMES: &str = "/gtfs/stop_times";
const TRIP_UPDATES: &str = "/gtfs-rt/tripupdates";
const STOP_PREDICTIONS: &str = "/stop-predictions";

/// [`TransitApi`] implementation for the Metlink Open Data API.
pub struct MetlinkClient<C> {
    client: C,
    base_url: String,
}

impl MetlinkClient<ApiKey<BasicClient>> {
    /// Builds the production client stack: timeout-bounded HTTP transport
    /// with the API key injected as the `x-api-key` header.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let transport = BasicClient::with_timeout(REQUEST_TIMEOUT);
        Self {
            client: ApiKey::x_api_key(transport, api_key),
            base_url: base_url.into(),
        }
    }
}

impl<C: HttpClient> MetlinkClient<C> {
    /// Wraps an arbitrary [`HttpClient`], mostly for tests.
    pub fn from_client(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Fetches an endpoint expected to return a JSON array. A non-array body
    /// is tolerated as empty rather than failing the caller.
    async fn fetch_records(&self, endpoint: &str) -> Result<Vec<Value>> {
        let body = fetch_json(&self.client, &self.url(endpoint)).await?;
        Ok(into_records(body, endpoint))
    }
}

fn into_records(body: Value, endpoint: &str) -> Vec<Value> {
    match body {
        Value::Array(records) => records,
        other => {
            warn!(
                endpoint,
                got = other_type(&other),
                "expected a JSON array, treating as empty"
            );
            Vec::new()
        }
    }
}

fn other_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl<C: HttpClient> TransitApi for MetlinkClient<C> {
    async fn validate_key(&self) -> Result<bool> {
        match fetch_json(&self.client, &self.url(AGENCY)).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(error = %e, "agency probe failed");
                Ok(false)
            }
        }
    }

    async fn routes(&self) -> Result<Vec<Value>> {
        self.fetch_records(ROUTES).await
    }

    async fn stops(&self) -> Result<Vec<Value>> {
        self.fetch_records(STOPS).await
    }

    async fn trips(&self) -> Result<Vec<Value>> {
        self.fetch_records(TRIPS).await
    }

    async fn stop_times(&self, trip_id: &str) -> Result<Vec<Value>> {
        let endpoint = format!("{STOP_TIMES}?trip_id={trip_id}");
        self.fetch_records(&endpoint).await
    }

    async fn stop_predictions(&self, stop_id: &str) -> Result<Vec<Value>> {
        let endpoint = format!("{STOP_PREDICTIONS}?stop_id={stop_id}");
        self.fetch_records(&endpoint).await
    }

    async fn trip_updates(&self) -> Result<Vec<u8>> {
        fetch_bytes(&self.client, &self.url(TRIP_UPDATES)).await
    }
}
