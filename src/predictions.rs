//! Concurrent stop-level prediction fetching.
//!
//! One upstream call per stop, fanned out under a bounded semaphore so a
//! route with dozens of stops completes in `N / concurrency` round trips
//! without tripping upstream rate limits. A failed stop never aborts the
//! others; it simply contributes no predictions and the timeline builder
//! falls back down the precedence chain.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, warn};

use crate::matcher;
use crate::merge::PREDICTIONS_PER_STOP;
use crate::model::{Prediction, RouteSelector, TimeSource};
use crate::services::transit_api::TransitApi;

pub const DEFAULT_CONCURRENCY: usize = 5;

pub struct PredictionFetcher {
    api: Arc<dyn TransitApi>,
    concurrency: usize,
}

impl PredictionFetcher {
    pub fn new(api: Arc<dyn TransitApi>) -> Self {
        Self::with_concurrency(api, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(api: Arc<dyn TransitApi>, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches predictions for every stop, already matched to `target` and
    /// capped to the earliest few per stop.
    ///
    /// Every requested stop gets an entry; stops whose fetch failed map to
    /// an empty list.
    pub async fn fetch_all(
        &self,
        stop_ids: &[String],
        target: &RouteSelector,
    ) -> HashMap<String, Vec<Prediction>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(stop_ids.len());

        for stop_id in stop_ids {
            let sem = semaphore.clone();
            let api = self.api.clone();
            let stop_id = stop_id.clone();
            let target = target.clone();
            let span = tracing::debug_span!("stop_predictions", stop_id = %stop_id);

            tasks.push(tokio::spawn(
                async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    let records = match api.stop_predictions(&stop_id).await {
                        Ok(records) => records,
                        Err(e) => {
                            warn!(error = %e, "prediction fetch failed, continuing without");
                            Vec::new()
                        }
                    };
                    let predictions = matched_predictions(&records, &target);
                    (stop_id, predictions)
                }
                .instrument(span),
            ));
        }

        let mut by_stop = HashMap::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok((stop_id, predictions)) => {
                    by_stop.insert(stop_id, predictions);
                }
                Err(e) => warn!(error = %e, "prediction task aborted"),
            }
        }
        by_stop
    }
}

fn matched_predictions(records: &[Value], target: &RouteSelector) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = records
        .iter()
        .filter(|r| matcher::matches_route(r, target))
        .filter_map(|r| matcher::to_prediction(r, target, TimeSource::Realtime))
        .collect();
    predictions.sort_by(|a, b| a.expected_time.cmp(&b.expected_time));
    predictions.truncate(PREDICTIONS_PER_STOP);
    predictions
}
