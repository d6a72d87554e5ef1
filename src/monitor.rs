//! Polling front-end over the timeline builder.
//!
//! One monitor per (route, direction). A build gate guarantees at most one
//! build in flight per monitor: an overlapping refresh waits and reuses the
//! finished build's snapshot instead of starting its own. The last good
//! snapshot is retained across failed polls so the host always has
//! something to display, with the failure recorded alongside.

use chrono::Utc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::BuildError;
use crate::model::{RouteSelector, TimelineSnapshot};
use crate::timeline::TimelineBuilder;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct MonitorState {
    snapshot: Option<TimelineSnapshot>,
    last_error: Option<String>,
    /// Bumped on every successful build; lets waiters detect that the build
    /// they overlapped with already produced a fresh snapshot.
    epoch: u64,
}

pub struct RouteMonitor {
    builder: TimelineBuilder,
    target: RouteSelector,
    build_gate: Mutex<()>,
    state: RwLock<MonitorState>,
}

impl RouteMonitor {
    pub fn new(builder: TimelineBuilder, target: RouteSelector) -> Self {
        Self {
            builder,
            target,
            build_gate: Mutex::new(()),
            state: RwLock::new(MonitorState::default()),
        }
    }

    pub fn target(&self) -> &RouteSelector {
        &self.target
    }

    /// The last successful snapshot, if any poll has succeeded yet.
    pub fn latest(&self) -> Option<TimelineSnapshot> {
        self.state
            .read()
            .expect("monitor state poisoned")
            .snapshot
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state
            .read()
            .expect("monitor state poisoned")
            .last_error
            .clone()
    }

    /// Rebuilds the timeline, or rides on a concurrent rebuild.
    ///
    /// Callers that were waiting while another refresh completed get that
    /// refresh's snapshot; a failed build leaves the previous snapshot in
    /// place and surfaces the error to the caller that drove the build.
    pub async fn refresh(&self) -> Result<TimelineSnapshot, BuildError> {
        let epoch_at_entry = self.state.read().expect("monitor state poisoned").epoch;

        let _gate = self.build_gate.lock().await;
        {
            let state = self.state.read().expect("monitor state poisoned");
            if state.epoch > epoch_at_entry {
                if let Some(snapshot) = &state.snapshot {
                    return Ok(snapshot.clone());
                }
            }
        }

        match self.builder.build(&self.target, Utc::now()).await {
            Ok(snapshot) => {
                let mut state = self.state.write().expect("monitor state poisoned");
                state.snapshot = Some(snapshot.clone());
                state.last_error = None;
                state.epoch += 1;
                Ok(snapshot)
            }
            Err(e) => {
                let mut state = self.state.write().expect("monitor state poisoned");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Polls until `shutdown` flips. An in-flight build is dropped on
    /// shutdown; its partial results are discarded, never applied.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "poll failed, keeping last snapshot");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}
