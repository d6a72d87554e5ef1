//! CLI entry point for the transit timeline tool.
//!
//! Provides subcommands for discovering routes, building a one-shot
//! reconciled timeline, watching a route continuously, and probing the
//! configured API key.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_timeline::{
    catalog::Catalog,
    infra::metlink::MetlinkClient,
    matcher::{loose_i64, loose_str},
    model::RouteSelector,
    monitor::RouteMonitor,
    output::{PollRecord, append_summary, direction_label, render_timeline, to_json},
    services::transit_api::TransitApi,
    timeline::TimelineBuilder,
};

#[derive(Parser)]
#[command(name = "transit_timeline")]
#[command(about = "Reconciled real-time route timelines from GTFS feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List routes, optionally filtered by transport mode
    Routes {
        /// GTFS route_type number or name (train, bus, ferry, cable-car, school-bus)
        #[arg(short, long)]
        mode: Option<String>,
    },
    /// Build the timeline for a route/direction once
    Timeline {
        /// GTFS route_id
        #[arg(short, long)]
        route: String,

        /// GTFS direction_id (0 or 1)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=1))]
        direction: u8,

        /// Print the snapshot as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,

        /// CSV file to append a poll summary row to
        #[arg(long)]
        history: Option<String>,
    },
    /// Poll a route/direction continuously
    Watch {
        /// GTFS route_id
        #[arg(short, long)]
        route: String,

        /// GTFS direction_id (0 or 1)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=1))]
        direction: u8,

        /// Seconds between polls
        #[arg(short, long, default_value_t = transit_timeline::monitor::DEFAULT_POLL_INTERVAL.as_secs())]
        interval: u64,

        /// Number of polls to run (0 = until Ctrl+C)
        #[arg(short, long, default_value_t = 0)]
        samples: usize,

        /// CSV file to append poll summary rows to
        #[arg(long)]
        history: Option<String>,
    },
    /// Probe the configured API key against the agency endpoint
    ValidateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_timeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_timeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Routes { mode } => list_routes(mode).await?,
        Commands::Timeline {
            route,
            direction,
            json,
            history,
        } => {
            let api = build_api();
            let builder = TimelineBuilder::new(api);
            let selector = selector_for(builder.catalog(), &route, direction).await;
            let monitor = RouteMonitor::new(builder, selector);

            let snapshot = monitor.refresh().await?;
            if json {
                println!("{}", to_json(&snapshot)?);
            } else {
                println!("{}", render_timeline(&snapshot));
            }
            if let Some(path) = history {
                append_summary(&path, &PollRecord::from_snapshot(&snapshot))?;
            }
        }
        Commands::Watch {
            route,
            direction,
            interval,
            samples,
            history,
        } => watch_route(route, direction, interval, samples, history).await?,
        Commands::ValidateKey => {
            let api = build_api();
            if api.validate_key().await? {
                info!("API key accepted");
            } else {
                anyhow::bail!("API key rejected by the agency endpoint");
            }
        }
    }

    Ok(())
}

/// Builds the production API client from the environment.
fn build_api() -> Arc<dyn TransitApi> {
    let api_key = std::env::var("METLINK_API_KEY").expect("METLINK_API_KEY must be set");
    match std::env::var("METLINK_BASE_URL") {
        Ok(base_url) => Arc::new(MetlinkClient::with_base_url(api_key, base_url)),
        Err(_) => Arc::new(MetlinkClient::new(api_key)),
    }
}

/// Resolves the route's short name from the catalog, falling back to the id
/// when the routes table is unavailable. Also logs the display labels for
/// both directions so the user can tell which direction they asked for.
async fn selector_for(catalog: &Arc<Catalog>, route_id: &str, direction: u8) -> RouteSelector {
    match catalog.route_info(route_id).await {
        Ok(Some(info)) => {
            info!(
                route = %info.short_name,
                heading = %direction_label(&info.long_name, direction),
                "route resolved"
            );
            let short_name = if info.short_name.is_empty() {
                route_id.to_string()
            } else {
                info.short_name
            };
            RouteSelector::new(route_id, short_name, direction)
        }
        Ok(None) => {
            warn!(route_id = %route_id, "route not in catalog, matching by id only");
            RouteSelector::new(route_id, route_id, direction)
        }
        Err(e) => {
            warn!(error = %e, "routes table unavailable, matching by id only");
            RouteSelector::new(route_id, route_id, direction)
        }
    }
}

#[tracing::instrument]
async fn list_routes(mode: Option<String>) -> Result<()> {
    let api = build_api();
    let catalog = Catalog::new(api);

    let wanted_type = match mode.as_deref() {
        Some(m) => match route_type_from_mode(m) {
            Some(t) => Some(t),
            None => anyhow::bail!("unknown transport mode: {m}"),
        },
        None => None,
    };

    let routes = catalog.routes().await?;
    let mut shown = 0usize;

    for route in routes.iter() {
        let route_type = loose_i64(route, "route_type");
        if let Some(wanted) = wanted_type {
            if route_type != Some(wanted) {
                continue;
            }
        }
        shown += 1;
        info!(
            route_id = %loose_str(route, "route_id").unwrap_or_default(),
            short_name = %loose_str(route, "route_short_name").unwrap_or_default(),
            long_name = %loose_str(route, "route_long_name").unwrap_or_default(),
            mode = route_type_name(route_type),
            "Route"
        );
    }

    info!(total = routes.len(), shown, "Route list summary");
    Ok(())
}

#[tracing::instrument(skip(history))]
async fn watch_route(
    route: String,
    direction: u8,
    interval: u64,
    samples: usize,
    history: Option<String>,
) -> Result<()> {
    let api = build_api();
    let builder = TimelineBuilder::new(api);
    let selector = selector_for(builder.catalog(), &route, direction).await;
    let monitor = Arc::new(RouteMonitor::new(builder, selector));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    if samples == 0 {
        info!(interval, "Polling until Ctrl+C");
    } else {
        info!(interval, samples, "Starting polls");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut completed = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match monitor.refresh().await {
                    Ok(snapshot) => {
                        println!("{}", render_timeline(&snapshot));
                        info!(
                            next_eta = snapshot.next_eta_display().unwrap_or("unknown"),
                            destination = snapshot.destination_name().unwrap_or("none"),
                            "poll complete"
                        );
                        if let Some(path) = &history {
                            if let Err(e) = append_summary(path, &PollRecord::from_snapshot(&snapshot)) {
                                error!(error = %e, "failed to append poll history");
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "poll failed");
                        if let Some(last) = monitor.latest() {
                            info!(generated_at = %last.generated_at, "showing last known timeline");
                            println!("{}", render_timeline(&last));
                        }
                    }
                }
                completed += 1;
                if samples > 0 && completed >= samples {
                    break;
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("stopping watch");
                    break;
                }
            }
        }
    }

    Ok(())
}

fn route_type_from_mode(mode: &str) -> Option<i64> {
    if let Ok(n) = mode.parse::<i64>() {
        return Some(n);
    }
    match mode.to_ascii_lowercase().as_str() {
        "train" | "rail" => Some(2),
        "bus" => Some(3),
        "ferry" => Some(4),
        "cable-car" | "cablecar" => Some(5),
        "school-bus" | "school" => Some(712),
        _ => None,
    }
}

fn route_type_name(route_type: Option<i64>) -> &'static str {
    match route_type {
        Some(2) => "Train",
        Some(3) => "Bus",
        Some(4) => "Ferry",
        Some(5) => "Cable Car",
        Some(712) => "School Bus",
        _ => "Other",
    }
}
