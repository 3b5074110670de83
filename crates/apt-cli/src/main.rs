//! Batch entry point: loads configuration, connects to the event store,
//! and runs one `Pipeline::run_analysis` over a time range given on the
//! command line (or the last 24 hours by default).

use apt_common::config::Config;
use apt_common::sink::{EventSink, GraphSink};
use apt_engine::pipeline::Pipeline;
use apt_sink_sql::{init_db, test_connection, MySqlEventSink, MySqlGraphSink};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("starting campaign-graph analysis run");

    let pool = match init_db().await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to event store, aborting");
            std::process::exit(1);
        }
    };

    if let Err(err) = test_connection(&pool).await {
        tracing::error!(error = %err, "event store connection test failed, aborting");
        std::process::exit(1);
    }

    let config = Arc::new(Config::from_env());
    let event_sink: Arc<dyn EventSink> = Arc::new(MySqlEventSink::new(pool.clone()));
    let graph_sink: Arc<dyn GraphSink> = Arc::new(MySqlGraphSink::new(pool));

    let (t0, t1) = parse_range(std::env::args().skip(1).collect());
    tracing::info!(t0 = %t0, t1 = %t1, "analysis window");

    let pipeline = Pipeline::new(config, event_sink, graph_sink);
    match pipeline.run_analysis(t0, t1).await {
        Ok(outcome) => {
            tracing::info!(
                nodes = outcome.nodes_written,
                edges = outcome.edges_written,
                paths = outcome.attack_paths.len(),
                "pipeline run succeeded"
            );
        }
        Err(err) => {
            tracing::error!(error = %err, "pipeline run failed");
            std::process::exit(1);
        }
    }
}

/// Accepts zero, one, or two RFC 3339 timestamps as `[t0, t1]`; falls
/// back to "last 24 hours" for anything unparsed.
fn parse_range(args: Vec<String>) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let default_t0 = now - Duration::hours(24);

    let t0 = args
        .first()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(default_t0);

    let t1 = args
        .get(1)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    (t0, t1)
}
