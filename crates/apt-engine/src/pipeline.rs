//! The top-level entry point (§6): `run_analysis(range)` wires the
//! Behaviour Analyzer, Temporal Correlator, Attack-Graph Builder and
//! Bayesian Inferer into one run over a time range.

use crate::analyzer::BehaviourAnalyzer;
use crate::correlator::TemporalCorrelator;
use crate::graph::AttackGraphBuilder;
use crate::inference::BayesianInferer;
use apt_common::config::Config;
use apt_common::error::PipelineError;
use apt_common::model::{AttackPath, IpProfileStore};
use apt_common::sink::{EventSink, GraphSink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct Pipeline {
    config: Arc<Config>,
    profiles: Arc<IpProfileStore>,
    event_sink: Arc<dyn EventSink>,
    graph_sink: Arc<dyn GraphSink>,
}

/// What a completed run produced, beyond the boolean success the
/// external contract promises — useful for CLI reporting and tests.
pub struct PipelineOutcome {
    pub events_window: (DateTime<Utc>, DateTime<Utc>),
    pub nodes_written: usize,
    pub edges_written: usize,
    pub attack_paths: Vec<AttackPath>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        event_sink: Arc<dyn EventSink>,
        graph_sink: Arc<dyn GraphSink>,
    ) -> Self {
        Self {
            config,
            profiles: Arc::new(IpProfileStore::new()),
            event_sink,
            graph_sink,
        }
    }

    /// Runs the full pipeline over `[t0, t1]`. Returns `Ok` once events
    /// are persisted, phases correlated, and the graph written; `Err`
    /// on any sink failure (§6, §7). Detection/correlation errors never
    /// propagate from here — they are logged and the offending item is
    /// skipped at the point they occur.
    #[instrument(skip(self))]
    pub async fn run_analysis(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<PipelineOutcome, PipelineError> {
        let alerts = self.event_sink.find_alerts().await?;
        info!(alert_count = alerts.len(), "fetched alerts for analysis window");

        let analyzer = BehaviourAnalyzer::new(Arc::clone(&self.config), Arc::clone(&self.profiles));
        analyzer.analyze_alerts(alerts, &self.event_sink).await?;

        let mut events = self.event_sink.find_events(t0, t1).await?;
        events.sort_by_key(|e| e.start_time);
        info!(event_count = events.len(), "correlating events into phase timeline");

        let correlator = TemporalCorrelator::new(&self.config);
        let nodes = correlator.correlate(&events);

        let graph = AttackGraphBuilder::new();
        graph.ingest_sequence(&nodes);
        let (graph_nodes, graph_edges) = graph.snapshot();

        self.graph_sink
            .replace_graph(&graph_nodes, &graph_edges)
            .await
            .map_err(|err| PipelineError::GraphWriteFailure(err.to_string()))?;

        let inferer = BayesianInferer::new(&self.config);
        let attack_paths = inferer.generate_paths(&nodes);

        Ok(PipelineOutcome {
            events_window: (t0, t1),
            nodes_written: graph_nodes.len(),
            edges_written: graph_edges.len(),
            attack_paths,
        })
    }
}
