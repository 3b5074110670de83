//! Sink traits (§6): the seam between the detection/correlation/graph
//! pipeline and whatever persistence layer backs it. `apt-sink-sql`
//! provides the reference `sqlx` implementation; tests use in-memory
//! fakes against these same traits.

use crate::error::PipelineError;
use crate::model::{AptEvent, AttackAlert, AttackEdge, AttackNode, TcpFlow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read/write access to the event store the pipeline runs against.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn begin_transaction(&self) -> Result<Box<dyn EventTransaction>, PipelineError>;

    async fn find_events(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<AptEvent>, PipelineError>;

    async fn find_flows(
        &self,
        client_ip: &str,
        t_lo: DateTime<Utc>,
        t_hi: DateTime<Utc>,
    ) -> Result<Vec<TcpFlow>, PipelineError>;

    async fn find_alerts(&self) -> Result<Vec<AttackAlert>, PipelineError>;
}

/// A single atomic batch of event writes: stage every event, then commit
/// or roll back the whole batch together.
#[async_trait]
pub trait EventTransaction: Send {
    async fn create(&mut self, event: &AptEvent) -> Result<(), PipelineError>;
    async fn commit(self: Box<Self>) -> Result<(), PipelineError>;
    async fn rollback(self: Box<Self>) -> Result<(), PipelineError>;
}

/// Persists the campaign graph as a whole-graph replace: callers pass the
/// complete current node/edge set and the sink clears whatever it held
/// before writing the new one, in one transaction.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn replace_graph(
        &self,
        nodes: &[AttackNode],
        edges: &[AttackEdge],
    ) -> Result<(), PipelineError>;
}

/// In-memory fakes for `EventSink`/`GraphSink`, used by this crate's own
/// tests and by `apt-engine`'s pipeline tests.
pub mod fakes {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// In-memory `EventSink`/`GraphSink` used by `apt-engine`'s own tests
    /// and available here for traits' doc examples.
    #[derive(Default, Clone)]
    pub struct MemorySink {
        pub events: Arc<Mutex<Vec<AptEvent>>>,
        pub flows: Arc<Mutex<Vec<TcpFlow>>>,
        pub alerts: Arc<Mutex<Vec<AttackAlert>>>,
        pub nodes: Arc<Mutex<Vec<AttackNode>>>,
        pub edges: Arc<Mutex<Vec<AttackEdge>>>,
    }

    pub struct MemoryTransaction {
        sink: MemorySink,
        staged: Vec<AptEvent>,
    }

    #[async_trait]
    impl EventSink for MemorySink {
        async fn begin_transaction(&self) -> Result<Box<dyn EventTransaction>, PipelineError> {
            Ok(Box::new(MemoryTransaction {
                sink: self.clone(),
                staged: Vec::new(),
            }))
        }

        async fn find_events(
            &self,
            window_start: DateTime<Utc>,
            window_end: DateTime<Utc>,
        ) -> Result<Vec<AptEvent>, PipelineError> {
            Ok(self
                .events
                .lock()
                .iter()
                .filter(|e| e.start_time >= window_start && e.start_time <= window_end)
                .cloned()
                .collect())
        }

        async fn find_flows(
            &self,
            client_ip: &str,
            t_lo: DateTime<Utc>,
            t_hi: DateTime<Utc>,
        ) -> Result<Vec<TcpFlow>, PipelineError> {
            Ok(self
                .flows
                .lock()
                .iter()
                .filter(|f| f.client_ip == client_ip && f.start_time >= t_lo && f.start_time <= t_hi)
                .cloned()
                .collect())
        }

        async fn find_alerts(&self) -> Result<Vec<AttackAlert>, PipelineError> {
            Ok(self.alerts.lock().clone())
        }
    }

    #[async_trait]
    impl EventTransaction for MemoryTransaction {
        async fn create(&mut self, event: &AptEvent) -> Result<(), PipelineError> {
            self.staged.push(event.clone());
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), PipelineError> {
            self.sink.events.lock().extend(self.staged);
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[async_trait]
    impl GraphSink for MemorySink {
        async fn replace_graph(
            &self,
            nodes: &[AttackNode],
            edges: &[AttackEdge],
        ) -> Result<(), PipelineError> {
            *self.nodes.lock() = nodes.to_vec();
            *self.edges.lock() = edges.to_vec();
            Ok(())
        }
    }
}
