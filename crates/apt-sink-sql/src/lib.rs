//! `sqlx`-backed `EventSink`/`GraphSink` implementations over MySQL.
//! `replace_graph` is implemented as two ordinary tables (`attack_nodes`,
//! `attack_edges`) cleared and rewritten inside one transaction, rather
//! than a dedicated graph-database driver.

pub mod pool;
pub mod queries;

use apt_common::error::PipelineError;
use apt_common::model::{AptEvent, AttackAlert, AttackEdge, AttackNode, TcpFlow};
use apt_common::sink::{EventSink, EventTransaction, GraphSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pool::DbPool;
use sqlx::Transaction;

pub use pool::{init_db, test_connection};

#[derive(Clone)]
pub struct MySqlEventSink {
    pool: DbPool,
}

impl MySqlEventSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for MySqlEventSink {
    async fn begin_transaction(&self) -> Result<Box<dyn EventTransaction>, PipelineError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| PipelineError::SinkUnavailable(err.to_string()))?;
        Ok(Box::new(MySqlEventTransaction { tx: Some(tx) }))
    }

    async fn find_events(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<AptEvent>, PipelineError> {
        queries::find_events(&self.pool, window_start, window_end)
            .await
            .map_err(|err| PipelineError::SinkUnavailable(err.to_string()))
    }

    async fn find_flows(
        &self,
        client_ip: &str,
        t_lo: DateTime<Utc>,
        t_hi: DateTime<Utc>,
    ) -> Result<Vec<TcpFlow>, PipelineError> {
        queries::find_flows(&self.pool, client_ip, t_lo, t_hi)
            .await
            .map_err(|err| PipelineError::SinkUnavailable(err.to_string()))
    }

    async fn find_alerts(&self) -> Result<Vec<AttackAlert>, PipelineError> {
        queries::find_alerts(&self.pool)
            .await
            .map_err(|err| PipelineError::SinkUnavailable(err.to_string()))
    }
}

pub struct MySqlEventTransaction {
    tx: Option<Transaction<'static, sqlx::MySql>>,
}

#[async_trait]
impl EventTransaction for MySqlEventTransaction {
    async fn create(&mut self, event: &AptEvent) -> Result<(), PipelineError> {
        let tx = self.tx.as_mut().expect("transaction used after commit/rollback");
        queries::insert_event(tx, event)
            .await
            .map_err(|err| PipelineError::SinkUnavailable(err.to_string()))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), PipelineError> {
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.commit().await.map_err(|err| PipelineError::SinkUnavailable(err.to_string()))
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), PipelineError> {
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.rollback().await.map_err(|err| PipelineError::SinkUnavailable(err.to_string()))
    }
}

#[derive(Clone)]
pub struct MySqlGraphSink {
    pool: DbPool,
}

impl MySqlGraphSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphSink for MySqlGraphSink {
    async fn replace_graph(&self, nodes: &[AttackNode], edges: &[AttackEdge]) -> Result<(), PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| PipelineError::GraphWriteFailure(err.to_string()))?;

        queries::clear_graph(&mut tx)
            .await
            .map_err(|err| PipelineError::GraphWriteFailure(err.to_string()))?;

        for node in nodes {
            queries::insert_node(&mut tx, node)
                .await
                .map_err(|err| PipelineError::GraphWriteFailure(err.to_string()))?;
        }
        for edge in edges {
            queries::insert_edge(&mut tx, edge)
                .await
                .map_err(|err| PipelineError::GraphWriteFailure(err.to_string()))?;
        }

        tx.commit().await.map_err(|err| PipelineError::GraphWriteFailure(err.to_string()))
    }
}
