//! Shared data model, configuration and sink traits for the APT
//! campaign-graph engine. Depended on by the rule kit (`apt-rules`), the
//! analysis pipeline (`apt-engine`), the `sqlx`-backed sink adapters
//! (`apt-sink-sql`) and the binary (`apt-cli`).

pub mod config;
pub mod error;
pub mod model;
pub mod sink;

pub mod prelude {
    pub use crate::config::{Config, Thresholds};
    pub use crate::error::PipelineError;
    pub use crate::model::{
        AptEvent, AttackAlert, AttackEdge, AttackNode, AttackPath, DetectionResult, EventKind,
        EventMetadata, IpProfile, IpProfileStore, Phase, TcpFlow,
    };
    pub use crate::sink::{EventSink, EventTransaction, GraphSink};
}
