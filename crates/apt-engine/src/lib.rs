//! Behaviour analysis, temporal correlation, graph building and Bayesian
//! inference over APT campaign events — the detection engine core.

pub mod analyzer;
pub mod correlator;
pub mod graph;
pub mod inference;
pub mod pipeline;

pub mod prelude {
    pub use crate::analyzer::BehaviourAnalyzer;
    pub use crate::correlator::TemporalCorrelator;
    pub use crate::graph::AttackGraphBuilder;
    pub use crate::inference::BayesianInferer;
    pub use crate::pipeline::{Pipeline, PipelineOutcome};
}
