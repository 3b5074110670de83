//! Error types surfaced by the core pipeline (§7).

use thiserror::Error;

/// Errors the detection/correlation/graph pipeline can surface.
///
/// Per the failure-semantics policy: `MalformedEvent`, `EmptyWindow` and
/// `InvalidTransition` are always handled internally (logged, offending
/// item skipped) and never propagate out of `run_analysis`.
/// `SinkUnavailable` and `GraphWriteFailure` are the only variants that
/// make a pipeline run report failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("event sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("unmapped event_name '{0}' in correlator window")]
    MalformedEvent(String),

    #[error("correlator window produced no phase")]
    EmptyWindow,

    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("graph sink replace_graph failed: {0}")]
    GraphWriteFailure(String),
}

impl PipelineError {
    /// Whether this error should fail the whole pipeline run (§7: "sink
    /// errors do" abort the run, detection/analysis errors never do).
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::SinkUnavailable(_) | PipelineError::GraphWriteFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sink_errors_are_run_fatal() {
        assert!(PipelineError::SinkUnavailable("x".into()).is_run_fatal());
        assert!(PipelineError::GraphWriteFailure("x".into()).is_run_fatal());
        assert!(!PipelineError::EmptyWindow.is_run_fatal());
        assert!(!PipelineError::MalformedEvent("x".into()).is_run_fatal());
        assert!(!PipelineError::InvalidTransition {
            from: "a".into(),
            to: "b".into()
        }
        .is_run_fatal());
    }
}
