//! The Bayesian Inferer (§4.5): scores each adjacent phase pair in a
//! correlator output sequence against constant prior/transition tables.

use apt_common::config::Config;
use apt_common::model::{AttackNode, AttackPath};

pub struct BayesianInferer<'a> {
    config: &'a Config,
}

impl<'a> BayesianInferer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Emits one `AttackPath` per adjacent pair in `nodes`, rounded to
    /// two decimal places. Fewer than two nodes yields an empty result.
    pub fn generate_paths(&self, nodes: &[AttackNode]) -> Vec<AttackPath> {
        if nodes.len() < 2 {
            return Vec::new();
        }

        nodes
            .windows(2)
            .map(|pair| {
                let (from, to) = (pair[0].phase, pair[1].phase);
                let raw = self.config.prior(from) * self.config.transition(from, to);
                AttackPath {
                    phases: vec![from, to],
                    confidence: (raw * 100.0).round() / 100.0,
                }
            })
            .collect()
    }
}
