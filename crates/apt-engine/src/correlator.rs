//! The Temporal Correlator (§4.3): sweeps events ordered by `start_time`
//! into gap-closed windows, collapses each window to a single
//! `AttackNode` by majority-vote phase, then filters the resulting
//! sequence against the phase state machine.

use apt_common::config::Config;
use apt_common::model::{AptEvent, AttackNode, Phase};
use chrono::Duration;
use std::collections::HashMap;
use tracing::warn;

pub struct TemporalCorrelator<'a> {
    config: &'a Config,
}

impl<'a> TemporalCorrelator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Runs the sweep + window-close + valid-transition filter over
    /// `events`, which must already be sorted by `start_time` ascending
    /// (the caller re-sorts after fetching from the sink, since no
    /// cross-alert ordering is guaranteed — §5).
    pub fn correlate(&self, events: &[AptEvent]) -> Vec<AttackNode> {
        let windows = self.sweep(events);
        let nodes: Vec<AttackNode> = windows
            .into_iter()
            .filter_map(|window| self.detect_single_phase(&window))
            .collect();
        self.filter_valid_transitions(nodes)
    }

    fn sweep<'e>(&self, events: &'e [AptEvent]) -> Vec<Vec<&'e AptEvent>> {
        let gap = Duration::minutes(self.config.thresholds.correlator_window_minutes);
        let mut windows = Vec::new();
        let mut current: Vec<&AptEvent> = Vec::new();

        for event in events {
            if let Some(last) = current.last() {
                if event.start_time - last.start_time > gap {
                    windows.push(std::mem::take(&mut current));
                }
            }
            current.push(event);
        }
        if !current.is_empty() {
            windows.push(current);
        }
        windows
    }

    fn detect_single_phase(&self, window: &[&AptEvent]) -> Option<AttackNode> {
        if window.is_empty() {
            return None;
        }

        let mut tally: Vec<(Phase, u32)> = Vec::new();
        for event in window {
            match tally.iter_mut().find(|(phase, _)| *phase == event.event_type) {
                Some((_, count)) => *count += 1,
                None => tally.push((event.event_type, 1)),
            }
        }

        // `Iterator::max_by_key` returns the *last* maximal element on a
        // tie, which would favour whichever phase happens to appear last
        // in the window. Scan manually so the first phase to reach the
        // max count wins instead, matching the majority-vote semantics.
        let mut best: Option<(Phase, u32)> = None;
        for (phase, count) in tally {
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((phase, count)),
            }
        }
        let (phase, max_count) = best.expect("window is non-empty");

        if max_count < self.config.thresholds.phase_threshold {
            warn!(phase = %phase, max_count, "correlator window rejected below phase threshold");
            return None;
        }

        let mut ip_counts: HashMap<&str, u32> = HashMap::new();
        for event in window {
            *ip_counts.entry(event.source_ip.as_str()).or_insert(0) += 1;
        }
        let modal_source_ip = ip_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(ip, _)| ip.to_string())
            .unwrap_or_default();

        Some(AttackNode {
            phase,
            timestamp: window[0].start_time,
            source_ip: modal_source_ip,
            dest_ip: window[0].dest_ip.clone(),
            related_log_ids: window.iter().map(|e| e.id).collect(),
        })
    }

    /// Keeps the first node unconditionally; each subsequent node is
    /// kept only if its phase is an allowed successor of the last
    /// *accepted* node's phase (not the immediately preceding raw node).
    fn filter_valid_transitions(&self, nodes: Vec<AttackNode>) -> Vec<AttackNode> {
        let mut kept: Vec<AttackNode> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match kept.last() {
                None => kept.push(node),
                Some(prev) if prev.phase.allowed_successors().contains(&node.phase) => kept.push(node),
                Some(prev) => {
                    warn!(from = %prev.phase, to = %node.phase, "dropping node that violates phase transition");
                }
            }
        }
        kept
    }
}
