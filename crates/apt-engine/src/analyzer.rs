//! The Behaviour Analyzer (§4.2): for each attack alert, drives the rule
//! kit over attacker-pre-window flows and victim-post-window flows, then
//! re-runs zombie-raised rules against every distinct host the victim
//! contacted. Bounded by one semaphore per loop, exactly as the original
//! `sem := make(chan struct{}, 10)` pattern bounds it.

use apt_common::config::Config;
use apt_common::error::PipelineError;
use apt_common::model::{AptEvent, AttackAlert, EventMetadata, IpProfileStore, TcpFlow};
use apt_common::sink::EventSink;
use apt_rules::{RuleContext, ATTACKER_RULES, VICTIM_RULES, ZOMBIE_RULES};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

pub struct BehaviourAnalyzer {
    config: Arc<Config>,
    profiles: Arc<IpProfileStore>,
}

impl BehaviourAnalyzer {
    pub fn new(config: Arc<Config>, profiles: Arc<IpProfileStore>) -> Self {
        Self { config, profiles }
    }

    /// Runs the full analyzer over every alert in `alerts`, persisting
    /// each alert's produced events in its own transaction. A failed
    /// alert or zombie is logged and skipped; only a sink-level failure
    /// aborts the run (§4.7).
    pub async fn analyze_alerts(
        &self,
        alerts: Vec<AttackAlert>,
        sink: &Arc<dyn EventSink>,
    ) -> Result<(), PipelineError> {
        let sem = Arc::new(Semaphore::new(self.config.thresholds.semaphore_capacity));
        let mut handles = Vec::with_capacity(alerts.len());

        for alert in alerts {
            let sem = Arc::clone(&sem);
            let config = Arc::clone(&self.config);
            let profiles = Arc::clone(&self.profiles);
            let sink = Arc::clone(sink);
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore never closed");
                analyze_one_alert(&config, &profiles, &sink, &alert).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_run_fatal() => return Err(err),
                Ok(Err(err)) => warn!(error = %err, "alert analysis failed, skipping"),
                Err(join_err) => warn!(error = %join_err, "alert analysis task panicked"),
            }
        }

        Ok(())
    }
}

async fn analyze_one_alert(
    config: &Config,
    profiles: &IpProfileStore,
    sink: &Arc<dyn EventSink>,
    alert: &AttackAlert,
) -> Result<(), PipelineError> {
    let (attacker_lo, attacker_hi) = attacker_window(alert, config);
    let attacker_flows = sink.find_flows(&alert.source_ip, attacker_lo, attacker_hi).await?;

    let (victim_lo, victim_hi) = victim_window(alert, config);
    let victim_flows = sink.find_flows(&alert.dest_ip, victim_lo, victim_hi).await?;

    let attacker_known = known_from_profile(profiles, &alert.source_ip, &attacker_flows);
    let attacker_ctx = RuleContext {
        config,
        known_server_ips: &attacker_known,
        baseline: profiles.average_connections(&alert.source_ip, config.thresholds.default_baseline),
        attacker_ip: &alert.source_ip,
    };
    let mut events = run_rules_for(ATTACKER_RULES, &attacker_flows, &attacker_ctx, &alert.source_ip, &alert.dest_ip);

    let victim_known = known_from_profile(profiles, &alert.dest_ip, &victim_flows);
    let victim_baseline = profiles.average_connections(&alert.dest_ip, config.thresholds.default_baseline);
    let victim_ctx = RuleContext {
        config,
        known_server_ips: &victim_known,
        baseline: victim_baseline,
        attacker_ip: &alert.source_ip,
    };
    events.extend(run_rules_for(VICTIM_RULES, &victim_flows, &victim_ctx, &alert.dest_ip, &alert.source_ip));

    for flow in &attacker_flows {
        profiles.add_connection(&alert.source_ip, &flow.server_ip, flow.start_time);
    }
    for flow in &victim_flows {
        profiles.add_connection(&alert.dest_ip, &flow.server_ip, flow.start_time);
    }

    let zombie_ips: HashSet<String> = victim_flows.iter().map(|f| f.server_ip.clone()).collect();
    let (zombie_lo, zombie_hi) = zombie_window(alert, config);

    for zombie_ip in zombie_ips {
        match sink.find_flows(&zombie_ip, zombie_lo, zombie_hi).await {
            Ok(zombie_flows) => {
                let known = known_from_profile(profiles, &zombie_ip, &zombie_flows);
                let baseline = profiles.average_connections(&zombie_ip, config.thresholds.default_baseline);
                let ctx = RuleContext {
                    config,
                    known_server_ips: &known,
                    baseline,
                    attacker_ip: &alert.source_ip,
                };
                events.extend(run_rules_for(ZOMBIE_RULES, &zombie_flows, &ctx, &zombie_ip, &alert.source_ip));
                for flow in &zombie_flows {
                    profiles.add_connection(&zombie_ip, &flow.server_ip, flow.start_time);
                }
            }
            Err(err) => warn!(error = %err, zombie_ip = %zombie_ip, "zombie flow lookup failed, skipping this zombie"),
        }
    }

    if events.is_empty() {
        return Ok(());
    }

    let mut tx = sink.begin_transaction().await?;
    let mut failed_at = None;
    for event in &events {
        if let Err(err) = tx.create(event).await {
            warn!(error = %err, "failed to stage event, rolling back alert batch");
            failed_at = Some(err);
            break;
        }
    }
    match failed_at {
        Some(_) => tx.rollback().await,
        None => tx.commit().await,
    }
}

/// Runs one rule batch (attacker, victim, or zombie) over `flows` and
/// turns every firing rule into a timestamped `APTEvent`. Zombie rules
/// already bake their raised severity and `ZOMBIE_`-prefixed `EventKind`
/// into the `DetectionResult` they return, so this just carries it through.
fn run_rules_for(
    rules: &[apt_rules::Rule],
    flows: &[TcpFlow],
    ctx: &RuleContext<'_>,
    source_ip: &str,
    dest_ip: &str,
) -> Vec<AptEvent> {
    let start = flows.first().map(|f| f.start_time).unwrap_or_else(Utc::now);
    let end = flows.last().map(|f| f.end_time).unwrap_or(start);

    rules
        .iter()
        .filter_map(|rule| rule(flows, ctx))
        .map(|detection| AptEvent {
            id: uuid::Uuid::new_v4(),
            start_time: start,
            end_time: end,
            source_ip: source_ip.to_string(),
            dest_ip: dest_ip.to_string(),
            event_name: detection.event_name,
            event_type: detection.phase,
            severity: detection.severity,
            description: detection.description,
            metadata: EventMetadata::default(),
        })
        .collect()
}

fn known_from_profile(profiles: &IpProfileStore, client_ip: &str, flows: &[TcpFlow]) -> HashSet<String> {
    flows
        .iter()
        .map(|f| f.server_ip.clone())
        .filter(|ip| profiles.has_connected(client_ip, ip))
        .collect()
}

/// Attacker-side window: `[alert_time - 24h, alert_time)` (§4.1).
pub fn attacker_window(alert: &AttackAlert, config: &Config) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        alert.log_time - Duration::hours(config.thresholds.pre_attack_window_hours),
        alert.log_time,
    )
}

/// Victim-side window: `[alert_time, alert_time + 48h]` (§4.1).
pub fn victim_window(alert: &AttackAlert, config: &Config) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        alert.log_time,
        alert.log_time + Duration::hours(config.thresholds.post_attack_window_hours),
    )
}

/// Zombie-side window: `[alert_time, alert_time + 72h]` (§4.1).
pub fn zombie_window(alert: &AttackAlert, config: &Config) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        alert.log_time,
        alert.log_time + Duration::hours(config.thresholds.zombie_window_hours),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use apt_common::sink::fakes::MemorySink;
    use chrono::TimeZone;

    fn sample_alert() -> AttackAlert {
        AttackAlert {
            log_time: Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap(),
            source_ip: "1.1.1.1".into(),
            dest_ip: "2.2.2.2".into(),
            event_type: 1,
            protocol: 0,
            action: "alert".into(),
            severity: 4,
        }
    }

    #[test]
    fn window_bounds_match_spec_durations() {
        let config = Config::from_env();
        let alert = sample_alert();
        let (lo, hi) = attacker_window(&alert, &config);
        assert_eq!(hi, alert.log_time);
        assert_eq!(hi - lo, Duration::hours(24));

        let (lo, hi) = victim_window(&alert, &config);
        assert_eq!(lo, alert.log_time);
        assert_eq!(hi - lo, Duration::hours(48));

        let (lo, hi) = zombie_window(&alert, &config);
        assert_eq!(hi - lo, Duration::hours(72));
    }

    #[tokio::test]
    async fn empty_alert_set_produces_no_events() {
        let config = Arc::new(Config::from_env());
        let profiles = Arc::new(IpProfileStore::new());
        let analyzer = BehaviourAnalyzer::new(config, profiles);
        let sink: Arc<dyn EventSink> = Arc::new(MemorySink::default());
        analyzer.analyze_alerts(vec![], &sink).await.unwrap();
    }

    fn test_flow(client_ip: &str, server_ip: &str, at: DateTime<Utc>) -> TcpFlow {
        TcpFlow {
            log_time: at,
            start_time: at,
            end_time: at,
            established_time: None,
            client_ip: client_ip.into(),
            client_port: 40000,
            server_ip: server_ip.into(),
            server_port: 80,
            protocol: 0,
            duration: 1.0,
            up_bytes: 10,
            down_bytes: 10,
            up_bps: 0.0,
            down_bps: 0.0,
            packets_sent: 1,
            packets_received: 1,
            client_plr: 0.0,
            server_plr: 0.0,
            flow_status: "CLOSED".into(),
        }
    }

    /// Mirrors the zombie-promotion scenario (§8.5): the victim contacts
    /// three hosts; one of them ("the zombie") goes on to contact a dozen
    /// previously-unseen IPs within its own window, which must fire the
    /// raised-threshold zombie new-IP rule at its final severity, not a
    /// severity raised twice.
    #[tokio::test]
    async fn zombie_with_new_ip_burst_emits_a_single_severity_five_event() {
        let config = Arc::new(Config::from_env());
        let profiles = Arc::new(IpProfileStore::new());
        let sink = Arc::new(MemorySink::default());
        let alert = sample_alert();

        let victim_flows = vec![
            test_flow(&alert.dest_ip, "5.5.5.1", alert.log_time + Duration::hours(1)),
            test_flow(&alert.dest_ip, "5.5.5.2", alert.log_time + Duration::hours(1)),
            test_flow(&alert.dest_ip, "5.5.5.3", alert.log_time + Duration::hours(1)),
        ];
        let zombie_flows: Vec<TcpFlow> = (0..12)
            .map(|i| test_flow("5.5.5.2", &format!("6.6.6.{i}"), alert.log_time + Duration::hours(2)))
            .collect();
        *sink.flows.lock() = victim_flows.into_iter().chain(zombie_flows).collect();

        let analyzer = BehaviourAnalyzer::new(Arc::clone(&config), profiles);
        let event_sink: Arc<dyn EventSink> = sink.clone();
        analyzer.analyze_alerts(vec![alert], &event_sink).await.unwrap();

        let events = sink.events.lock();
        let zombie_event = events
            .iter()
            .find(|e| e.event_name == apt_common::model::EventKind::ZombieNewIpConnections)
            .expect("zombie new-IP event should have fired");
        assert_eq!(zombie_event.severity, 5);
    }
}
