//! The rule kit (§4.1): pure functions from a flow set to an optional
//! `DetectionResult`. Rules are first-class function values collected
//! into `&'static` slices rather than a trait-object hierarchy, since
//! none of them carry state beyond what `RuleContext` already supplies.

use apt_common::config::Config;
use apt_common::model::{DetectionResult, EventKind, Phase, TcpFlow};
use std::collections::HashSet;

/// Everything a rule needs besides the flow slice itself.
pub struct RuleContext<'a> {
    pub config: &'a Config,
    /// Server IPs the client had already contacted before this window,
    /// used by the new-IP rules to find genuinely novel destinations.
    pub known_server_ips: &'a HashSet<String>,
    /// This IP's historical average connections per day, or the
    /// configured default baseline when it has no profile yet.
    pub baseline: u32,
    /// The original attacker IP, consulted by the zombie reverse-
    /// connection rule to detect a callback.
    pub attacker_ip: &'a str,
}

pub type Rule = fn(&[TcpFlow], &RuleContext) -> Option<DetectionResult>;

// ---- attacker-side rules (§4.1) ----

pub fn detect_connection_frequency(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let mut buckets = [0u32; 24];
    for flow in flows {
        let hour = flow.start_time.format("%H").to_string().parse::<usize>().unwrap_or(0);
        buckets[hour] += 1;
    }
    if buckets.iter().any(|&count| count > ctx.config.thresholds.connection_frequency) {
        return Some(DetectionResult {
            event_name: EventKind::ConnectionFrequency,
            phase: Phase::InitialAccess,
            description: "connection count in a single hour-of-day bucket exceeded threshold".into(),
            severity: 3,
        });
    }
    None
}

pub fn detect_new_ip_connections(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let novel: HashSet<&str> = flows
        .iter()
        .map(|f| f.server_ip.as_str())
        .filter(|ip| !ctx.known_server_ips.contains(*ip))
        .collect();
    if novel.len() >= ctx.config.thresholds.new_ip_connections {
        return Some(DetectionResult {
            event_name: EventKind::NewIpConnections,
            phase: Phase::InitialAccess,
            description: format!("contacted {} previously-unseen server IPs", novel.len()),
            severity: 2,
        });
    }
    None
}

pub fn detect_port_scan(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let mut per_port: std::collections::HashMap<i32, u32> = std::collections::HashMap::new();
    for flow in flows {
        *per_port.entry(flow.server_port).or_insert(0) += 1;
    }
    let scanned_ports = per_port
        .values()
        .filter(|&&count| count > ctx.config.thresholds.port_scan_contacts_per_port)
        .count();
    if scanned_ports > ctx.config.thresholds.port_scan_ports {
        return Some(DetectionResult {
            event_name: EventKind::PortScan,
            phase: Phase::LateralMovement,
            description: format!("{scanned_ports} distinct ports each contacted beyond threshold"),
            severity: 4,
        });
    }
    None
}

const KNOWN_PROTOCOLS: [i32; 3] = [0, 1, 2];

pub fn detect_protocol_anomaly(flows: &[TcpFlow], _ctx: &RuleContext) -> Option<DetectionResult> {
    if flows.iter().any(|f| !KNOWN_PROTOCOLS.contains(&f.protocol)) {
        return Some(DetectionResult {
            event_name: EventKind::ProtocolAnomaly,
            phase: Phase::LateralMovement,
            description: "flow used a protocol outside HTTP/interactive/media".into(),
            severity: 3,
        });
    }
    None
}

pub static ATTACKER_RULES: &[Rule] = &[
    detect_connection_frequency,
    detect_new_ip_connections,
    detect_port_scan,
    detect_protocol_anomaly,
];

// ---- victim-side rules (§4.1) ----

pub fn detect_outbound_spike(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    // Integer division, preserved literally from the original rate
    // calculation (truncates rather than producing a fractional rate).
    let window_hours = ctx.config.thresholds.post_attack_window_hours.max(1);
    let rate = (flows.len() as i64 / window_hours) as f64;
    if rate > 3.0 * ctx.baseline as f64 {
        return Some(DetectionResult {
            event_name: EventKind::OutboundSpike,
            phase: Phase::CommandAndControl,
            description: format!("outbound connection rate {rate:.2}/h exceeded 3x baseline"),
            severity: 4,
        });
    }
    None
}

pub fn detect_data_exfiltration(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let total_up: i64 = flows.iter().map(|f| f.up_bytes).sum();
    if total_up > ctx.config.thresholds.data_exfil_bytes {
        return Some(DetectionResult {
            event_name: EventKind::DataExfiltration,
            phase: Phase::DataExfiltration,
            description: format!("{total_up} bytes uploaded, exceeding data exfiltration threshold"),
            severity: 5,
        });
    }
    None
}

pub fn detect_malicious_ip_contact(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    if flows.iter().any(|f| ctx.config.is_malicious(&f.server_ip)) {
        return Some(DetectionResult {
            event_name: EventKind::MaliciousIpContact,
            phase: Phase::InitialAccess,
            description: "contacted a server IP on the malicious-IP list".into(),
            severity: 5,
        });
    }
    None
}

pub fn detect_long_connection(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    if flows.iter().any(|f| f.duration > ctx.config.thresholds.long_connection_seconds) {
        return Some(DetectionResult {
            event_name: EventKind::LongConnection,
            phase: Phase::CommandAndControl,
            description: "flow duration exceeded the long-connection threshold".into(),
            severity: 4,
        });
    }
    None
}

pub static VICTIM_RULES: &[Rule] = &[
    detect_outbound_spike,
    detect_data_exfiltration,
    detect_malicious_ip_contact,
    detect_long_connection,
];

// ---- zombie-side rules (§4.1): raised thresholds, severity already
// includes the +1 raise over the analogue's base, ZOMBIE_ prefix. These
// severities are final as emitted; callers must not raise them again.

pub fn detect_zombie_new_ip_connections(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let novel: HashSet<&str> = flows
        .iter()
        .map(|f| f.server_ip.as_str())
        .filter(|ip| !ctx.known_server_ips.contains(*ip))
        .collect();
    if novel.len() >= ctx.config.thresholds.zombie_new_ip_connections {
        return Some(DetectionResult {
            event_name: EventKind::ZombieNewIpConnections,
            phase: Phase::CommandAndControl,
            description: format!("zombie host contacted {} previously-unseen server IPs", novel.len()),
            severity: 5,
        });
    }
    None
}

pub fn detect_zombie_activity_spike(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let window_hours = ctx.config.thresholds.zombie_window_hours.max(1);
    let rate = (flows.len() as i64 / window_hours) as f64;
    if rate > 5.0 * ctx.baseline as f64 {
        return Some(DetectionResult {
            event_name: EventKind::ZombieActivitySpike,
            phase: Phase::CommandAndControl,
            description: format!("zombie host activity rate {rate:.2}/h exceeded 5x baseline"),
            severity: 5,
        });
    }
    None
}

pub fn detect_zombie_reverse_connection(flows: &[TcpFlow], ctx: &RuleContext) -> Option<DetectionResult> {
    let contacts_attacker = flows.iter().filter(|f| f.server_ip == ctx.attacker_ip).count();
    if contacts_attacker > 3 {
        return Some(DetectionResult {
            event_name: EventKind::ZombieReverseConnection,
            phase: Phase::CommandAndControl,
            description: format!("zombie host connected back to the original attacker {contacts_attacker} times"),
            severity: 5,
        });
    }
    None
}

pub static ZOMBIE_RULES: &[Rule] = &[
    detect_zombie_new_ip_connections,
    detect_zombie_activity_spike,
    detect_zombie_reverse_connection,
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn flow(server_ip: &str, server_port: i32, protocol: i32, duration: f64, up_bytes: i64, hour: u32) -> TcpFlow {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap();
        TcpFlow {
            log_time: start,
            start_time: start,
            end_time: start,
            established_time: None,
            client_ip: "10.0.0.1".into(),
            client_port: 5000,
            server_ip: server_ip.into(),
            server_port,
            protocol,
            duration,
            up_bytes,
            down_bytes: 0,
            up_bps: 0.0,
            down_bps: 0.0,
            packets_sent: 0,
            packets_received: 0,
            client_plr: 0.0,
            server_plr: 0.0,
            flow_status: "CLOSED".into(),
        }
    }

    fn ctx(config: &Config, known: &HashSet<String>) -> RuleContext<'_> {
        RuleContext {
            config,
            known_server_ips: known,
            baseline: 10,
            attacker_ip: "203.0.113.9",
        }
    }

    #[test]
    fn connection_frequency_fires_past_threshold() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows: Vec<TcpFlow> = (0..11).map(|i| flow(&format!("1.1.1.{i}"), 80, 0, 1.0, 10, 5)).collect();
        let result = detect_connection_frequency(&flows, &ctx(&config, &known));
        assert!(result.is_some());
        assert_eq!(result.unwrap().phase, Phase::InitialAccess);
    }

    #[test]
    fn connection_frequency_silent_under_threshold() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows: Vec<TcpFlow> = (0..5).map(|i| flow(&format!("1.1.1.{i}"), 80, 0, 1.0, 10, 5)).collect();
        assert!(detect_connection_frequency(&flows, &ctx(&config, &known)).is_none());
    }

    #[test]
    fn new_ip_rule_counts_only_unseen_servers() {
        let config = Config::from_env();
        let mut known = HashSet::new();
        known.insert("5.5.5.5".to_string());
        let flows = vec![
            flow("5.5.5.5", 80, 0, 1.0, 10, 1),
            flow("6.6.6.6", 80, 0, 1.0, 10, 1),
            flow("7.7.7.7", 80, 0, 1.0, 10, 1),
            flow("8.8.8.8", 80, 0, 1.0, 10, 1),
        ];
        let result = detect_new_ip_connections(&flows, &ctx(&config, &known));
        assert!(result.is_some());
    }

    #[test]
    fn port_scan_requires_ports_beyond_threshold() {
        let config = Config::from_env();
        let known = HashSet::new();
        let mut flows = Vec::new();
        for port in 1000..1006 {
            for _ in 0..4 {
                flows.push(flow("9.9.9.9", port, 0, 1.0, 10, 1));
            }
        }
        let result = detect_port_scan(&flows, &ctx(&config, &known));
        assert!(result.is_some());
        assert_eq!(result.unwrap().phase, Phase::LateralMovement);
    }

    #[test]
    fn protocol_anomaly_flags_out_of_range_protocol() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows = vec![flow("9.9.9.9", 80, 7, 1.0, 10, 1)];
        assert!(detect_protocol_anomaly(&flows, &ctx(&config, &known)).is_some());
    }

    #[test]
    fn data_exfiltration_sums_upload_bytes() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows = vec![flow("9.9.9.9", 443, 0, 1.0, 60 * 1024 * 1024, 1), flow("9.9.9.9", 443, 0, 1.0, 50 * 1024 * 1024, 2)];
        let result = detect_data_exfiltration(&flows, &ctx(&config, &known));
        assert!(result.is_some());
        assert_eq!(result.unwrap().phase, Phase::DataExfiltration);
    }

    #[test]
    fn malicious_ip_contact_matches_static_set() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows = vec![flow("198.143.164.251", 443, 0, 1.0, 10, 1)];
        assert!(detect_malicious_ip_contact(&flows, &ctx(&config, &known)).is_some());
    }

    #[test]
    fn long_connection_flags_duration_over_one_hour() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows = vec![flow("9.9.9.9", 443, 0, 4000.0, 10, 1)];
        assert!(detect_long_connection(&flows, &ctx(&config, &known)).is_some());
    }

    #[test]
    fn zombie_reverse_connection_requires_more_than_three_contacts() {
        let config = Config::from_env();
        let known = HashSet::new();
        let flows: Vec<TcpFlow> = (0..4).map(|i| flow("203.0.113.9", 443, 0, 1.0, 10, i)).collect();
        let result = detect_zombie_reverse_connection(&flows, &ctx(&config, &known));
        assert!(result.is_some());
        assert_eq!(result.unwrap().event_name, EventKind::ZombieReverseConnection);
    }

    #[test]
    fn empty_flow_set_yields_no_result_for_any_rule() {
        let config = Config::from_env();
        let known = HashSet::new();
        let context = ctx(&config, &known);
        for rule in ATTACKER_RULES.iter().chain(VICTIM_RULES).chain(ZOMBIE_RULES) {
            assert!(rule(&[], &context).is_none());
        }
    }
}
