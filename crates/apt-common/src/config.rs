//! Static configuration (§6): thresholds, malicious-IP set, internal CIDR
//! blocks, and the Bayesian prior/transition tables. Read-only after
//! construction, so it is passed around by shared reference with no
//! locking (§5).

use crate::model::Phase;
use ipnetwork::IpNetwork;
use std::collections::{HashMap, HashSet};

/// All tunable thresholds from §6, with the tighter values from the two
/// source revisions per Open Question #2.
#[derive(Debug, Clone)]
pub struct Thresholds {
    pub connection_frequency: u32,
    pub new_ip_connections: usize,
    pub zombie_new_ip_connections: usize,
    pub port_scan_ports: usize,
    pub port_scan_contacts_per_port: u32,
    pub data_exfil_bytes: i64,
    pub correlator_window_minutes: i64,
    pub pre_attack_window_hours: i64,
    pub post_attack_window_hours: i64,
    pub zombie_window_hours: i64,
    pub semaphore_capacity: usize,
    pub default_baseline: u32,
    pub phase_threshold: u32,
    pub long_connection_seconds: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            connection_frequency: 10,
            new_ip_connections: 3,
            zombie_new_ip_connections: 10,
            port_scan_ports: 5,
            port_scan_contacts_per_port: 3,
            data_exfil_bytes: 100 * 1024 * 1024,
            correlator_window_minutes: 30,
            pre_attack_window_hours: 24,
            post_attack_window_hours: 48,
            zombie_window_hours: 72,
            semaphore_capacity: 10,
            default_baseline: 10,
            phase_threshold: 1,
            long_connection_seconds: 3600.0,
        }
    }
}

impl Thresholds {
    /// Loads threshold overrides from environment variables, falling
    /// back to the defaults above for anything unset, following the
    /// `env::var(..).unwrap_or(..)` convention applied to every field.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connection_frequency: env_or("APT_FREQ_THRESHOLD", defaults.connection_frequency),
            new_ip_connections: env_or("APT_NEW_IP_THRESHOLD", defaults.new_ip_connections),
            zombie_new_ip_connections: env_or(
                "APT_ZOMBIE_NEW_IP_THRESHOLD",
                defaults.zombie_new_ip_connections,
            ),
            port_scan_ports: env_or("APT_PORT_SCAN_THRESHOLD", defaults.port_scan_ports),
            port_scan_contacts_per_port: env_or(
                "APT_PORT_SCAN_CONTACTS",
                defaults.port_scan_contacts_per_port,
            ),
            data_exfil_bytes: env_or("APT_DATA_EXFIL_BYTES", defaults.data_exfil_bytes),
            correlator_window_minutes: env_or(
                "APT_CORRELATOR_WINDOW_MINUTES",
                defaults.correlator_window_minutes,
            ),
            pre_attack_window_hours: env_or(
                "APT_PRE_WINDOW_HOURS",
                defaults.pre_attack_window_hours,
            ),
            post_attack_window_hours: env_or(
                "APT_POST_WINDOW_HOURS",
                defaults.post_attack_window_hours,
            ),
            zombie_window_hours: env_or("APT_ZOMBIE_WINDOW_HOURS", defaults.zombie_window_hours),
            semaphore_capacity: env_or("APT_SEMAPHORE_CAPACITY", defaults.semaphore_capacity),
            default_baseline: env_or("APT_DEFAULT_BASELINE", defaults.default_baseline),
            phase_threshold: env_or("APT_PHASE_THRESHOLD", defaults.phase_threshold),
            long_connection_seconds: env_or(
                "APT_LONG_CONNECTION_SECONDS",
                defaults.long_connection_seconds,
            ),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Complete static configuration, constructed once at startup and shared
/// by `&Config` thereafter.
#[derive(Debug, Clone)]
pub struct Config {
    pub thresholds: Thresholds,
    pub malicious_ips: HashSet<String>,
    pub internal_networks: Vec<IpNetwork>,
    pub prior: HashMap<Phase, f64>,
    pub transition: HashMap<Phase, HashMap<Phase, f64>>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            thresholds: Thresholds::from_env(),
            malicious_ips: default_malicious_ips(),
            internal_networks: default_internal_networks(),
            prior: default_prior(),
            transition: default_transition(),
        }
    }

    pub fn is_malicious(&self, ip: &str) -> bool {
        self.malicious_ips.contains(ip)
    }

    pub fn is_internal(&self, ip: &str) -> bool {
        let Ok(parsed) = ip.parse() else {
            return false;
        };
        self.internal_networks.iter().any(|net| net.contains(parsed))
    }

    pub fn prior(&self, phase: Phase) -> f64 {
        self.prior.get(&phase).copied().unwrap_or(0.0)
    }

    pub fn transition(&self, from: Phase, to: Phase) -> f64 {
        self.transition
            .get(&from)
            .and_then(|m| m.get(&to))
            .copied()
            .unwrap_or(0.0)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_malicious_ips() -> HashSet<String> {
    // Static in-memory threat-intel set (Non-goal: feed management).
    ["198.143.164.251", "45.76.188.129"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_internal_networks() -> Vec<IpNetwork> {
    ["192.168.0.0/16", "10.0.0.0/8", "172.16.0.0/12"]
        .into_iter()
        .map(|cidr| cidr.parse().expect("static CIDR literal"))
        .collect()
}

fn default_prior() -> HashMap<Phase, f64> {
    HashMap::from([
        (Phase::InitialAccess, 0.2),
        (Phase::LateralMovement, 0.3),
        (Phase::CommandAndControl, 0.4),
        (Phase::DataExfiltration, 0.1),
    ])
}

fn default_transition() -> HashMap<Phase, HashMap<Phase, f64>> {
    HashMap::from([
        (
            Phase::InitialAccess,
            HashMap::from([
                (Phase::LateralMovement, 0.6),
                (Phase::CommandAndControl, 0.4),
            ]),
        ),
        (
            Phase::LateralMovement,
            HashMap::from([
                (Phase::CommandAndControl, 0.5),
                (Phase::DataExfiltration, 0.5),
            ]),
        ),
        (
            Phase::CommandAndControl,
            HashMap::from([(Phase::DataExfiltration, 1.0)]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_networks_cover_private_ranges() {
        let config = Config::from_env();
        assert!(config.is_internal("192.168.1.1"));
        assert!(config.is_internal("10.0.0.5"));
        assert!(config.is_internal("172.16.0.1"));
        assert!(!config.is_internal("8.8.8.8"));
    }

    #[test]
    fn prior_and_transition_match_spec_tables() {
        let config = Config::from_env();
        assert_eq!(config.prior(Phase::CommandAndControl), 0.4);
        assert_eq!(
            config.transition(Phase::InitialAccess, Phase::LateralMovement),
            0.6
        );
        assert_eq!(config.transition(Phase::CommandAndControl, Phase::DataExfiltration), 1.0);
        assert_eq!(config.transition(Phase::DataExfiltration, Phase::InitialAccess), 0.0);
    }

    #[test]
    fn malicious_ip_set_contains_seeded_entries() {
        let config = Config::from_env();
        assert!(config.is_malicious("198.143.164.251"));
        assert!(!config.is_malicious("1.2.3.4"));
    }
}
