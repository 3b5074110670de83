//! Core data types shared by the rule kit, behaviour analyzer, correlator,
//! graph builder and sink adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A pre-filtered IDS-style event indicating a suspected attacker-victim
/// pair and a timestamp. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttackAlert {
    pub log_time: DateTime<Utc>,
    pub source_ip: String,
    pub dest_ip: String,
    pub event_type: i32,
    pub protocol: i32,
    pub action: String,
    pub severity: i32,
}

/// An aggregate record of one transport conversation. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TcpFlow {
    pub log_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub established_time: Option<DateTime<Utc>>,
    pub client_ip: String,
    pub client_port: i32,
    pub server_ip: String,
    pub server_port: i32,
    pub protocol: i32,
    pub duration: f64,
    pub up_bytes: i64,
    pub down_bytes: i64,
    pub up_bps: f64,
    pub down_bps: f64,
    pub packets_sent: i64,
    pub packets_received: i64,
    pub client_plr: f64,
    pub server_plr: f64,
    pub flow_status: String,
}

/// One of the four APT campaign phases. A closed enumeration with an
/// explicit string encoding, not an open string, per design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    InitialAccess,
    LateralMovement,
    CommandAndControl,
    DataExfiltration,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::InitialAccess,
        Phase::LateralMovement,
        Phase::CommandAndControl,
        Phase::DataExfiltration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::InitialAccess => "InitialAccess",
            Phase::LateralMovement => "LateralMovement",
            Phase::CommandAndControl => "CommandAndControl",
            Phase::DataExfiltration => "DataExfiltration",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "InitialAccess" => Some(Phase::InitialAccess),
            "LateralMovement" => Some(Phase::LateralMovement),
            "CommandAndControl" => Some(Phase::CommandAndControl),
            "DataExfiltration" => Some(Phase::DataExfiltration),
            _ => None,
        }
    }

    /// Phases that may validly follow this one (§4.3 allowed_successors).
    pub fn allowed_successors(&self) -> &'static [Phase] {
        match self {
            Phase::InitialAccess => &[Phase::LateralMovement, Phase::CommandAndControl],
            Phase::LateralMovement => &[Phase::CommandAndControl, Phase::DataExfiltration],
            Phase::CommandAndControl => &[Phase::DataExfiltration],
            Phase::DataExfiltration => &[],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The named detection event raised by a rule. Closed enumeration with an
/// explicit string encoding used both for sink persistence and for the
/// temporal correlator's `event_name -> Phase` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ConnectionFrequency,
    NewIpConnections,
    PortScan,
    ProtocolAnomaly,
    OutboundSpike,
    DataExfiltration,
    MaliciousIpContact,
    LongConnection,
    ZombieNewIpConnections,
    ZombieActivitySpike,
    ZombieReverseConnection,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConnectionFrequency => "ConnectionFrequency",
            EventKind::NewIpConnections => "NewIpConnections",
            EventKind::PortScan => "PortScan",
            EventKind::ProtocolAnomaly => "ProtocolAnomaly",
            EventKind::OutboundSpike => "OutboundSpike",
            EventKind::DataExfiltration => "DataExfiltration",
            EventKind::MaliciousIpContact => "MaliciousIpContact",
            EventKind::LongConnection => "LongConnection",
            EventKind::ZombieNewIpConnections => "ZOMBIE_NewIpConnections",
            EventKind::ZombieActivitySpike => "ZOMBIE_ActivitySpike",
            EventKind::ZombieReverseConnection => "ZOMBIE_ReverseConnection",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "ConnectionFrequency" => EventKind::ConnectionFrequency,
            "NewIpConnections" => EventKind::NewIpConnections,
            "PortScan" => EventKind::PortScan,
            "ProtocolAnomaly" => EventKind::ProtocolAnomaly,
            "OutboundSpike" => EventKind::OutboundSpike,
            "DataExfiltration" => EventKind::DataExfiltration,
            "MaliciousIpContact" => EventKind::MaliciousIpContact,
            "LongConnection" => EventKind::LongConnection,
            "ZOMBIE_NewIpConnections" => EventKind::ZombieNewIpConnections,
            "ZOMBIE_ActivitySpike" => EventKind::ZombieActivitySpike,
            "ZOMBIE_ReverseConnection" => EventKind::ZombieReverseConnection,
            _ => return None,
        })
    }

    /// The static event-name -> phase mapping used by the temporal
    /// correlator (§4.3). Unmapped event kinds don't exist by
    /// construction since this covers every variant.
    pub fn phase(&self) -> Phase {
        match self {
            EventKind::ConnectionFrequency => Phase::InitialAccess,
            EventKind::NewIpConnections => Phase::InitialAccess,
            EventKind::PortScan => Phase::LateralMovement,
            EventKind::ProtocolAnomaly => Phase::LateralMovement,
            EventKind::OutboundSpike => Phase::CommandAndControl,
            EventKind::DataExfiltration => Phase::DataExfiltration,
            EventKind::MaliciousIpContact => Phase::InitialAccess,
            EventKind::LongConnection => Phase::CommandAndControl,
            EventKind::ZombieNewIpConnections => Phase::CommandAndControl,
            EventKind::ZombieActivitySpike => Phase::CommandAndControl,
            EventKind::ZombieReverseConnection => Phase::CommandAndControl,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional metadata carried by an `APTEvent`, populated by whichever rule
/// produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    pub src_port: Option<i32>,
    pub dest_port: Option<i32>,
    pub bytes_sent: Option<i64>,
    pub bytes_received: Option<i64>,
    pub status_code: Option<i32>,
    pub protocol: Option<i32>,
}

/// A typed security event emitted by the behaviour analyzer. Never
/// mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptEvent {
    pub id: uuid::Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub source_ip: String,
    pub dest_ip: String,
    pub event_name: EventKind,
    pub event_type: Phase,
    pub severity: u8,
    pub description: String,
    pub metadata: EventMetadata,
}

/// The result a rule returns when it fires.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub event_name: EventKind,
    pub phase: Phase,
    pub description: String,
    pub severity: u8,
}

/// A single collapsed window of the campaign timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackNode {
    pub phase: Phase,
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub dest_ip: String,
    pub related_log_ids: Vec<uuid::Uuid>,
}

/// A directed edge between two phases, with a `[0.3, 1.0]`-bounded
/// confidence derived from repeat-observation count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackEdge {
    pub from: Phase,
    pub to: Phase,
    pub confidence: f64,
    pub count: u32,
}

impl AttackEdge {
    pub fn key(from: Phase, to: Phase) -> String {
        format!("{}->{}", from.as_str(), to.as_str())
    }
}

/// A scored two-step candidate attack path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackPath {
    pub phases: Vec<Phase>,
    pub confidence: f64,
}

/// Per-client behavioural memory: historical server IPs, total connection
/// count, and when it was last touched. `total_connects` is always the
/// sum of `connections`' values.
#[derive(Debug, Clone, Default)]
pub struct IpProfile {
    pub connections: HashMap<String, u32>,
    pub total_connects: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl IpProfile {
    pub fn add_connection(&mut self, server_ip: &str, at: DateTime<Utc>) {
        *self.connections.entry(server_ip.to_string()).or_insert(0) += 1;
        self.total_connects += 1;
        self.last_updated = Some(at);
    }

    pub fn has_connected(&self, server_ip: &str) -> bool {
        self.connections.contains_key(server_ip)
    }

    /// Average connections per day since the profile's last update,
    /// defaulting to the configured baseline when unset. Preserves the
    /// integer-division underflow of the original rate calculation
    /// (Open Question #3 in spec.md).
    pub fn average_connections(&self, default_baseline: u32) -> u32 {
        let Some(last_updated) = self.last_updated else {
            return default_baseline;
        };
        let days = (Utc::now() - last_updated).num_hours() as f64 / 24.0;
        let days = if days < 1.0 { 1.0 } else { days };
        self.total_connects / (days as u32).max(1)
    }
}

/// Process-wide keyed container of `IpProfile`s, shared across analysis
/// tasks. Each entry is guarded by its own read/write lock so
/// `add_connection` (write) never blocks `has_connected`/
/// `average_connections` (read) on an unrelated IP.
#[derive(Default)]
pub struct IpProfileStore {
    inner: dashmap::DashMap<String, parking_lot::RwLock<IpProfile>>,
}

impl IpProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialises an empty profile for `ip` on first observation.
    /// Racing first-time materialisation is safe: whichever task's
    /// `or_insert_with` wins, both construct an equivalent empty value.
    fn entry(&self, ip: &str) -> dashmap::mapref::one::Ref<'_, String, parking_lot::RwLock<IpProfile>> {
        self.inner
            .entry(ip.to_string())
            .or_insert_with(|| parking_lot::RwLock::new(IpProfile::default()));
        self.inner.get(ip).expect("just inserted")
    }

    pub fn add_connection(&self, client_ip: &str, server_ip: &str, at: DateTime<Utc>) {
        let entry = self.entry(client_ip);
        entry.write().add_connection(server_ip, at);
    }

    pub fn has_connected(&self, client_ip: &str, server_ip: &str) -> bool {
        match self.inner.get(client_ip) {
            Some(entry) => entry.read().has_connected(server_ip),
            None => false,
        }
    }

    pub fn average_connections(&self, client_ip: &str, default_baseline: u32) -> u32 {
        match self.inner.get(client_ip) {
            Some(entry) => entry.read().average_connections(default_baseline),
            None => default_baseline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_successors_match_state_machine() {
        assert_eq!(
            Phase::InitialAccess.allowed_successors(),
            &[Phase::LateralMovement, Phase::CommandAndControl]
        );
        assert!(Phase::DataExfiltration.allowed_successors().is_empty());
    }

    #[test]
    fn ip_profile_invariant_total_equals_sum_of_counts() {
        let mut profile = IpProfile::default();
        profile.add_connection("10.0.0.1", Utc::now());
        profile.add_connection("10.0.0.1", Utc::now());
        profile.add_connection("10.0.0.2", Utc::now());

        let sum: u32 = profile.connections.values().sum();
        assert_eq!(profile.total_connects, sum);
        assert_eq!(profile.total_connects, 3);
    }

    #[test]
    fn ip_profile_store_tracks_per_client() {
        let store = IpProfileStore::new();
        store.add_connection("1.1.1.1", "2.2.2.2", Utc::now());
        assert!(store.has_connected("1.1.1.1", "2.2.2.2"));
        assert!(!store.has_connected("1.1.1.1", "3.3.3.3"));
        assert!(!store.has_connected("9.9.9.9", "2.2.2.2"));
    }

    #[test]
    fn event_kind_roundtrips_through_string_encoding() {
        for kind in [
            EventKind::ConnectionFrequency,
            EventKind::ZombieReverseConnection,
        ] {
            let s = kind.as_str();
            assert_eq!(EventKind::from_str(s), Some(kind));
        }
    }
}
