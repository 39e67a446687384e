//! Entity types for every row the Model Store Gateway manages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `Zone.zone_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Master,
    Slave,
    Forward,
}

/// A DNS administrative subtree the system is authoritative for (master),
/// forwards (forward), or slaves (slave).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub zone_type: ZoneType,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    /// DNS-dotted admin email, e.g. `admin.example.com`.
    pub admin_email: String,
    pub active: bool,
    /// Required (non-empty) when `zone_type == Slave`.
    pub master_servers: Vec<String>,
    /// Required (non-empty) when `zone_type == Forward`.
    pub forwarder_ips: Vec<String>,
}

/// `Record.record_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Srv,
    Ptr,
    Ns,
    Soa,
    Caa,
    Sshfp,
    Tlsa,
    Naptr,
    Loc,
}

/// One row in a master zone's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub zone_name: String,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    pub priority: Option<u16>,
    pub weight: Option<u16>,
    pub port: Option<u16>,
    pub ttl: u32,
    pub active: bool,
}

impl Record {
    /// The identity tuple `(zone, name, type, value, priority, weight, port)`.
    pub fn identity(&self) -> (String, String, RecordType, String, Option<u16>, Option<u16>, Option<u16>) {
        (
            self.zone_name.clone(),
            self.name.clone(),
            self.record_type,
            self.value.clone(),
            self.priority,
            self.weight,
            self.port,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwarderType {
    ActiveDirectory,
    Intranet,
    Public,
}

/// One upstream DNS server in a forwarder's ordered list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub ip: String,
    pub port: u16,
    /// 1 (highest) .. 10 (lowest).
    pub priority: u8,
}

/// A named policy that sends queries for a domain set to an ordered list of
/// upstream DNS servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forwarder {
    pub name: String,
    pub domains: Vec<String>,
    pub forwarder_type: ForwarderType,
    pub servers: Vec<Server>,
    pub health_check_enabled: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Timeout,
    Error,
    Unhealthy,
}

/// Insert-only probe result row, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderHealth {
    pub forwarder_name: String,
    pub server_ip: String,
    pub status: HealthStatus,
    pub response_time_ms: Option<u32>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Aggregated status across all of a forwarder's servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpzAction {
    Block,
    Redirect,
    Passthru,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpzSource {
    Manual,
    ThreatFeed(String),
    BulkImport,
}

/// One response-policy rule in an RPZ category zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpzRule {
    pub rpz_zone: String,
    pub domain: String,
    pub action: RpzAction,
    /// Required iff `action == Redirect`.
    pub redirect_target: Option<String>,
    pub source: RpzSource,
    pub description: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    Domains,
    Hosts,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Ok,
    Partial,
    Failed,
    Never,
}

/// An externally hosted list of malicious domains ingested into RPZ rules
/// tagged with the feed's source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatFeed {
    pub name: String,
    pub url: String,
    pub feed_type: String,
    pub format: FeedFormat,
    pub update_frequency_s: u32,
    pub last_update_at: Option<DateTime<Utc>>,
    pub last_update_status: FeedStatus,
    pub rules_count: u32,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    ZoneFile,
    RpzFile,
    Configuration,
    FullConfig,
}

/// A content-addressed snapshot of one or more resolver files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub original_paths: Vec<String>,
    pub stored_paths: Vec<String>,
    /// SHA-256 hex digest per file, same order as `stored_paths`.
    pub sha256: Vec<String>,
    pub description: String,
    pub related_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Health,
    Dns,
    Security,
    System,
    User,
    Audit,
    Connection,
    Bulk,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
    Urgent,
}

impl EventPriority {
    /// Whether this priority bypasses batching per §C9.
    pub fn bypasses_batching(&self) -> bool {
        matches!(self, Self::Critical | Self::Urgent)
    }
}

/// A domain event, delivered through the event bus (§C9) and optionally
/// persisted (§C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub category: EventCategory,
    pub severity: EventSeverity,
    pub priority: EventPriority,
    pub source: String,
    pub data: serde_json::Value,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Whether this event should be written to the store. Defaults from
    /// `EventBusConfig::persist_events_by_default`.
    pub persist: bool,
}

/// A stateful filter a client attaches to the event bus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub event_types: Vec<String>,
    pub categories: Vec<EventCategory>,
    pub severities: Vec<EventSeverity>,
    pub tags: Vec<String>,
    pub user_filters: Vec<String>,
}

impl SubscriptionFilter {
    /// An empty filter matches every event.
    pub fn is_open(&self) -> bool {
        self.event_types.is_empty() && self.categories.is_empty()
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.is_open() {
            return true;
        }
        let type_ok = self.event_types.is_empty() || self.event_types.iter().any(|t| t == &event.event_type);
        let category_ok = self.categories.is_empty() || self.categories.contains(&event.category);
        let severity_ok = self
            .severities
            .iter()
            .map(|s| *s)
            .min()
            .map(|min| event.severity >= min)
            .unwrap_or(true);
        type_ok && category_ok && severity_ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscription {
    pub connection_id: Uuid,
    pub filter: SubscriptionFilter,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Recovering,
    Closing,
    Closed,
}

/// A live client session on the event bus. At most one active connection
/// per `user_id` — a new handshake replaces the prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: Uuid,
    pub user_id: String,
    pub permissions: Vec<String>,
    pub status: ConnectionStatus,
    pub consecutive_errors: u32,
    pub last_ping_at: Option<DateTime<Utc>>,
}

/// One line of the resolver's query log, parsed by the log ingestor (§C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogRow {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub client_port: u16,
    pub query_name: String,
    pub query_type: String,
    pub response_code: String,
    pub blocked: bool,
    pub rpz_zone: Option<String>,
    pub rpz_action: Option<RpzAction>,
    pub response_time_ms: u32,
    pub cache_hit: bool,
}
