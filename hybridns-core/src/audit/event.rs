//! Audit event types
//!
//! Core types for representing audit trail entries for every entity
//! mutation and every projection transaction outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit trail event
///
/// Events are sealed by [`AuditChain`](super::AuditChain) with BLAKE3 hash
/// chaining before being persisted, providing tamper detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Category of the event
    pub kind: AuditEventKind,
    /// Severity level (maps to syslog severity 0-7)
    pub severity: AuditSeverity,
    /// Source information (actor, correlation id)
    pub source: AuditSource,
    /// Type name of the entity affected, if any (e.g. "zone", "record")
    pub entity_type: Option<String>,
    /// Identifier of the entity affected, if any
    pub entity_id: Option<String>,
    /// Name of the service that generated this event
    pub service_name: String,
    /// Additional structured metadata (e.g. diff of changed fields)
    pub metadata: Option<serde_json::Value>,
    /// BLAKE3 hash of this event (set by AuditChain::seal)
    pub hash: Option<String>,
    /// Hash of the previous event in the chain
    pub previous_hash: Option<String>,
    /// Monotonically increasing sequence number
    pub sequence: u64,
}

impl AuditEvent {
    /// Create a new audit event with the given kind and severity
    pub fn new(kind: AuditEventKind, severity: AuditSeverity, service_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            severity,
            source: AuditSource::default(),
            entity_type: None,
            entity_id: None,
            service_name,
            metadata: None,
            hash: None,
            previous_hash: None,
            sequence: 0,
        }
    }

    /// Set the source information
    pub fn with_source(mut self, source: AuditSource) -> Self {
        self.source = source;
        self
    }

    /// Record which entity this event pertains to
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set additional metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Categories of audit events.
///
/// One variant per entity mutation kind plus the transaction lifecycle
/// events the projection engine (C5) emits around every apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditEventKind {
    ZoneCreated,
    ZoneUpdated,
    ZoneDeleted,
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    ForwarderCreated,
    ForwarderUpdated,
    ForwarderDeleted,
    RpzRuleCreated,
    RpzRuleUpdated,
    RpzRuleDeleted,
    ThreatFeedCreated,
    ThreatFeedUpdated,
    ThreatFeedDeleted,
    BackupCreated,
    BackupRestored,
    TransactionStarted,
    TransactionCommitted,
    TransactionRolledBack,
    /// Application-defined event
    Custom(String),
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZoneCreated => write!(f, "zone.created"),
            Self::ZoneUpdated => write!(f, "zone.updated"),
            Self::ZoneDeleted => write!(f, "zone.deleted"),
            Self::RecordCreated => write!(f, "record.created"),
            Self::RecordUpdated => write!(f, "record.updated"),
            Self::RecordDeleted => write!(f, "record.deleted"),
            Self::ForwarderCreated => write!(f, "forwarder.created"),
            Self::ForwarderUpdated => write!(f, "forwarder.updated"),
            Self::ForwarderDeleted => write!(f, "forwarder.deleted"),
            Self::RpzRuleCreated => write!(f, "rpz_rule.created"),
            Self::RpzRuleUpdated => write!(f, "rpz_rule.updated"),
            Self::RpzRuleDeleted => write!(f, "rpz_rule.deleted"),
            Self::ThreatFeedCreated => write!(f, "threat_feed.created"),
            Self::ThreatFeedUpdated => write!(f, "threat_feed.updated"),
            Self::ThreatFeedDeleted => write!(f, "threat_feed.deleted"),
            Self::BackupCreated => write!(f, "backup.created"),
            Self::BackupRestored => write!(f, "backup.restored"),
            Self::TransactionStarted => write!(f, "transaction.started"),
            Self::TransactionCommitted => write!(f, "transaction.committed"),
            Self::TransactionRolledBack => write!(f, "transaction.rolled_back"),
            Self::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

/// Audit event severity levels
///
/// Maps directly to syslog severity values (RFC 5424).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// System is unusable (syslog 0)
    Emergency = 0,
    /// Action must be taken immediately (syslog 1)
    Alert = 1,
    /// Critical conditions (syslog 2)
    Critical = 2,
    /// Error conditions (syslog 3)
    Error = 3,
    /// Warning conditions (syslog 4)
    Warning = 4,
    /// Normal but significant condition (syslog 5)
    Notice = 5,
    /// Informational messages (syslog 6)
    Informational = 6,
    /// Debug-level messages (syslog 7)
    Debug = 7,
}

impl AuditSeverity {
    /// Get the numeric syslog severity value (0-7)
    pub fn as_syslog_severity(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emergency => write!(f, "EMERGENCY"),
            Self::Alert => write!(f, "ALERT"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Notice => write!(f, "NOTICE"),
            Self::Informational => write!(f, "INFO"),
            Self::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Source information for an audit event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSource {
    /// Authenticated subject (operator, service account, etc.)
    pub subject: Option<String>,
    /// Correlation id for tying a batch of events to one transaction
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_new() {
        let event = AuditEvent::new(
            AuditEventKind::ZoneCreated,
            AuditSeverity::Informational,
            "hybridns".to_string(),
        );
        assert_eq!(event.kind, AuditEventKind::ZoneCreated);
        assert_eq!(event.service_name, "hybridns");
        assert!(event.hash.is_none());
        assert_eq!(event.sequence, 0);
    }

    #[test]
    fn test_audit_event_with_entity() {
        let event = AuditEvent::new(
            AuditEventKind::RecordUpdated,
            AuditSeverity::Informational,
            "hybridns".to_string(),
        )
        .with_entity("record", "rec_123");

        assert_eq!(event.entity_type, Some("record".to_string()));
        assert_eq!(event.entity_id, Some("rec_123".to_string()));
    }

    #[test]
    fn test_audit_event_kind_display() {
        assert_eq!(AuditEventKind::ZoneCreated.to_string(), "zone.created");
        assert_eq!(
            AuditEventKind::TransactionRolledBack.to_string(),
            "transaction.rolled_back"
        );
        assert_eq!(
            AuditEventKind::Custom("zone.imported".to_string()).to_string(),
            "custom.zone.imported"
        );
    }

    #[test]
    fn test_audit_severity_syslog_value() {
        assert_eq!(AuditSeverity::Emergency.as_syslog_severity(), 0);
        assert_eq!(AuditSeverity::Alert.as_syslog_severity(), 1);
        assert_eq!(AuditSeverity::Informational.as_syslog_severity(), 6);
        assert_eq!(AuditSeverity::Debug.as_syslog_severity(), 7);
    }

    #[test]
    fn test_audit_event_serde_roundtrip() {
        let event = AuditEvent::new(
            AuditEventKind::BackupRestored,
            AuditSeverity::Warning,
            "hybridns".to_string(),
        )
        .with_source(AuditSource {
            subject: Some("operator@example.com".to_string()),
            correlation_id: Some("corr-123".to_string()),
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, event.id);
        assert_eq!(deserialized.kind, AuditEventKind::BackupRestored);
        assert_eq!(
            deserialized.source.subject,
            Some("operator@example.com".to_string())
        );
    }
}
