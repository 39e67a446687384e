//! Tamper-evident audit trail for every store mutation.
//!
//! Uses BLAKE3 hash chaining so the sequence of mutations can be verified
//! after the fact: each event's hash covers its own fields plus the
//! previous event's hash, so removing or reordering an entry breaks the
//! chain.
//!
//! # Architecture
//!
//! A single sequential owner (the projection engine, C5) seals every
//! [`AuditEvent`] through one [`AuditChain`] in arrival order, guaranteeing
//! the hash chain's ordering invariant without a lock: one transaction at a
//! time already serialises access. Every zone/record/forwarder/rpz-rule/
//! threat-feed/backup mutation and every transaction commit/rollback is
//! sealed here.

pub mod chain;
pub mod event;

pub use chain::{verify_chain, AuditChain, ChainVerificationError};
pub use event::{AuditEvent, AuditEventKind, AuditSeverity, AuditSource};

use std::sync::Mutex;

/// Shared sequential owner of one [`AuditChain`], used by both [`Store`]
/// implementations to seal a pre-transaction audit entry for every
/// mutation. A `Mutex` stands in for the teacher's actor-exclusive
/// ownership: both give the chain a single, strictly ordered writer, but
/// a library crate with no actor runtime of its own reaches for the
/// simpler primitive.
///
/// [`Store`]: crate::store::Store
#[derive(Default)]
pub struct AuditLog {
    chain: Mutex<Option<AuditChain>>,
    events: Mutex<Vec<AuditEvent>>,
    service_name: String,
}

impl AuditLog {
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            chain: Mutex::new(Some(AuditChain::new(service_name.clone()))),
            events: Mutex::new(Vec::new()),
            service_name,
        }
    }

    /// Seal a pre-transaction entry for one mutation and append it to the
    /// in-process log.
    pub fn seal(
        &self,
        kind: AuditEventKind,
        severity: AuditSeverity,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> AuditEvent {
        let event = AuditEvent::new(kind, severity, self.service_name.clone())
            .with_entity(entity_type, entity_id);

        let mut chain = self.chain.lock().expect("audit chain mutex poisoned");
        let sealed = chain.as_mut().expect("audit chain always present").seal(event);
        drop(chain);

        self.events.lock().expect("audit log mutex poisoned").push(sealed.clone());
        sealed
    }

    /// All sealed events in arrival order, for `verify_chain` or export.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit log mutex poisoned").clone()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("service_name", &self.service_name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log_seals_in_order_and_verifies() {
        let log = AuditLog::new("hybridns");
        log.seal(AuditEventKind::ZoneCreated, AuditSeverity::Informational, "zone", "example.com");
        log.seal(AuditEventKind::RecordCreated, AuditSeverity::Informational, "record", "www.example.com");

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
        assert!(verify_chain(&events).is_ok());
    }
}
