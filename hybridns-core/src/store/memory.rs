//! In-memory [`Store`] implementation for tests and local development.

use dashmap::DashMap;
use uuid::Uuid;

use super::model::{
    Event, EventSubscription, Forwarder, ForwarderHealth, QueryLogRow, Record, RecordType, RpzRule, ThreatFeed, Zone,
};
use super::{BulkRowError, BulkUpsertResult, EventListFilter, Store};
use crate::audit::{AuditEventKind, AuditLog, AuditSeverity};
use crate::error::{Error, Result};
use crate::validate::{validate_forwarder, validate_record, validate_rpz_rule, validate_zone};

type RecordKey = (String, String, RecordType, String, Option<u16>, Option<u16>, Option<u16>);
type RpzKey = (String, String);

/// Holds every entity in `DashMap`s keyed by their natural identity.
/// Good enough for tests and for a single-process deployment that doesn't
/// need libsql; not persisted across restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    zones: DashMap<String, Zone>,
    records: DashMap<RecordKey, Record>,
    forwarders: DashMap<String, Forwarder>,
    health: DashMap<String, Vec<ForwarderHealth>>,
    rpz_rules: DashMap<RpzKey, RpzRule>,
    threat_feeds: DashMap<String, ThreatFeed>,
    events: DashMap<Uuid, Event>,
    subscriptions: DashMap<Uuid, Vec<EventSubscription>>,
    query_log: DashMap<(), Vec<QueryLogRow>>,
    audit: AuditLog,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_service_name("hybridns")
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            zones: DashMap::new(),
            records: DashMap::new(),
            forwarders: DashMap::new(),
            health: DashMap::new(),
            rpz_rules: DashMap::new(),
            threat_feeds: DashMap::new(),
            events: DashMap::new(),
            subscriptions: DashMap::new(),
            query_log: DashMap::new(),
            audit: AuditLog::new(service_name),
        }
    }
}

impl Store for MemoryStore {
    async fn create_zone(&self, zone: Zone) -> Result<Zone> {
        let errors = validate_zone(&zone);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if self.zones.contains_key(&zone.name) {
            return Err(Error::conflict("name", format!("zone '{}' already exists", zone.name)));
        }
        self.audit.seal(AuditEventKind::ZoneCreated, AuditSeverity::Informational, "zone", zone.name.clone());
        self.zones.insert(zone.name.clone(), zone.clone());
        Ok(zone)
    }

    async fn get_zone(&self, name: &str) -> Result<Option<Zone>> {
        Ok(self.zones.get(name).map(|r| r.value().clone()))
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(self.zones.iter().map(|r| r.value().clone()).collect())
    }

    async fn update_zone(&self, zone: Zone) -> Result<Zone> {
        let errors = validate_zone(&zone);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if !self.zones.contains_key(&zone.name) {
            return Err(Error::not_found("zone", zone.name));
        }
        self.audit.seal(AuditEventKind::ZoneUpdated, AuditSeverity::Informational, "zone", zone.name.clone());
        self.zones.insert(zone.name.clone(), zone.clone());
        Ok(zone)
    }

    async fn delete_zone(&self, name: &str) -> Result<()> {
        let has_records = self.records.iter().any(|r| r.key().0 == name);
        if has_records {
            return Err(Error::Referential {
                parent: format!("zone {name}"),
                child: "record".to_string(),
            });
        }
        self.zones
            .remove(name)
            .ok_or_else(|| Error::not_found("zone", name))?;
        self.audit.seal(AuditEventKind::ZoneDeleted, AuditSeverity::Notice, "zone", name);
        Ok(())
    }

    async fn create_record(&self, record: Record) -> Result<Record> {
        let is_apex = record.name == "@" || record.name == record.zone_name;
        let errors = validate_record(&record, is_apex);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = record.identity();
        if self.records.contains_key(&key) {
            return Err(Error::conflict("identity", "record already exists with this identity"));
        }
        self.audit.seal(AuditEventKind::RecordCreated, AuditSeverity::Informational, "record", record.name.clone());
        self.records.insert(key, record.clone());
        Ok(record)
    }

    async fn list_records(&self, zone_name: &str) -> Result<Vec<Record>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.key().0 == zone_name)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn update_record(&self, record: Record) -> Result<Record> {
        let is_apex = record.name == "@" || record.name == record.zone_name;
        let errors = validate_record(&record, is_apex);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = record.identity();
        if !self.records.contains_key(&key) {
            return Err(Error::not_found("record", record.name.clone()));
        }
        self.audit.seal(AuditEventKind::RecordUpdated, AuditSeverity::Informational, "record", record.name.clone());
        self.records.insert(key, record.clone());
        Ok(record)
    }

    async fn delete_record(&self, zone_name: &str, name: &str, record_type: RecordType, value: &str) -> Result<()> {
        let key = self
            .records
            .iter()
            .find(|r| {
                let k = r.key();
                k.0 == zone_name && k.1 == name && k.2 == record_type && k.3 == value
            })
            .map(|r| r.key().clone());

        match key {
            Some(k) => {
                self.records.remove(&k);
                self.audit.seal(AuditEventKind::RecordDeleted, AuditSeverity::Informational, "record", name);
                Ok(())
            }
            None => Err(Error::not_found("record", name)),
        }
    }

    async fn bulk_upsert_records(&self, records: Vec<Record>) -> Result<BulkUpsertResult> {
        let mut result = BulkUpsertResult::default();
        for (index, record) in records.into_iter().enumerate() {
            let is_apex = record.name == "@" || record.name == record.zone_name;
            let errors = validate_record(&record, is_apex);
            if !errors.is_empty() {
                result.skipped += 1;
                result.errors.push(BulkRowError {
                    index,
                    identity: format!("{}/{}/{:?}/{}", record.zone_name, record.name, record.record_type, record.value),
                    errors,
                });
                continue;
            }
            let key = record.identity();
            if self.records.insert(key, record).is_some() {
                result.updated += 1;
            } else {
                result.added += 1;
            }
        }
        Ok(result)
    }

    async fn create_forwarder(&self, forwarder: Forwarder) -> Result<Forwarder> {
        let errors = validate_forwarder(&forwarder);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if self.forwarders.contains_key(&forwarder.name) {
            return Err(Error::conflict("name", format!("forwarder '{}' already exists", forwarder.name)));
        }
        self.audit.seal(AuditEventKind::ForwarderCreated, AuditSeverity::Informational, "forwarder", forwarder.name.clone());
        self.forwarders.insert(forwarder.name.clone(), forwarder.clone());
        Ok(forwarder)
    }

    async fn get_forwarder(&self, name: &str) -> Result<Option<Forwarder>> {
        Ok(self.forwarders.get(name).map(|r| r.value().clone()))
    }

    async fn list_forwarders(&self) -> Result<Vec<Forwarder>> {
        Ok(self.forwarders.iter().map(|r| r.value().clone()).collect())
    }

    async fn update_forwarder(&self, forwarder: Forwarder) -> Result<Forwarder> {
        let errors = validate_forwarder(&forwarder);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if !self.forwarders.contains_key(&forwarder.name) {
            return Err(Error::not_found("forwarder", forwarder.name));
        }
        self.audit.seal(AuditEventKind::ForwarderUpdated, AuditSeverity::Informational, "forwarder", forwarder.name.clone());
        self.forwarders.insert(forwarder.name.clone(), forwarder.clone());
        Ok(forwarder)
    }

    async fn delete_forwarder(&self, name: &str) -> Result<()> {
        self.forwarders
            .remove(name)
            .ok_or_else(|| Error::not_found("forwarder", name))?;
        self.audit.seal(AuditEventKind::ForwarderDeleted, AuditSeverity::Informational, "forwarder", name);
        Ok(())
    }

    async fn record_health(&self, row: ForwarderHealth) -> Result<()> {
        self.health.entry(row.forwarder_name.clone()).or_default().push(row);
        Ok(())
    }

    async fn list_health(&self, forwarder_name: &str, limit: u32) -> Result<Vec<ForwarderHealth>> {
        Ok(self
            .health
            .get(forwarder_name)
            .map(|rows| {
                let mut rows = rows.clone();
                rows.reverse();
                rows.truncate(limit as usize);
                rows
            })
            .unwrap_or_default())
    }

    async fn create_rpz_rule(&self, rule: RpzRule) -> Result<RpzRule> {
        let errors = validate_rpz_rule(&rule);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = (rule.rpz_zone.clone(), rule.domain.clone());
        if self.rpz_rules.contains_key(&key) {
            return Err(Error::conflict("domain", format!("rule for '{}' already exists in {}", rule.domain, rule.rpz_zone)));
        }
        self.audit.seal(AuditEventKind::RpzRuleCreated, AuditSeverity::Informational, "rpz_rule", rule.domain.clone());
        self.rpz_rules.insert(key, rule.clone());
        Ok(rule)
    }

    async fn list_rpz_rules(&self, rpz_zone: &str) -> Result<Vec<RpzRule>> {
        Ok(self
            .rpz_rules
            .iter()
            .filter(|r| r.key().0 == rpz_zone)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn update_rpz_rule(&self, rule: RpzRule) -> Result<RpzRule> {
        let errors = validate_rpz_rule(&rule);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = (rule.rpz_zone.clone(), rule.domain.clone());
        if !self.rpz_rules.contains_key(&key) {
            return Err(Error::not_found("rpz_rule", rule.domain));
        }
        self.audit.seal(AuditEventKind::RpzRuleUpdated, AuditSeverity::Informational, "rpz_rule", rule.domain.clone());
        self.rpz_rules.insert(key, rule.clone());
        Ok(rule)
    }

    async fn delete_rpz_rule(&self, rpz_zone: &str, domain: &str) -> Result<()> {
        self.rpz_rules
            .remove(&(rpz_zone.to_string(), domain.to_string()))
            .ok_or_else(|| Error::not_found("rpz_rule", domain))?;
        self.audit.seal(AuditEventKind::RpzRuleDeleted, AuditSeverity::Informational, "rpz_rule", domain);
        Ok(())
    }

    async fn bulk_upsert_rpz_rules(&self, rules: Vec<RpzRule>) -> Result<BulkUpsertResult> {
        let mut result = BulkUpsertResult::default();
        for (index, rule) in rules.into_iter().enumerate() {
            let errors = validate_rpz_rule(&rule);
            if !errors.is_empty() {
                result.skipped += 1;
                result.errors.push(BulkRowError {
                    index,
                    identity: format!("{}/{}", rule.rpz_zone, rule.domain),
                    errors,
                });
                continue;
            }
            let key = (rule.rpz_zone.clone(), rule.domain.clone());
            if self.rpz_rules.insert(key, rule).is_some() {
                result.updated += 1;
            } else {
                result.added += 1;
            }
        }
        Ok(result)
    }

    async fn create_threat_feed(&self, feed: ThreatFeed) -> Result<ThreatFeed> {
        if self.threat_feeds.contains_key(&feed.name) {
            return Err(Error::conflict("name", format!("threat feed '{}' already exists", feed.name)));
        }
        self.audit.seal(AuditEventKind::ThreatFeedCreated, AuditSeverity::Informational, "threat_feed", feed.name.clone());
        self.threat_feeds.insert(feed.name.clone(), feed.clone());
        Ok(feed)
    }

    async fn list_threat_feeds(&self) -> Result<Vec<ThreatFeed>> {
        Ok(self.threat_feeds.iter().map(|r| r.value().clone()).collect())
    }

    async fn update_threat_feed(&self, feed: ThreatFeed) -> Result<ThreatFeed> {
        if !self.threat_feeds.contains_key(&feed.name) {
            return Err(Error::not_found("threat_feed", feed.name));
        }
        self.audit.seal(AuditEventKind::ThreatFeedUpdated, AuditSeverity::Informational, "threat_feed", feed.name.clone());
        self.threat_feeds.insert(feed.name.clone(), feed.clone());
        Ok(feed)
    }

    async fn delete_threat_feed(&self, name: &str) -> Result<()> {
        self.threat_feeds
            .remove(name)
            .ok_or_else(|| Error::not_found("threat_feed", name))?;
        self.audit.seal(AuditEventKind::ThreatFeedDeleted, AuditSeverity::Informational, "threat_feed", name);
        Ok(())
    }

    async fn record_event(&self, event: Event) -> Result<()> {
        self.events.insert(event.event_id, event);
        Ok(())
    }

    async fn list_events(&self, filter: EventListFilter) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .map(|r| r.value().clone())
            .filter(|e| filter.category.map(|c| c == e.category).unwrap_or(true))
            .filter(|e| filter.since.map(|since| e.created_at >= since).unwrap_or(true))
            .collect();
        events.sort_by_key(|e| e.created_at);
        if let Some(limit) = filter.limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn save_subscription(&self, sub: EventSubscription) -> Result<()> {
        self.subscriptions.entry(sub.connection_id).or_default().push(sub);
        Ok(())
    }

    async fn list_subscriptions(&self, connection_id: Uuid) -> Result<Vec<EventSubscription>> {
        Ok(self.subscriptions.get(&connection_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn record_query_log_batch(&self, rows: Vec<QueryLogRow>) -> Result<()> {
        self.query_log.entry(()).or_default().extend(rows);
        Ok(())
    }

    async fn list_audit_events(&self) -> Result<Vec<crate::audit::AuditEvent>> {
        Ok(self.audit.events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::ZoneType;

    fn zone(name: &str) -> Zone {
        Zone {
            name: name.to_string(),
            zone_type: ZoneType::Master,
            serial: 2026010100,
            refresh: 3600,
            retry: 600,
            expire: 604800,
            minimum: 86400,
            admin_email: "admin.example.com".to_string(),
            active: true,
            master_servers: vec![],
            forwarder_ips: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_zone_duplicate_conflicts() {
        let store = MemoryStore::new();
        store.create_zone(zone("example.com")).await.unwrap();
        let err = store.create_zone(zone("example.com")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_zone_with_records_is_referential_error() {
        let store = MemoryStore::new();
        store.create_zone(zone("example.com")).await.unwrap();
        store
            .create_record(Record {
                zone_name: "example.com".to_string(),
                name: "@".to_string(),
                record_type: RecordType::A,
                value: "10.0.0.1".to_string(),
                priority: None,
                weight: None,
                port: None,
                ttl: 3600,
                active: true,
            })
            .await
            .unwrap();

        let err = store.delete_zone("example.com").await.unwrap_err();
        assert!(matches!(err, Error::Referential { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_zone_not_found() {
        let store = MemoryStore::new();
        let err = store.update_zone(zone("missing.com")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_bulk_upsert_rpz_rules_counts_rows() {
        let store = MemoryStore::new();
        let rules = vec![
            RpzRule {
                rpz_zone: "rpz.local".to_string(),
                domain: "bad1.example".to_string(),
                action: crate::store::model::RpzAction::Block,
                redirect_target: None,
                source: crate::store::model::RpzSource::ThreatFeed("feodo".to_string()),
                description: String::new(),
                active: true,
            },
            RpzRule {
                rpz_zone: "rpz.local".to_string(),
                domain: "bad2.example".to_string(),
                action: crate::store::model::RpzAction::Block,
                redirect_target: None,
                source: crate::store::model::RpzSource::ThreatFeed("feodo".to_string()),
                description: String::new(),
                active: true,
            },
        ];
        let result = store.bulk_upsert_rpz_rules(rules).await.unwrap();
        assert_eq!(result.added, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(store.list_rpz_rules("rpz.local").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_upsert_rpz_rules_skips_invalid_rows_with_error_detail() {
        let store = MemoryStore::new();
        let rules = vec![
            RpzRule {
                rpz_zone: "rpz.local".to_string(),
                domain: "good.example".to_string(),
                action: crate::store::model::RpzAction::Block,
                redirect_target: None,
                source: crate::store::model::RpzSource::ThreatFeed("feodo".to_string()),
                description: String::new(),
                active: true,
            },
            RpzRule {
                rpz_zone: "rpz.local".to_string(),
                domain: "bad..example".to_string(),
                action: crate::store::model::RpzAction::Block,
                redirect_target: None,
                source: crate::store::model::RpzSource::ThreatFeed("feodo".to_string()),
                description: String::new(),
                active: true,
            },
        ];
        let result = store.bulk_upsert_rpz_rules(rules).await.unwrap();
        assert_eq!(result.added, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 1);
        assert_eq!(store.list_rpz_rules("rpz.local").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_upsert_rpz_rules_second_pass_counts_as_updated() {
        let store = MemoryStore::new();
        let rule = RpzRule {
            rpz_zone: "rpz.local".to_string(),
            domain: "good.example".to_string(),
            action: crate::store::model::RpzAction::Block,
            redirect_target: None,
            source: crate::store::model::RpzSource::ThreatFeed("feodo".to_string()),
            description: String::new(),
            active: true,
        };
        store.bulk_upsert_rpz_rules(vec![rule.clone()]).await.unwrap();
        let result = store.bulk_upsert_rpz_rules(vec![rule]).await.unwrap();
        assert_eq!(result.added, 0);
        assert_eq!(result.updated, 1);
    }

    #[tokio::test]
    async fn test_mutations_seal_a_verifiable_audit_chain() {
        let store = MemoryStore::new();
        store.create_zone(zone("example.com")).await.unwrap();
        store
            .create_record(Record {
                zone_name: "example.com".to_string(),
                name: "@".to_string(),
                record_type: RecordType::A,
                value: "10.0.0.1".to_string(),
                priority: None,
                weight: None,
                port: None,
                ttl: 3600,
                active: true,
            })
            .await
            .unwrap();
        store.delete_zone("example.com").await.unwrap_err();

        let events = store.list_audit_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, crate::audit::AuditEventKind::ZoneCreated);
        assert_eq!(events[1].kind, crate::audit::AuditEventKind::RecordCreated);
        assert!(crate::audit::verify_chain(&events).is_ok());
    }
}
