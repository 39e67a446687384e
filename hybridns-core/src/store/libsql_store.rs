//! [`Store`] implementation backed by libsql/Turso.
//!
//! Every entity is kept in one JSON-per-row table, keyed by its natural
//! identity string — the same "any SQL engine with JSON columns" contract
//! the spec names, generalized once rather than per entity. This keeps the
//! production backend schema-stable as entities gain fields, at the cost
//! of not being queryable from plain SQL; every query this crate issues
//! goes back through `Store`, never raw SQL from a caller.

use std::sync::Arc;

use libsql::{params, Connection};
use uuid::Uuid;

use super::model::{
    Event, EventSubscription, Forwarder, ForwarderHealth, QueryLogRow, Record, RecordType, RpzRule, ThreatFeed, Zone,
};
use super::{backend_libsql::StoreConfig, BulkRowError, BulkUpsertResult, EventListFilter, Store};
use crate::audit::{AuditEvent, AuditEventKind, AuditLog, AuditSeverity};
use crate::error::{Error, Result};
use crate::validate::{validate_forwarder, validate_record, validate_rpz_rule, validate_zone};

fn record_key(zone_name: &str, name: &str, record_type: RecordType, value: &str) -> String {
    format!("{zone_name}\u{1}{name}\u{1}{record_type:?}\u{1}{value}")
}

fn rpz_key(rpz_zone: &str, domain: &str) -> String {
    format!("{rpz_zone}\u{1}{domain}")
}

fn to_store_err(e: libsql::Error) -> Error {
    Error::StoreUnavailable(format!("libsql error: {e}"))
}

fn to_json_err(e: serde_json::Error) -> Error {
    Error::StoreUnavailable(format!("store row corrupt: {e}"))
}

/// Production [`Store`] implementation, grounded on the teacher's
/// `TursoApiKeyStorage` (`Arc<Connection>` + bare `?N` params, no ORM).
#[derive(Clone)]
pub struct LibsqlStore {
    conn: Arc<Connection>,
    audit: Arc<AuditLog>,
}

impl LibsqlStore {
    /// Connect (with the retry/backoff behaviour of
    /// [`super::backend_libsql::create_database`]) and ensure the schema
    /// exists.
    pub async fn connect(config: &StoreConfig, service_name: impl Into<String>) -> Result<Self> {
        let db = super::backend_libsql::create_database(config).await?;
        let conn = db.connect().map_err(to_store_err)?;
        let store = Self {
            conn: Arc::new(conn),
            audit: Arc::new(AuditLog::new(service_name)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS entities (
                    entity_type TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    data TEXT NOT NULL,
                    PRIMARY KEY (entity_type, entity_id)
                );
                CREATE TABLE IF NOT EXISTS health_log (
                    forwarder_name TEXT NOT NULL,
                    checked_at TEXT NOT NULL,
                    data TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_health_log_forwarder ON health_log(forwarder_name);
                CREATE TABLE IF NOT EXISTS events (
                    event_id TEXT PRIMARY KEY,
                    category TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    data TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS subscriptions (
                    connection_id TEXT NOT NULL,
                    data TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS query_log (
                    data TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS audit_log (
                    sequence INTEGER PRIMARY KEY,
                    data TEXT NOT NULL
                );",
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn get_entity<T: serde::de::DeserializeOwned>(&self, entity_type: &str, entity_id: &str) -> Result<Option<T>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM entities WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id],
            )
            .await
            .map_err(to_store_err)?;
        match rows.next().await.map_err(to_store_err)? {
            Some(row) => {
                let data: String = row.get(0).map_err(to_store_err)?;
                Ok(Some(serde_json::from_str(&data).map_err(to_json_err)?))
            }
            None => Ok(None),
        }
    }

    async fn list_entities<T: serde::de::DeserializeOwned>(&self, entity_type: &str) -> Result<Vec<T>> {
        let mut rows = self
            .conn
            .query("SELECT data FROM entities WHERE entity_type = ?1", params![entity_type])
            .await
            .map_err(to_store_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(to_store_err)? {
            let data: String = row.get(0).map_err(to_store_err)?;
            out.push(serde_json::from_str(&data).map_err(to_json_err)?);
        }
        Ok(out)
    }

    async fn list_entities_where<T: serde::de::DeserializeOwned>(
        &self,
        entity_type: &str,
        id_prefix: &str,
    ) -> Result<Vec<T>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM entities WHERE entity_type = ?1 AND entity_id LIKE ?2",
                params![entity_type, format!("{id_prefix}%")],
            )
            .await
            .map_err(to_store_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(to_store_err)? {
            let data: String = row.get(0).map_err(to_store_err)?;
            out.push(serde_json::from_str(&data).map_err(to_json_err)?);
        }
        Ok(out)
    }

    async fn insert_entity<T: serde::Serialize>(&self, entity_type: &str, entity_id: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string(value).map_err(to_json_err)?;
        self.conn
            .execute(
                "INSERT INTO entities (entity_type, entity_id, data) VALUES (?1, ?2, ?3)",
                params![entity_type, entity_id, data],
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn upsert_entity<T: serde::Serialize>(&self, entity_type: &str, entity_id: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string(value).map_err(to_json_err)?;
        self.conn
            .execute(
                "INSERT INTO entities (entity_type, entity_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT (entity_type, entity_id) DO UPDATE SET data = excluded.data",
                params![entity_type, entity_id, data],
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM entities WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id],
            )
            .await
            .map_err(to_store_err)?;
        Ok(changed > 0)
    }

    async fn exists(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM entities WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id],
            )
            .await
            .map_err(to_store_err)?;
        Ok(rows.next().await.map_err(to_store_err)?.is_some())
    }

    async fn seal(&self, kind: AuditEventKind, severity: AuditSeverity, entity_type: &str, entity_id: &str) -> Result<()> {
        let event = self.audit.seal(kind, severity, entity_type, entity_id);
        self.persist_audit_event(&event).await
    }

    async fn persist_audit_event(&self, event: &AuditEvent) -> Result<()> {
        let data = serde_json::to_string(event).map_err(to_json_err)?;
        self.conn
            .execute(
                "INSERT INTO audit_log (sequence, data) VALUES (?1, ?2)",
                params![event.sequence as i64, data],
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }
}

impl Store for LibsqlStore {
    async fn create_zone(&self, zone: Zone) -> Result<Zone> {
        let errors = validate_zone(&zone);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if self.exists("zone", &zone.name).await? {
            return Err(Error::conflict("name", format!("zone '{}' already exists", zone.name)));
        }
        self.seal(AuditEventKind::ZoneCreated, AuditSeverity::Informational, "zone", &zone.name).await?;
        self.insert_entity("zone", &zone.name, &zone).await?;
        Ok(zone)
    }

    async fn get_zone(&self, name: &str) -> Result<Option<Zone>> {
        self.get_entity("zone", name).await
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.list_entities("zone").await
    }

    async fn update_zone(&self, zone: Zone) -> Result<Zone> {
        let errors = validate_zone(&zone);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if !self.exists("zone", &zone.name).await? {
            return Err(Error::not_found("zone", zone.name));
        }
        self.seal(AuditEventKind::ZoneUpdated, AuditSeverity::Informational, "zone", &zone.name).await?;
        self.upsert_entity("zone", &zone.name, &zone).await?;
        Ok(zone)
    }

    async fn delete_zone(&self, name: &str) -> Result<()> {
        let has_records = !self.list_entities_where::<Record>("record", &format!("{name}\u{1}")).await?.is_empty();
        if has_records {
            return Err(Error::Referential {
                parent: format!("zone {name}"),
                child: "record".to_string(),
            });
        }
        if !self.delete_entity("zone", name).await? {
            return Err(Error::not_found("zone", name));
        }
        self.seal(AuditEventKind::ZoneDeleted, AuditSeverity::Notice, "zone", name).await?;
        Ok(())
    }

    async fn create_record(&self, record: Record) -> Result<Record> {
        let is_apex = record.name == "@" || record.name == record.zone_name;
        let errors = validate_record(&record, is_apex);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = record_key(&record.zone_name, &record.name, record.record_type, &record.value);
        if self.exists("record", &key).await? {
            return Err(Error::conflict("identity", "record already exists with this identity"));
        }
        self.seal(AuditEventKind::RecordCreated, AuditSeverity::Informational, "record", &record.name).await?;
        self.insert_entity("record", &key, &record).await?;
        Ok(record)
    }

    async fn list_records(&self, zone_name: &str) -> Result<Vec<Record>> {
        self.list_entities_where("record", &format!("{zone_name}\u{1}")).await
    }

    async fn update_record(&self, record: Record) -> Result<Record> {
        let is_apex = record.name == "@" || record.name == record.zone_name;
        let errors = validate_record(&record, is_apex);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = record_key(&record.zone_name, &record.name, record.record_type, &record.value);
        if !self.exists("record", &key).await? {
            return Err(Error::not_found("record", record.name.clone()));
        }
        self.seal(AuditEventKind::RecordUpdated, AuditSeverity::Informational, "record", &record.name).await?;
        self.upsert_entity("record", &key, &record).await?;
        Ok(record)
    }

    async fn delete_record(&self, zone_name: &str, name: &str, record_type: RecordType, value: &str) -> Result<()> {
        let key = record_key(zone_name, name, record_type, value);
        if !self.delete_entity("record", &key).await? {
            return Err(Error::not_found("record", name));
        }
        self.seal(AuditEventKind::RecordDeleted, AuditSeverity::Informational, "record", name).await?;
        Ok(())
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
            let key = record_key(&record.zone_name, &record.name, record.record_type, &record.value);
            let existed = self.exists("record", &key).await?;
            self.upsert_entity("record", &key, &record).await?;
            if existed {
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
        if self.exists("forwarder", &forwarder.name).await? {
            return Err(Error::conflict("name", format!("forwarder '{}' already exists", forwarder.name)));
        }
        self.seal(AuditEventKind::ForwarderCreated, AuditSeverity::Informational, "forwarder", &forwarder.name).await?;
        self.insert_entity("forwarder", &forwarder.name, &forwarder).await?;
        Ok(forwarder)
    }

    async fn get_forwarder(&self, name: &str) -> Result<Option<Forwarder>> {
        self.get_entity("forwarder", name).await
    }

    async fn list_forwarders(&self) -> Result<Vec<Forwarder>> {
        self.list_entities("forwarder").await
    }

    async fn update_forwarder(&self, forwarder: Forwarder) -> Result<Forwarder> {
        let errors = validate_forwarder(&forwarder);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        if !self.exists("forwarder", &forwarder.name).await? {
            return Err(Error::not_found("forwarder", forwarder.name));
        }
        self.seal(AuditEventKind::ForwarderUpdated, AuditSeverity::Informational, "forwarder", &forwarder.name).await?;
        self.upsert_entity("forwarder", &forwarder.name, &forwarder).await?;
        Ok(forwarder)
    }

    async fn delete_forwarder(&self, name: &str) -> Result<()> {
        if !self.delete_entity("forwarder", name).await? {
            return Err(Error::not_found("forwarder", name));
        }
        self.seal(AuditEventKind::ForwarderDeleted, AuditSeverity::Informational, "forwarder", name).await?;
        Ok(())
    }

    async fn record_health(&self, row: ForwarderHealth) -> Result<()> {
        let data = serde_json::to_string(&row).map_err(to_json_err)?;
        self.conn
            .execute(
                "INSERT INTO health_log (forwarder_name, checked_at, data) VALUES (?1, ?2, ?3)",
                params![row.forwarder_name.clone(), row.checked_at.to_rfc3339(), data],
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn list_health(&self, forwarder_name: &str, limit: u32) -> Result<Vec<ForwarderHealth>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM health_log WHERE forwarder_name = ?1 ORDER BY checked_at DESC LIMIT ?2",
                params![forwarder_name, limit as i64],
            )
            .await
            .map_err(to_store_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(to_store_err)? {
            let data: String = row.get(0).map_err(to_store_err)?;
            out.push(serde_json::from_str(&data).map_err(to_json_err)?);
        }
        Ok(out)
    }

    async fn create_rpz_rule(&self, rule: RpzRule) -> Result<RpzRule> {
        let errors = validate_rpz_rule(&rule);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = rpz_key(&rule.rpz_zone, &rule.domain);
        if self.exists("rpz_rule", &key).await? {
            return Err(Error::conflict("domain", format!("rule for '{}' already exists in {}", rule.domain, rule.rpz_zone)));
        }
        self.seal(AuditEventKind::RpzRuleCreated, AuditSeverity::Informational, "rpz_rule", &rule.domain).await?;
        self.insert_entity("rpz_rule", &key, &rule).await?;
        Ok(rule)
    }

    async fn list_rpz_rules(&self, rpz_zone: &str) -> Result<Vec<RpzRule>> {
        self.list_entities_where("rpz_rule", &format!("{rpz_zone}\u{1}")).await
    }

    async fn update_rpz_rule(&self, rule: RpzRule) -> Result<RpzRule> {
        let errors = validate_rpz_rule(&rule);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let key = rpz_key(&rule.rpz_zone, &rule.domain);
        if !self.exists("rpz_rule", &key).await? {
            return Err(Error::not_found("rpz_rule", rule.domain));
        }
        self.seal(AuditEventKind::RpzRuleUpdated, AuditSeverity::Informational, "rpz_rule", &rule.domain).await?;
        self.upsert_entity("rpz_rule", &key, &rule).await?;
        Ok(rule)
    }

    async fn delete_rpz_rule(&self, rpz_zone: &str, domain: &str) -> Result<()> {
        let key = rpz_key(rpz_zone, domain);
        if !self.delete_entity("rpz_rule", &key).await? {
            return Err(Error::not_found("rpz_rule", domain));
        }
        self.seal(AuditEventKind::RpzRuleDeleted, AuditSeverity::Informational, "rpz_rule", domain).await?;
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
            let key = rpz_key(&rule.rpz_zone, &rule.domain);
            let existed = self.exists("rpz_rule", &key).await?;
            self.upsert_entity("rpz_rule", &key, &rule).await?;
            if existed {
                result.updated += 1;
            } else {
                result.added += 1;
            }
        }
        Ok(result)
    }

    async fn create_threat_feed(&self, feed: ThreatFeed) -> Result<ThreatFeed> {
        if self.exists("threat_feed", &feed.name).await? {
            return Err(Error::conflict("name", format!("threat feed '{}' already exists", feed.name)));
        }
        self.seal(AuditEventKind::ThreatFeedCreated, AuditSeverity::Informational, "threat_feed", &feed.name).await?;
        self.insert_entity("threat_feed", &feed.name, &feed).await?;
        Ok(feed)
    }

    async fn list_threat_feeds(&self) -> Result<Vec<ThreatFeed>> {
        self.list_entities("threat_feed").await
    }

    async fn update_threat_feed(&self, feed: ThreatFeed) -> Result<ThreatFeed> {
        if !self.exists("threat_feed", &feed.name).await? {
            return Err(Error::not_found("threat_feed", feed.name));
        }
        self.seal(AuditEventKind::ThreatFeedUpdated, AuditSeverity::Informational, "threat_feed", &feed.name).await?;
        self.upsert_entity("threat_feed", &feed.name, &feed).await?;
        Ok(feed)
    }

    async fn delete_threat_feed(&self, name: &str) -> Result<()> {
        if !self.delete_entity("threat_feed", name).await? {
            return Err(Error::not_found("threat_feed", name));
        }
        self.seal(AuditEventKind::ThreatFeedDeleted, AuditSeverity::Informational, "threat_feed", name).await?;
        Ok(())
    }

    async fn record_event(&self, event: Event) -> Result<()> {
        let category = serde_json::to_string(&event.category).map_err(to_json_err)?;
        let data = serde_json::to_string(&event).map_err(to_json_err)?;
        self.conn
            .execute(
                "INSERT INTO events (event_id, category, created_at, data) VALUES (?1, ?2, ?3, ?4)",
                params![event.event_id.to_string(), category, event.created_at.to_rfc3339(), data],
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn list_events(&self, filter: EventListFilter) -> Result<Vec<Event>> {
        let mut rows = self
            .conn
            .query("SELECT data, created_at FROM events ORDER BY created_at ASC", params![])
            .await
            .map_err(to_store_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(to_store_err)? {
            let data: String = row.get(0).map_err(to_store_err)?;
            let event: Event = serde_json::from_str(&data).map_err(to_json_err)?;
            if let Some(category) = filter.category {
                if event.category != category {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if event.created_at < since {
                    continue;
                }
            }
            out.push(event);
        }
        if let Some(limit) = filter.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    async fn save_subscription(&self, sub: EventSubscription) -> Result<()> {
        let data = serde_json::to_string(&sub).map_err(to_json_err)?;
        self.conn
            .execute(
                "INSERT INTO subscriptions (connection_id, data) VALUES (?1, ?2)",
                params![sub.connection_id.to_string(), data],
            )
            .await
            .map_err(to_store_err)?;
        Ok(())
    }

    async fn list_subscriptions(&self, connection_id: Uuid) -> Result<Vec<EventSubscription>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM subscriptions WHERE connection_id = ?1",
                params![connection_id.to_string()],
            )
            .await
            .map_err(to_store_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(to_store_err)? {
            let data: String = row.get(0).map_err(to_store_err)?;
            out.push(serde_json::from_str(&data).map_err(to_json_err)?);
        }
        Ok(out)
    }

    async fn record_query_log_batch(&self, rows: Vec<QueryLogRow>) -> Result<()> {
        for row in rows {
            let data = serde_json::to_string(&row).map_err(to_json_err)?;
            self.conn
                .execute("INSERT INTO query_log (data) VALUES (?1)", params![data])
                .await
                .map_err(to_store_err)?;
        }
        Ok(())
    }

    async fn list_audit_events(&self) -> Result<Vec<AuditEvent>> {
        let mut rows = self
            .conn
            .query("SELECT data FROM audit_log ORDER BY sequence ASC", params![])
            .await
            .map_err(to_store_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(to_store_err)? {
            let data: String = row.get(0).map_err(to_store_err)?;
            out.push(serde_json::from_str(&data).map_err(to_json_err)?);
        }
        Ok(out)
    }
}
