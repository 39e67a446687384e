//! Model Store Gateway (C1)
//!
//! The single point of contact between every other component and the
//! durable model: zones, records, forwarders, RPZ rules, threat feeds,
//! events, and query-log rows. RPITIT async methods, no `async_trait`, but
//! specialised per entity rather than generic, since identity and
//! uniqueness differ per table (zones key on name, records on a composite
//! tuple, RPZ rules on `(rpz_zone, domain)`).
//!
//! Two implementations exist: [`memory::MemoryStore`] for tests and local
//! development, and a libsql-backed implementation built on
//! [`backend_libsql`] for production.

pub mod backend_libsql;
pub mod libsql_store;
pub mod memory;
pub mod model;

pub use libsql_store::LibsqlStore;
pub use memory::MemoryStore;

use std::future::Future;

use crate::error::{FieldError, Result};
use model::{
    Event, EventSubscription, Forwarder, ForwarderHealth, QueryLogRow, Record, RpzRule, ThreatFeed, Zone,
};

/// Filter for listing persisted events.
#[derive(Debug, Clone, Default)]
pub struct EventListFilter {
    pub category: Option<model::EventCategory>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<u32>,
}

/// One row rejected by validation during a bulk upsert. `identity` is the
/// row's natural key (record tuple or `(rpz_zone, domain)`), not its
/// position alone, since feed batches are large enough that an index by
/// itself isn't enough to find the offending row in logs.
#[derive(Debug, Clone)]
pub struct BulkRowError {
    pub index: usize,
    pub identity: String,
    pub errors: Vec<FieldError>,
}

/// Outcome of [`Store::bulk_upsert_records`]/[`Store::bulk_upsert_rpz_rules`].
/// Rows that fail validation are counted in `skipped` and detailed in
/// `errors`, never silently merged into `added`/`updated`.
#[derive(Debug, Clone, Default)]
pub struct BulkUpsertResult {
    pub added: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errors: Vec<BulkRowError>,
}

impl BulkUpsertResult {
    pub fn total_changed(&self) -> u32 {
        self.added + self.updated
    }
}

/// The Model Store Gateway: typed CRUD over every entity in §3, plus the
/// bulk paths the feed pipeline (C7) and log ingestor (C8) need.
///
/// Every method returns [`crate::error::Error`] directly rather than a
/// repository-specific error type — callers (the projection engine, the
/// validators) need `NotFound`/`Conflict`/`Referential`/`StoreUnavailable`
/// uniformly across every entity kind.
pub trait Store: Send + Sync {
    // -- Zones --------------------------------------------------------

    fn create_zone(&self, zone: Zone) -> impl Future<Output = Result<Zone>> + Send;
    fn get_zone(&self, name: &str) -> impl Future<Output = Result<Option<Zone>>> + Send;
    fn list_zones(&self) -> impl Future<Output = Result<Vec<Zone>>> + Send;
    fn update_zone(&self, zone: Zone) -> impl Future<Output = Result<Zone>> + Send;
    /// Fails with `Error::Referential` if the zone still owns records.
    fn delete_zone(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    // -- Records --------------------------------------------------------

    fn create_record(&self, record: Record) -> impl Future<Output = Result<Record>> + Send;
    fn list_records(&self, zone_name: &str) -> impl Future<Output = Result<Vec<Record>>> + Send;
    fn update_record(&self, record: Record) -> impl Future<Output = Result<Record>> + Send;
    fn delete_record(
        &self,
        zone_name: &str,
        name: &str,
        record_type: model::RecordType,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;
    /// Insert/replace by identity tuple. Used by the RPZ/threat-feed
    /// pipeline (C7) to diff a feed against the current rule set in one
    /// round trip instead of issuing a create/update per row.
    fn bulk_upsert_records(&self, records: Vec<Record>) -> impl Future<Output = Result<BulkUpsertResult>> + Send;

    // -- Forwarders --------------------------------------------------------

    fn create_forwarder(&self, forwarder: Forwarder) -> impl Future<Output = Result<Forwarder>> + Send;
    fn get_forwarder(&self, name: &str) -> impl Future<Output = Result<Option<Forwarder>>> + Send;
    fn list_forwarders(&self) -> impl Future<Output = Result<Vec<Forwarder>>> + Send;
    fn update_forwarder(&self, forwarder: Forwarder) -> impl Future<Output = Result<Forwarder>> + Send;
    fn delete_forwarder(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    // -- Forwarder health --------------------------------------------------------

    /// Insert-only: health rows are a time series, never mutated.
    fn record_health(&self, row: ForwarderHealth) -> impl Future<Output = Result<()>> + Send;
    fn list_health(&self, forwarder_name: &str, limit: u32) -> impl Future<Output = Result<Vec<ForwarderHealth>>> + Send;

    // -- RPZ rules --------------------------------------------------------

    fn create_rpz_rule(&self, rule: RpzRule) -> impl Future<Output = Result<RpzRule>> + Send;
    fn list_rpz_rules(&self, rpz_zone: &str) -> impl Future<Output = Result<Vec<RpzRule>>> + Send;
    fn update_rpz_rule(&self, rule: RpzRule) -> impl Future<Output = Result<RpzRule>> + Send;
    fn delete_rpz_rule(&self, rpz_zone: &str, domain: &str) -> impl Future<Output = Result<()>> + Send;
    /// Diff-and-submit entry point for C7: upserts by `(rpz_zone, domain)`,
    /// returns the number of rows changed.
    fn bulk_upsert_rpz_rules(&self, rules: Vec<RpzRule>) -> impl Future<Output = Result<BulkUpsertResult>> + Send;

    // -- Threat feeds --------------------------------------------------------

    fn create_threat_feed(&self, feed: ThreatFeed) -> impl Future<Output = Result<ThreatFeed>> + Send;
    fn list_threat_feeds(&self) -> impl Future<Output = Result<Vec<ThreatFeed>>> + Send;
    fn update_threat_feed(&self, feed: ThreatFeed) -> impl Future<Output = Result<ThreatFeed>> + Send;
    fn delete_threat_feed(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    // -- Events --------------------------------------------------------

    fn record_event(&self, event: Event) -> impl Future<Output = Result<()>> + Send;
    fn list_events(&self, filter: EventListFilter) -> impl Future<Output = Result<Vec<Event>>> + Send;

    // -- Event bus subscriptions --------------------------------------------------------

    fn save_subscription(&self, sub: EventSubscription) -> impl Future<Output = Result<()>> + Send;
    fn list_subscriptions(&self, connection_id: uuid::Uuid) -> impl Future<Output = Result<Vec<EventSubscription>>> + Send;

    // -- Query log --------------------------------------------------------

    /// Append a batch of parsed query-log rows (C8 flushes in batches, not
    /// row by row).
    fn record_query_log_batch(&self, rows: Vec<QueryLogRow>) -> impl Future<Output = Result<()>> + Send;

    // -- Audit --------------------------------------------------------

    /// Every sealed audit entry in arrival order, for `audit::verify_chain`
    /// or export. Not a domain entity — see `[AMBIENT] AuditEntry` in §3.
    fn list_audit_events(&self) -> impl Future<Output = Result<Vec<crate::audit::AuditEvent>>> + Send;
}

/// Lets one store be shared by value across the projection engine, feed
/// pipeline, log ingestor, and event bus instead of each owning a copy.
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    fn create_zone(&self, zone: Zone) -> impl Future<Output = Result<Zone>> + Send {
        (**self).create_zone(zone)
    }
    fn get_zone(&self, name: &str) -> impl Future<Output = Result<Option<Zone>>> + Send {
        (**self).get_zone(name)
    }
    fn list_zones(&self) -> impl Future<Output = Result<Vec<Zone>>> + Send {
        (**self).list_zones()
    }
    fn update_zone(&self, zone: Zone) -> impl Future<Output = Result<Zone>> + Send {
        (**self).update_zone(zone)
    }
    fn delete_zone(&self, name: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete_zone(name)
    }

    fn create_record(&self, record: Record) -> impl Future<Output = Result<Record>> + Send {
        (**self).create_record(record)
    }
    fn list_records(&self, zone_name: &str) -> impl Future<Output = Result<Vec<Record>>> + Send {
        (**self).list_records(zone_name)
    }
    fn update_record(&self, record: Record) -> impl Future<Output = Result<Record>> + Send {
        (**self).update_record(record)
    }
    fn delete_record(
        &self,
        zone_name: &str,
        name: &str,
        record_type: model::RecordType,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).delete_record(zone_name, name, record_type, value)
    }
    fn bulk_upsert_records(&self, records: Vec<Record>) -> impl Future<Output = Result<BulkUpsertResult>> + Send {
        (**self).bulk_upsert_records(records)
    }

    fn create_forwarder(&self, forwarder: Forwarder) -> impl Future<Output = Result<Forwarder>> + Send {
        (**self).create_forwarder(forwarder)
    }
    fn get_forwarder(&self, name: &str) -> impl Future<Output = Result<Option<Forwarder>>> + Send {
        (**self).get_forwarder(name)
    }
    fn list_forwarders(&self) -> impl Future<Output = Result<Vec<Forwarder>>> + Send {
        (**self).list_forwarders()
    }
    fn update_forwarder(&self, forwarder: Forwarder) -> impl Future<Output = Result<Forwarder>> + Send {
        (**self).update_forwarder(forwarder)
    }
    fn delete_forwarder(&self, name: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete_forwarder(name)
    }

    fn record_health(&self, row: ForwarderHealth) -> impl Future<Output = Result<()>> + Send {
        (**self).record_health(row)
    }
    fn list_health(&self, forwarder_name: &str, limit: u32) -> impl Future<Output = Result<Vec<ForwarderHealth>>> + Send {
        (**self).list_health(forwarder_name, limit)
    }

    fn create_rpz_rule(&self, rule: RpzRule) -> impl Future<Output = Result<RpzRule>> + Send {
        (**self).create_rpz_rule(rule)
    }
    fn list_rpz_rules(&self, rpz_zone: &str) -> impl Future<Output = Result<Vec<RpzRule>>> + Send {
        (**self).list_rpz_rules(rpz_zone)
    }
    fn update_rpz_rule(&self, rule: RpzRule) -> impl Future<Output = Result<RpzRule>> + Send {
        (**self).update_rpz_rule(rule)
    }
    fn delete_rpz_rule(&self, rpz_zone: &str, domain: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete_rpz_rule(rpz_zone, domain)
    }
    fn bulk_upsert_rpz_rules(&self, rules: Vec<RpzRule>) -> impl Future<Output = Result<BulkUpsertResult>> + Send {
        (**self).bulk_upsert_rpz_rules(rules)
    }

    fn create_threat_feed(&self, feed: ThreatFeed) -> impl Future<Output = Result<ThreatFeed>> + Send {
        (**self).create_threat_feed(feed)
    }
    fn list_threat_feeds(&self) -> impl Future<Output = Result<Vec<ThreatFeed>>> + Send {
        (**self).list_threat_feeds()
    }
    fn update_threat_feed(&self, feed: ThreatFeed) -> impl Future<Output = Result<ThreatFeed>> + Send {
        (**self).update_threat_feed(feed)
    }
    fn delete_threat_feed(&self, name: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete_threat_feed(name)
    }

    fn record_event(&self, event: Event) -> impl Future<Output = Result<()>> + Send {
        (**self).record_event(event)
    }
    fn list_events(&self, filter: EventListFilter) -> impl Future<Output = Result<Vec<Event>>> + Send {
        (**self).list_events(filter)
    }

    fn save_subscription(&self, sub: EventSubscription) -> impl Future<Output = Result<()>> + Send {
        (**self).save_subscription(sub)
    }
    fn list_subscriptions(&self, connection_id: uuid::Uuid) -> impl Future<Output = Result<Vec<EventSubscription>>> + Send {
        (**self).list_subscriptions(connection_id)
    }

    fn record_query_log_batch(&self, rows: Vec<QueryLogRow>) -> impl Future<Output = Result<()>> + Send {
        (**self).record_query_log_batch(rows)
    }

    fn list_audit_events(&self) -> impl Future<Output = Result<Vec<crate::audit::AuditEvent>>> + Send {
        (**self).list_audit_events()
    }
}
