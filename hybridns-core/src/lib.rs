//! # hybridns-core
//!
//! Core control-plane library for a hybrid authoritative/forwarding DNS
//! management system: zone and record CRUD with a transactional
//! validate-backup-write-reload-verify pipeline, forwarder health
//! probing, RPZ/threat-feed ingestion, query-log tailing, a typed event
//! bus, and a scheduler tying the periodic pieces together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hybridns_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let store = MemoryStore::new();
//!     let bus = EventBus::new(store, config.event_bus.clone());
//!
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod audit;
pub mod backup;
pub mod bus;
pub mod config;
pub mod error;
pub mod feed;
pub mod health_tracker;
pub mod log_ingest;
pub mod observability;
pub mod projection;
pub mod render;
pub mod scheduler;
pub mod store;
pub mod validate;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Config, EventBusConfig, ServiceConfig};
    pub use crate::error::{Error, FieldError, ProjectionPhase, Result};
    pub use crate::observability::{init_tracing, shutdown_tracing};

    pub use crate::audit::{AuditChain, AuditEvent, AuditEventKind, AuditLog, AuditSeverity, verify_chain};

    pub use crate::store::model::{
        Backup, BackupType, Connection, ConnectionStatus, Event, EventCategory, EventPriority, EventSeverity,
        EventSubscription, Forwarder, ForwarderHealth, ForwarderType, HealthStatus, QueryLogRow, Record, RecordType,
        RpzAction, RpzRule, RpzSource, Server, SubscriptionFilter, ThreatFeed, Zone, ZoneType,
    };
    pub use crate::store::{BulkRowError, BulkUpsertResult, EventListFilter, LibsqlStore, MemoryStore, Store};

    pub use crate::validate::{validate_dns_name, validate_forwarder, validate_record, validate_rpz_rule, validate_zone};

    pub use crate::backup::BackupStore;

    pub use crate::render::{
        next_serial, render_named_conf_local, render_named_conf_options, render_rpz_file, render_zone_file,
    };

    pub use crate::projection::{
        ForwarderChange, ProjectionEngine, RecordChange, ResolverControl, RndcResolverControl, RpzRuleChange,
        Transaction, TransactionOutcome, TxResult, ZoneChange,
    };

    pub use crate::health_tracker::{HealthTracker, ProbeOutcome, StatusTransition};

    pub use crate::feed::{FeedPipeline, FeedRefreshOutcome, ImportResult};

    pub use crate::log_ingest::LogIngestor;

    pub use crate::bus::{Delivery, EventBus};
    pub use crate::bus::delivery::{backoff_delay, DeliveryRecord, DeliveryState};

    pub use crate::scheduler::{
        Scheduler, BACKUP_PRUNE, FEED_REFRESH_TICK, HEALTH_PROBE_TICK, QUERY_LOG_ROTATE_CHECK,
    };

    pub use crate::agents::{BackgroundWorker, TaskStatus};

    // Re-export tracing macros for downstream crates.
    pub use tracing::{debug, error, info, instrument, trace, warn, Level};

    pub use tokio;

    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
