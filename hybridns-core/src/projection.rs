//! Projection Engine (C5)
//!
//! The single writer for every resolver-visible file. Accepts a
//! [`Transaction`] — a grouped batch of zone/record/forwarder/rpz-rule
//! changes — and applies it through a fixed state machine:
//!
//! ```text
//! received -> validating -> backup -> writing -> reloading -> verifying -> committed
//!                 \-> failed                 \-> rolling_back -> rolled_back
//! ```
//!
//! A process-wide [`tokio::sync::Mutex`] serialises every transaction, so
//! the audit chain (sealed in arrival order) and the on-disk files never
//! see interleaved writes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, FieldError, ProjectionPhase, Result};
use crate::store::model::{Forwarder, Record, RecordType, RpzRule, Zone, ZoneType};
use crate::store::Store;

/// The resolver's control channel: validate a rendered configuration before
/// committing to it, then signal the running resolver to pick it up.
pub trait ResolverControl: Send + Sync {
    fn check_config(&self, bind_etc: &Path) -> impl std::future::Future<Output = Result<()>> + Send;
    fn reload(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Shells out to `named-checkconf` and `rndc reload`, the same
/// [`tokio::process::Command`] pattern the CLI uses for `git`/`cargo`.
pub struct RndcResolverControl {
    pub named_checkconf_bin: String,
    pub rndc_bin: String,
}

impl Default for RndcResolverControl {
    fn default() -> Self {
        Self {
            named_checkconf_bin: "named-checkconf".to_string(),
            rndc_bin: "rndc".to_string(),
        }
    }
}

impl ResolverControl for RndcResolverControl {
    async fn check_config(&self, bind_etc: &Path) -> Result<()> {
        let output = Command::new(&self.named_checkconf_bin)
            .arg(bind_etc.join("named.conf"))
            .output()
            .await
            .map_err(|e| Error::ResolverUnavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::ResolverRejectedConfig(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }

    async fn reload(&self) -> Result<()> {
        let output = Command::new(&self.rndc_bin)
            .arg("reload")
            .output()
            .await
            .map_err(|e| Error::ResolverUnavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::ResolverUnavailable(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
    /// `dry_run` transactions never reach backup/write — this reports the
    /// validation outcome only.
    Validated,
}

/// A change to one [`Zone`] within a [`Transaction`].
#[derive(Debug, Clone)]
pub enum ZoneChange {
    Upsert(Zone),
    Delete(String),
}

/// A change to one [`Record`] within a [`Transaction`].
#[derive(Debug, Clone)]
pub enum RecordChange {
    Upsert(Record),
    Delete {
        zone_name: String,
        name: String,
        record_type: RecordType,
        value: String,
    },
}

/// A change to one [`Forwarder`] within a [`Transaction`].
#[derive(Debug, Clone)]
pub enum ForwarderChange {
    Upsert(Forwarder),
    Delete(String),
}

/// A change to one [`RpzRule`] within a [`Transaction`].
#[derive(Debug, Clone)]
pub enum RpzRuleChange {
    Upsert(RpzRule),
    Delete { rpz_zone: String, domain: String },
}

/// An ordered batch of model changes submitted to [`ProjectionEngine::submit_transaction`]
/// as a single atomic unit.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub zones: Vec<ZoneChange>,
    pub records: Vec<RecordChange>,
    pub forwarders: Vec<ForwarderChange>,
    pub rpz_rules: Vec<RpzRuleChange>,
    /// Run validation and conflict detection, then stop before backup/write.
    pub dry_run: bool,
    pub description: String,
    /// Take a backup even if none of the computed touch-set files exist yet.
    pub force_backup: bool,
    /// Zones to re-render even though nothing in `zones`/`records` touches
    /// them directly — used when a caller already wrote model changes
    /// through the store (e.g. the feed pipeline upserting RPZ rules) and
    /// only needs the resulting files projected.
    pub touch_zones: Vec<String>,
    pub touch_rpz_zones: Vec<String>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
            && self.records.is_empty()
            && self.forwarders.is_empty()
            && self.rpz_rules.is_empty()
            && self.touch_zones.is_empty()
            && self.touch_rpz_zones.is_empty()
    }

    fn record_change_key(change: &RecordChange) -> (String, String, RecordType, String) {
        match change {
            RecordChange::Upsert(r) => (r.zone_name.clone(), r.name.clone(), r.record_type, r.value.clone()),
            RecordChange::Delete { zone_name, name, record_type, value } => (zone_name.clone(), name.clone(), *record_type, value.clone()),
        }
    }

    /// Conflicts that only show up once the whole batch is considered
    /// together: two changes targeting the same record identity, or a zone
    /// deletion alongside pending changes to that zone's records.
    fn detect_conflicts(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        let mut seen_records = HashSet::new();
        for change in &self.records {
            let key = Self::record_change_key(change);
            if !seen_records.insert(key.clone()) {
                errors.push(FieldError::new(
                    "records",
                    format!("multiple changes target record '{}' in zone '{}'", key.1, key.0),
                    "submit at most one change per record identity per transaction",
                ));
            }
        }

        let deleted_zones: HashSet<&str> = self
            .zones
            .iter()
            .filter_map(|c| match c {
                ZoneChange::Delete(name) => Some(name.as_str()),
                ZoneChange::Upsert(_) => None,
            })
            .collect();
        for change in &self.records {
            let zone_name = match change {
                RecordChange::Upsert(r) => r.zone_name.as_str(),
                RecordChange::Delete { zone_name, .. } => zone_name.as_str(),
            };
            if deleted_zones.contains(zone_name) {
                errors.push(FieldError::new(
                    "zones",
                    format!("zone '{zone_name}' is being deleted but also has pending record changes"),
                    "remove the record changes or drop the zone deletion",
                ));
            }
        }

        let mut seen_rpz = HashSet::new();
        for change in &self.rpz_rules {
            let key = match change {
                RpzRuleChange::Upsert(r) => (r.rpz_zone.clone(), r.domain.clone()),
                RpzRuleChange::Delete { rpz_zone, domain } => (rpz_zone.clone(), domain.clone()),
            };
            if !seen_rpz.insert(key.clone()) {
                errors.push(FieldError::new(
                    "rpz_rules",
                    format!("multiple changes target rule '{}' in rpz zone '{}'", key.1, key.0),
                    "submit at most one change per (rpz_zone, domain) per transaction",
                ));
            }
        }

        let mut seen_forwarders = HashSet::new();
        for change in &self.forwarders {
            let name = match change {
                ForwarderChange::Upsert(f) => f.name.clone(),
                ForwarderChange::Delete(name) => name.clone(),
            };
            if !seen_forwarders.insert(name.clone()) {
                errors.push(FieldError::new(
                    "forwarders",
                    format!("multiple changes target forwarder '{name}'"),
                    "submit at most one change per forwarder per transaction",
                ));
            }
        }

        errors
    }

    fn affected_zone_names(&self) -> BTreeSet<String> {
        let mut zones = BTreeSet::new();
        for change in &self.zones {
            match change {
                ZoneChange::Upsert(z) => {
                    zones.insert(z.name.clone());
                }
                ZoneChange::Delete(name) => {
                    zones.insert(name.clone());
                }
            }
        }
        for change in &self.records {
            let zone_name = match change {
                RecordChange::Upsert(r) => r.zone_name.clone(),
                RecordChange::Delete { zone_name, .. } => zone_name.clone(),
            };
            zones.insert(zone_name);
        }
        zones.extend(self.touch_zones.iter().cloned());
        zones
    }

    fn affected_rpz_zone_names(&self) -> BTreeSet<String> {
        let mut zones: BTreeSet<String> = self
            .rpz_rules
            .iter()
            .map(|c| match c {
                RpzRuleChange::Upsert(r) => r.rpz_zone.clone(),
                RpzRuleChange::Delete { rpz_zone, .. } => rpz_zone.clone(),
            })
            .collect();
        zones.extend(self.touch_rpz_zones.iter().cloned());
        zones
    }
}

/// Outcome of [`ProjectionEngine::submit_transaction`].
#[derive(Debug, Clone)]
pub struct TxResult {
    pub transaction_id: String,
    pub outcome: TransactionOutcome,
    /// Non-empty only for `dry_run` transactions or a rejected transaction.
    pub validation_errors: Vec<FieldError>,
    pub affected_zones: Vec<String>,
    pub affected_rpz_zones: Vec<String>,
    /// The `full_config` backup taken in step 2, if any file existed to snapshot.
    pub backup_id: Option<String>,
}

/// Applies model changes to disk through the full validate/backup/write/
/// reload/verify pipeline, one transaction at a time.
pub struct ProjectionEngine<S, R> {
    store: S,
    backup: crate::backup::BackupStore,
    resolver: R,
    bind_etc: PathBuf,
    lock: Mutex<()>,
    lock_timeout: Duration,
    /// RPZ zones have no serial field of their own in the model (unlike
    /// `Zone.serial`); the engine tracks the last serial it rendered per
    /// category here rather than widening `Store`'s contract for it.
    rpz_serials: Mutex<HashMap<String, u32>>,
    /// Every RPZ zone name this engine has ever rendered, accumulated across
    /// its lifetime, so `named.conf.local`/`named.conf.options` can list the
    /// full `response-policy` set without a "list all RPZ zones" query on
    /// `Store`.
    known_rpz_zones: Mutex<BTreeSet<String>>,
}

impl<S: Store, R: ResolverControl> ProjectionEngine<S, R> {
    pub fn new(store: S, backup: crate::backup::BackupStore, resolver: R, bind_etc: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            store,
            backup,
            resolver,
            bind_etc,
            lock: Mutex::new(()),
            lock_timeout,
            rpz_serials: Mutex::new(HashMap::new()),
            known_rpz_zones: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn zone_file_path(&self, zone_name: &str) -> PathBuf {
        self.bind_etc.join("zones").join(format!("{zone_name}.zone"))
    }

    fn rpz_file_path(&self, rpz_zone: &str) -> PathBuf {
        self.bind_etc.join("rpz").join(format!("db.rpz.{rpz_zone}"))
    }

    fn named_conf_local_path(&self) -> PathBuf {
        self.bind_etc.join("named.conf.local")
    }

    fn named_conf_options_path(&self) -> PathBuf {
        self.bind_etc.join("named.conf.options")
    }

    /// Submit a batch of model changes for validation, backup, write,
    /// reload, and verification. Only one transaction runs at a time; callers
    /// queue on the same process-wide lock.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<TxResult> {
        let transaction_id = Uuid::new_v4().to_string();

        let guard = tokio::time::timeout(self.lock_timeout, self.lock.lock())
            .await
            .map_err(|_| Error::Timeout(format!("transaction {transaction_id} could not acquire the projection lock")))?;

        let result = self.run_transaction(&transaction_id, tx).await;
        drop(guard);
        result
    }

    /// Convenience wrapper for the common single-zone case: re-render and
    /// rewrite a master zone whose records were just mutated through the
    /// store directly.
    pub async fn project_zone(&self, zone_name: &str) -> Result<TransactionOutcome> {
        let zone = self
            .store
            .get_zone(zone_name)
            .await?
            .ok_or_else(|| Error::not_found("zone", zone_name))?;
        let tx = Transaction {
            zones: vec![ZoneChange::Upsert(zone)],
            ..Default::default()
        };
        Ok(self.submit_transaction(tx).await?.outcome)
    }

    /// Re-render and rewrite an RPZ zone's file and the `named.conf.*` files
    /// that reference it, after a caller (the feed pipeline) has already
    /// written its rules directly to the store.
    pub async fn project_rpz_zone(&self, rpz_zone: &str) -> Result<TxResult> {
        let tx = Transaction {
            touch_rpz_zones: vec![rpz_zone.to_string()],
            description: format!("render rpz zone '{rpz_zone}' after feed ingest"),
            ..Default::default()
        };
        self.submit_transaction(tx).await
    }

    async fn run_transaction(&self, transaction_id: &str, tx: Transaction) -> Result<TxResult> {
        // validating
        let mut errors = tx.detect_conflicts();

        let mut zone_snapshot: HashMap<String, Zone> = self.store.list_zones().await?.into_iter().map(|z| (z.name.clone(), z)).collect();
        for change in &tx.zones {
            match change {
                ZoneChange::Upsert(zone) => {
                    errors.extend(crate::validate::validate_zone(zone));
                    zone_snapshot.insert(zone.name.clone(), zone.clone());
                }
                ZoneChange::Delete(name) => {
                    zone_snapshot.remove(name);
                }
            }
        }

        for change in &tx.records {
            if let RecordChange::Upsert(record) = change {
                let is_apex = record.name == "@" || record.name == record.zone_name;
                errors.extend(crate::validate::validate_record(record, is_apex));
                if !zone_snapshot.contains_key(&record.zone_name) {
                    errors.push(FieldError::new(
                        "zone_name",
                        format!("record references unknown zone '{}'", record.zone_name),
                        "create the zone before its records",
                    ));
                }
            }
        }

        for change in &tx.forwarders {
            if let ForwarderChange::Upsert(forwarder) = change {
                errors.extend(crate::validate::validate_forwarder(forwarder));
            }
        }

        for change in &tx.rpz_rules {
            if let RpzRuleChange::Upsert(rule) = change {
                errors.extend(crate::validate::validate_rpz_rule(rule));
            }
        }

        let affected_zones: Vec<String> = tx.affected_zone_names().into_iter().collect();
        let affected_rpz_zones: Vec<String> = tx.affected_rpz_zone_names().into_iter().collect();

        if tx.dry_run {
            return Ok(TxResult {
                transaction_id: transaction_id.to_string(),
                outcome: TransactionOutcome::Validated,
                validation_errors: errors,
                affected_zones,
                affected_rpz_zones,
                backup_id: None,
            });
        }

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        if tx.is_empty() {
            return Ok(TxResult {
                transaction_id: transaction_id.to_string(),
                outcome: TransactionOutcome::Committed,
                validation_errors: Vec::new(),
                affected_zones,
                affected_rpz_zones,
                backup_id: None,
            });
        }

        // backup
        let mut touched_paths: Vec<PathBuf> = Vec::new();
        for zone_name in &affected_zones {
            if zone_snapshot.get(zone_name).map(|z| z.zone_type == ZoneType::Master).unwrap_or(false) {
                touched_paths.push(self.zone_file_path(zone_name));
            }
        }
        for rpz_zone in &affected_rpz_zones {
            touched_paths.push(self.rpz_file_path(rpz_zone));
        }
        if !affected_zones.is_empty() || !affected_rpz_zones.is_empty() || !tx.forwarders.is_empty() {
            touched_paths.push(self.named_conf_local_path());
            touched_paths.push(self.named_conf_options_path());
        }

        let mut existing_paths = Vec::new();
        for path in &touched_paths {
            if tokio::fs::try_exists(path).await? {
                existing_paths.push(path.clone());
            }
        }

        let backup = if existing_paths.is_empty() && !tx.force_backup {
            None
        } else {
            Some(
                self.backup
                    .create(crate::store::model::BackupType::FullConfig, existing_paths, tx.description.clone())
                    .await?,
            )
        };
        let backup_id = backup.as_ref().map(|b| b.backup_id.clone());

        // writing
        match self.apply_and_write(transaction_id, &tx, &affected_zones, &affected_rpz_zones).await {
            Ok(()) => {}
            Err(e) => return self.rollback(transaction_id, ProjectionPhase::Writing, backup, e).await,
        }

        // reloading
        if let Err(e) = self.resolver.check_config(&self.bind_etc).await {
            return self.rollback(transaction_id, ProjectionPhase::Reloading, backup, e).await;
        }
        if let Err(e) = self.resolver.reload().await {
            return self.rollback(transaction_id, ProjectionPhase::Reloading, backup, e).await;
        }

        // verifying
        for path in &touched_paths {
            if !tokio::fs::try_exists(path).await? {
                continue;
            }
            if let Err(e) = tokio::fs::read_to_string(path).await {
                return self.rollback(transaction_id, ProjectionPhase::Verifying, backup, Error::FilesystemFailed(e)).await;
            }
        }

        Ok(TxResult {
            transaction_id: transaction_id.to_string(),
            outcome: TransactionOutcome::Committed,
            validation_errors: Vec::new(),
            affected_zones,
            affected_rpz_zones,
            backup_id,
        })
    }

    /// Apply every change to the store, then render and atomically write
    /// every touched file. Write order: zone files and RPZ files first,
    /// then the `named.conf.*` files that reference them.
    async fn apply_and_write(&self, _transaction_id: &str, tx: &Transaction, affected_zones: &[String], affected_rpz_zones: &[String]) -> Result<()> {
        for change in &tx.zones {
            self.apply_zone_change(change).await?;
        }
        for change in &tx.records {
            self.apply_record_change(change).await?;
        }
        for change in &tx.forwarders {
            self.apply_forwarder_change(change).await?;
        }
        for change in &tx.rpz_rules {
            self.apply_rpz_rule_change(change).await?;
        }

        for zone_name in affected_zones {
            let Some(mut zone) = self.store.get_zone(zone_name).await? else {
                continue; // deleted this transaction
            };
            if zone.zone_type != ZoneType::Master {
                continue;
            }
            let records = self.store.list_records(zone_name).await?;
            zone.serial = crate::render::next_serial(zone.serial, chrono::Utc::now());
            let rendered = crate::render::render_zone_file(&zone, &records);
            self.write_file(&self.zone_file_path(zone_name), &rendered).await?;
            self.store.update_zone(zone).await?;
        }

        if !affected_rpz_zones.is_empty() {
            let mut known = self.known_rpz_zones.lock().await;
            for rpz_zone in affected_rpz_zones {
                known.insert(rpz_zone.clone());
            }
        }
        for rpz_zone in affected_rpz_zones {
            let rules = self.store.list_rpz_rules(rpz_zone).await?;
            let serial = {
                let mut serials = self.rpz_serials.lock().await;
                let next = crate::render::next_serial(serials.get(rpz_zone).copied().unwrap_or(0), chrono::Utc::now());
                serials.insert(rpz_zone.clone(), next);
                next
            };
            let rendered = crate::render::render_rpz_file(rpz_zone, serial, &rules);
            self.write_file(&self.rpz_file_path(rpz_zone), &rendered).await?;
        }

        if !affected_zones.is_empty() || !affected_rpz_zones.is_empty() || !tx.forwarders.is_empty() {
            let zones = self.store.list_zones().await?;
            let forwarders = self.store.list_forwarders().await?;
            let rpz_zones: Vec<String> = self.known_rpz_zones.lock().await.iter().cloned().collect();

            let local = crate::render::render_named_conf_local(&zones, &rpz_zones);
            self.write_file(&self.named_conf_local_path(), &local).await?;

            let options = crate::render::render_named_conf_options(&forwarders, &rpz_zones);
            self.write_file(&self.named_conf_options_path(), &options).await?;
        }

        Ok(())
    }

    async fn apply_zone_change(&self, change: &ZoneChange) -> Result<()> {
        match change {
            ZoneChange::Upsert(zone) => {
                if self.store.get_zone(&zone.name).await?.is_some() {
                    self.store.update_zone(zone.clone()).await?;
                } else {
                    self.store.create_zone(zone.clone()).await?;
                }
            }
            ZoneChange::Delete(name) => {
                self.store.delete_zone(name).await?;
            }
        }
        Ok(())
    }

    async fn apply_record_change(&self, change: &RecordChange) -> Result<()> {
        match change {
            RecordChange::Upsert(record) => {
                let existing = self.store.list_records(&record.zone_name).await?;
                let key = record.identity();
                if existing.iter().any(|r| r.identity() == key) {
                    self.store.update_record(record.clone()).await?;
                } else {
                    self.store.create_record(record.clone()).await?;
                }
            }
            RecordChange::Delete { zone_name, name, record_type, value } => {
                self.store.delete_record(zone_name, name, *record_type, value).await?;
            }
        }
        Ok(())
    }

    async fn apply_forwarder_change(&self, change: &ForwarderChange) -> Result<()> {
        match change {
            ForwarderChange::Upsert(forwarder) => {
                if self.store.get_forwarder(&forwarder.name).await?.is_some() {
                    self.store.update_forwarder(forwarder.clone()).await?;
                } else {
                    self.store.create_forwarder(forwarder.clone()).await?;
                }
            }
            ForwarderChange::Delete(name) => {
                self.store.delete_forwarder(name).await?;
            }
        }
        Ok(())
    }

    async fn apply_rpz_rule_change(&self, change: &RpzRuleChange) -> Result<()> {
        match change {
            RpzRuleChange::Upsert(rule) => {
                let existing = self.store.list_rpz_rules(&rule.rpz_zone).await?;
                if existing.iter().any(|r| r.domain == rule.domain) {
                    self.store.update_rpz_rule(rule.clone()).await?;
                } else {
                    self.store.create_rpz_rule(rule.clone()).await?;
                }
            }
            RpzRuleChange::Delete { rpz_zone, domain } => {
                self.store.delete_rpz_rule(rpz_zone, domain).await?;
            }
        }
        Ok(())
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn rollback(
        &self,
        transaction_id: &str,
        phase: ProjectionPhase,
        backup: Option<crate::store::model::Backup>,
        cause: Error,
    ) -> Result<TxResult> {
        tracing::warn!(%transaction_id, %phase, error = %cause, "projection transaction failed, rolling back");

        let Some(backup) = backup else {
            // Nothing was on disk before this transaction; the failed write
            // is itself fully reversible by simply not counting it as applied.
            return Err(Error::RollbackSucceeded {
                transaction_id: transaction_id.to_string(),
                phase,
            });
        };

        match self.backup.restore(&backup.backup_id).await {
            Ok(_pre_restore) => Err(Error::RollbackSucceeded {
                transaction_id: transaction_id.to_string(),
                phase,
            }),
            Err(restore_err) => {
                tracing::error!(%transaction_id, backup_id = %backup.backup_id, error = %restore_err, "rollback failed, manual recovery required");
                Err(Error::Fatal {
                    transaction_id: transaction_id.to_string(),
                    backup_id: backup.backup_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use tempfile::tempdir;

    struct AlwaysOkResolver;

    impl ResolverControl for AlwaysOkResolver {
        async fn check_config(&self, _bind_etc: &Path) -> Result<()> {
            Ok(())
        }
        async fn reload(&self) -> Result<()> {
            Ok(())
        }
    }

    struct RejectingResolver;

    impl ResolverControl for RejectingResolver {
        async fn check_config(&self, _bind_etc: &Path) -> Result<()> {
            Err(Error::ResolverRejectedConfig("syntax error".to_string()))
        }
        async fn reload(&self) -> Result<()> {
            Ok(())
        }
    }

    fn zone() -> Zone {
        Zone {
            name: "example.com".to_string(),
            zone_type: ZoneType::Master,
            serial: 2026072800,
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
    async fn test_project_zone_commits_on_success() {
        let store = MemoryStore::new();
        store.create_zone(zone()).await.unwrap();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, dir.path().join("etc"), Duration::from_secs(5));

        let outcome = engine.project_zone("example.com").await.unwrap();
        assert_eq!(outcome, TransactionOutcome::Committed);

        let updated = engine.store().get_zone("example.com").await.unwrap().unwrap();
        assert!(updated.serial > 2026072800);
    }

    #[tokio::test]
    async fn test_project_zone_rolls_back_on_resolver_rejection() {
        let store = MemoryStore::new();
        store.create_zone(zone()).await.unwrap();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let engine = ProjectionEngine::new(store, backup, RejectingResolver, dir.path().join("etc"), Duration::from_secs(5));

        let err = engine.project_zone("example.com").await.unwrap_err();
        assert!(matches!(err, Error::RollbackSucceeded { .. }));
    }

    #[tokio::test]
    async fn test_project_zone_missing_zone_not_found() {
        let store = MemoryStore::new();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, dir.path().join("etc"), Duration::from_secs(5));

        let err = engine.project_zone("missing.com").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_validates_without_writing_anything() {
        let store = MemoryStore::new();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let bind_etc = dir.path().join("etc");
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, bind_etc.clone(), Duration::from_secs(5));

        let tx = Transaction {
            zones: vec![ZoneChange::Upsert(zone())],
            dry_run: true,
            description: "preview".to_string(),
            ..Default::default()
        };
        let result = engine.submit_transaction(tx).await.unwrap();
        assert_eq!(result.outcome, TransactionOutcome::Validated);
        assert!(result.validation_errors.is_empty());
        assert!(engine.store().get_zone("example.com").await.unwrap().is_none());
        assert!(!tokio::fs::try_exists(bind_etc.join("zones").join("example.com.zone")).await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_reports_validation_errors_without_erroring() {
        let store = MemoryStore::new();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, dir.path().join("etc"), Duration::from_secs(5));

        let mut bad_zone = zone();
        bad_zone.refresh = 0;
        let tx = Transaction {
            zones: vec![ZoneChange::Upsert(bad_zone)],
            dry_run: true,
            ..Default::default()
        };
        let result = engine.submit_transaction(tx).await.unwrap();
        assert_eq!(result.outcome, TransactionOutcome::Validated);
        assert!(!result.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_record_changes_rejected_as_conflict() {
        let store = MemoryStore::new();
        store.create_zone(zone()).await.unwrap();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, dir.path().join("etc"), Duration::from_secs(5));

        let record = Record {
            zone_name: "example.com".to_string(),
            name: "www".to_string(),
            record_type: RecordType::A,
            value: "10.0.0.1".to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 300,
            active: true,
        };
        let tx = Transaction {
            records: vec![RecordChange::Upsert(record.clone()), RecordChange::Upsert(record)],
            ..Default::default()
        };
        let err = engine.submit_transaction(tx).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_deleting_zone_with_pending_record_change_is_conflict() {
        let store = MemoryStore::new();
        store.create_zone(zone()).await.unwrap();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, dir.path().join("etc"), Duration::from_secs(5));

        let record = Record {
            zone_name: "example.com".to_string(),
            name: "www".to_string(),
            record_type: RecordType::A,
            value: "10.0.0.1".to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 300,
            active: true,
        };
        let tx = Transaction {
            zones: vec![ZoneChange::Delete("example.com".to_string())],
            records: vec![RecordChange::Upsert(record)],
            ..Default::default()
        };
        let err = engine.submit_transaction(tx).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_multi_change_transaction_writes_zone_and_rpz_files() {
        let store = MemoryStore::new();
        store.create_zone(zone()).await.unwrap();
        let dir = tempdir().unwrap();
        let backup = crate::backup::BackupStore::new(dir.path().join("backups"));
        let bind_etc = dir.path().join("etc");
        let engine = ProjectionEngine::new(store, backup, AlwaysOkResolver, bind_etc.clone(), Duration::from_secs(5));

        let record = Record {
            zone_name: "example.com".to_string(),
            name: "www".to_string(),
            record_type: RecordType::A,
            value: "10.0.0.1".to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 300,
            active: true,
        };
        let rule = RpzRule {
            rpz_zone: "malware".to_string(),
            domain: "bad.example".to_string(),
            action: crate::store::model::RpzAction::Block,
            redirect_target: None,
            source: crate::store::model::RpzSource::Manual,
            description: String::new(),
            active: true,
        };
        let tx = Transaction {
            records: vec![RecordChange::Upsert(record)],
            rpz_rules: vec![RpzRuleChange::Upsert(rule)],
            description: "add www and a block rule".to_string(),
            ..Default::default()
        };
        let result = engine.submit_transaction(tx).await.unwrap();
        assert_eq!(result.outcome, TransactionOutcome::Committed);
        assert_eq!(result.affected_zones, vec!["example.com".to_string()]);
        assert_eq!(result.affected_rpz_zones, vec!["malware".to_string()]);

        assert!(tokio::fs::try_exists(bind_etc.join("zones").join("example.com.zone")).await.unwrap());
        assert!(tokio::fs::try_exists(bind_etc.join("rpz").join("db.rpz.malware")).await.unwrap());
        assert!(tokio::fs::try_exists(bind_etc.join("named.conf.local")).await.unwrap());
        assert!(tokio::fs::try_exists(bind_etc.join("named.conf.options")).await.unwrap());

        let local = tokio::fs::read_to_string(bind_etc.join("named.conf.local")).await.unwrap();
        assert!(local.contains("malware"));
    }
}
