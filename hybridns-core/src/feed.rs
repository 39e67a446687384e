//! RPZ / Threat-Feed Pipeline (C7)
//!
//! Fetches each active feed's URL, parses it per its declared format,
//! normalises rows to RPZ block rules tagged `source = threat_feed:<name>`,
//! diffs against the current rule set for that source, and submits the
//! delta through the Model Store Gateway's bulk upsert path. Manual bulk
//! import supports the same three formats for operator-submitted lists.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::store::model::{FeedFormat, FeedStatus, RpzAction, RpzRule, RpzSource, ThreatFeed};
use crate::store::{BulkUpsertResult, Store};

/// One row parsed out of a feed or a manual import payload, not yet
/// resolved against the existing rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub domain: String,
}

/// A row in a manual or feed import that failed to parse — reported, never
/// fatal to the batch.
#[derive(Debug, Clone)]
pub struct ImportError {
    pub line_number: usize,
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub entries: Vec<ParsedEntry>,
    pub errors: Vec<ImportError>,
}

/// Parse a `domains`-format payload: one domain per line, `#` comments,
/// blank lines ignored.
pub fn parse_domains(body: &str) -> ImportResult {
    let mut result = ImportResult::default();
    for (i, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match normalize_domain(trimmed) {
            Ok(domain) => result.entries.push(ParsedEntry { domain }),
            Err(reason) => result.errors.push(ImportError {
                line_number: i + 1,
                raw: line.to_string(),
                reason,
            }),
        }
    }
    result
}

/// Parse a `hosts`-format payload: `0.0.0.0 domain.example` or
/// `127.0.0.1 domain.example`, `#` comments.
pub fn parse_hosts(body: &str) -> ImportResult {
    let mut result = ImportResult::default();
    for (i, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let (Some(_ip), Some(domain)) = (fields.next(), fields.next()) else {
            result.errors.push(ImportError {
                line_number: i + 1,
                raw: line.to_string(),
                reason: "expected '<ip> <domain>'".to_string(),
            });
            continue;
        };
        match normalize_domain(domain) {
            Ok(domain) => result.entries.push(ParsedEntry { domain }),
            Err(reason) => result.errors.push(ImportError {
                line_number: i + 1,
                raw: line.to_string(),
                reason,
            }),
        }
    }
    result
}

/// Parse a `csv`-format payload: the first column is the domain, any
/// remaining columns are ignored. A header row is tolerated (and skipped)
/// if its first field doesn't parse as a DNS name.
pub fn parse_csv(body: &str) -> ImportResult {
    let mut result = ImportResult::default();
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(body.as_bytes());

    for (i, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                result.errors.push(ImportError {
                    line_number: i + 1,
                    raw: String::new(),
                    reason: format!("csv parse error: {e}"),
                });
                continue;
            }
        };
        let Some(first) = record.get(0) else {
            result.errors.push(ImportError {
                line_number: i + 1,
                raw: record.iter().collect::<Vec<_>>().join(","),
                reason: "empty row".to_string(),
            });
            continue;
        };
        match normalize_domain(first) {
            Ok(domain) => result.entries.push(ParsedEntry { domain }),
            Err(reason) => result.errors.push(ImportError {
                line_number: i + 1,
                raw: first.to_string(),
                reason,
            }),
        }
    }
    result
}

/// Parse a `json`-format payload: either an array of domain strings, or an
/// array of `{"domain": "..."}` objects.
pub fn parse_json(body: &str) -> ImportResult {
    let mut result = ImportResult::default();
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            result.errors.push(ImportError {
                line_number: 0,
                raw: String::new(),
                reason: format!("invalid json: {e}"),
            });
            return result;
        }
    };

    let Some(items) = value.as_array() else {
        result.errors.push(ImportError {
            line_number: 0,
            raw: String::new(),
            reason: "expected a json array".to_string(),
        });
        return result;
    };

    for (i, item) in items.iter().enumerate() {
        let raw_domain = item.as_str().or_else(|| item.get("domain").and_then(|d| d.as_str()));
        match raw_domain {
            Some(domain) => match normalize_domain(domain) {
                Ok(domain) => result.entries.push(ParsedEntry { domain }),
                Err(reason) => result.errors.push(ImportError {
                    line_number: i + 1,
                    raw: item.to_string(),
                    reason,
                }),
            },
            None => result.errors.push(ImportError {
                line_number: i + 1,
                raw: item.to_string(),
                reason: "expected a string or an object with a 'domain' field".to_string(),
            }),
        }
    }
    result
}

pub fn parse(body: &str, format: FeedFormat) -> ImportResult {
    match format {
        FeedFormat::Domains => parse_domains(body),
        FeedFormat::Hosts => parse_hosts(body),
        FeedFormat::Csv => parse_csv(body),
        FeedFormat::Json => parse_json(body),
    }
}

fn normalize_domain(raw: &str) -> std::result::Result<String, String> {
    let lowered = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    crate::validate::validate_dns_name(&lowered).map_err(|e| e.reason)?;
    Ok(lowered)
}

/// Drives scheduled feed refresh and manual bulk import, submitting diffs
/// through the store and reporting back which RPZ zones need re-rendering.
pub struct FeedPipeline<S> {
    store: S,
    http: reqwest::Client,
    fetch_timeout: Duration,
}

impl<S: Store> FeedPipeline<S> {
    pub fn new(store: S, fetch_timeout: Duration) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            fetch_timeout,
        }
    }

    /// Fetch and ingest a single feed, diffing against its previously
    /// submitted rules and returning the RPZ zone(s) that changed.
    pub async fn refresh_feed(&self, feed: &ThreatFeed, rpz_zone: &str) -> Result<FeedRefreshOutcome> {
        let body = self
            .http
            .get(&feed.url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("fetching feed '{}': {e}", feed.name)))?
            .text()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("reading feed '{}' body: {e}", feed.name)))?;

        let parsed = parse(&body, feed.format);
        let source = RpzSource::ThreatFeed(feed.name.clone());

        let existing = self.store.list_rpz_rules(rpz_zone).await?;
        let existing_from_feed: HashSet<String> = existing
            .iter()
            .filter(|r| matches!(&r.source, RpzSource::ThreatFeed(name) if name == &feed.name))
            .map(|r| r.domain.clone())
            .collect();

        let fresh_domains: HashSet<String> = parsed.entries.iter().map(|e| e.domain.clone()).collect();

        let to_upsert: Vec<RpzRule> = parsed
            .entries
            .iter()
            .map(|entry| RpzRule {
                rpz_zone: rpz_zone.to_string(),
                domain: entry.domain.clone(),
                action: RpzAction::Block,
                redirect_target: None,
                source: source.clone(),
                description: format!("ingested from threat feed '{}'", feed.name),
                active: true,
            })
            .collect();

        let upsert_result = if to_upsert.is_empty() {
            BulkUpsertResult::default()
        } else {
            self.store.bulk_upsert_rpz_rules(to_upsert).await?
        };

        let mut removed = 0u32;
        for stale_domain in existing_from_feed.difference(&fresh_domains) {
            self.store.delete_rpz_rule(rpz_zone, stale_domain).await?;
            removed += 1;
        }

        let upserted = upsert_result.total_changed();
        Ok(FeedRefreshOutcome {
            parse_errors: parsed.errors,
            rows_upserted: upserted,
            rows_removed: removed,
            rows_skipped: upsert_result.skipped,
            skip_errors: upsert_result.errors,
            rpz_zone_changed: upserted > 0 || removed > 0,
        })
    }

    /// Manual bulk import: parse the payload and submit it directly, tagged
    /// `RpzSource::BulkImport` rather than a named feed.
    pub async fn bulk_import(&self, rpz_zone: &str, body: &str, format: FeedFormat, action: RpzAction) -> Result<ImportResult> {
        let mut parsed = parse(body, format);
        if !parsed.entries.is_empty() {
            let rules: Vec<RpzRule> = parsed
                .entries
                .iter()
                .map(|entry| RpzRule {
                    rpz_zone: rpz_zone.to_string(),
                    domain: entry.domain.clone(),
                    action,
                    redirect_target: None,
                    source: RpzSource::BulkImport,
                    description: "manual bulk import".to_string(),
                    active: true,
                })
                .collect();
            let result = self.store.bulk_upsert_rpz_rules(rules).await?;
            for row_error in result.errors {
                parsed.errors.push(ImportError {
                    line_number: row_error.index + 1,
                    raw: row_error.identity,
                    reason: row_error.errors.into_iter().map(|e| e.reason).collect::<Vec<_>>().join("; "),
                });
            }
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone)]
pub struct FeedRefreshOutcome {
    pub parse_errors: Vec<ImportError>,
    pub rows_upserted: u32,
    pub rows_removed: u32,
    /// Rows that parsed cleanly but failed store-side validation (e.g. a
    /// redirect rule with no resolvable target) — counted separately from
    /// `parse_errors` since they come from the store, not the parser.
    pub rows_skipped: u32,
    pub skip_errors: Vec<crate::store::BulkRowError>,
    pub rpz_zone_changed: bool,
}

/// Derive the resulting [`FeedStatus`] for a completed refresh.
pub fn status_for_outcome(outcome: &Result<FeedRefreshOutcome>) -> FeedStatus {
    match outcome {
        Ok(o) if o.parse_errors.is_empty() => FeedStatus::Ok,
        Ok(_) => FeedStatus::Partial,
        Err(_) => FeedStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domains_skips_comments_and_blanks() {
        let result = parse_domains("# comment\n\nmalware.example\nbad..domain\n");
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].domain, "malware.example");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_parse_hosts_extracts_domain_column() {
        let result = parse_hosts("0.0.0.0 ads.example\n127.0.0.1 tracker.example\n");
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].domain, "ads.example");
    }

    #[test]
    fn test_parse_csv_first_column() {
        let result = parse_csv("malware.example,2026-01-01\nbotnet.example,2026-01-02\n");
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[1].domain, "botnet.example");
    }

    #[test]
    fn test_parse_json_array_of_strings() {
        let result = parse_json(r#"["malware.example", "botnet.example"]"#);
        assert_eq!(result.entries.len(), 2);
    }

    #[test]
    fn test_parse_json_array_of_objects() {
        let result = parse_json(r#"[{"domain": "malware.example"}]"#);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].domain, "malware.example");
    }

    #[test]
    fn test_parse_json_invalid_entry_reported_not_fatal() {
        let result = parse_json(r#"["good.example", 42]"#);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_status_for_outcome_partial_on_parse_errors() {
        let outcome: Result<FeedRefreshOutcome> = Ok(FeedRefreshOutcome {
            parse_errors: vec![ImportError {
                line_number: 1,
                raw: "x".to_string(),
                reason: "bad".to_string(),
            }],
            rows_upserted: 1,
            rows_removed: 0,
            rows_skipped: 0,
            skip_errors: vec![],
            rpz_zone_changed: true,
        });
        assert_eq!(status_for_outcome(&outcome), FeedStatus::Partial);
    }

    #[tokio::test]
    async fn test_bulk_import_with_bad_rows_reports_errors_and_skips_them() {
        let store = crate::store::MemoryStore::new();
        let pipeline = FeedPipeline::new(store, Duration::from_secs(5));

        let mut body = String::new();
        for i in 0..995 {
            body.push_str(&format!("malware-{i}.example\n"));
        }
        body.push_str("bad..domain\n");
        body.push_str("-leading-hyphen.example\n");
        body.push_str("no spaces allowed.example\n");
        body.push_str("..\n");
        body.push_str("trailing-dot-ok.example.\n");

        let result = pipeline.bulk_import("malware", &body, FeedFormat::Domains, RpzAction::Block).await.unwrap();

        assert_eq!(result.entries.len(), 996);
        assert_eq!(result.errors.len(), 4);

        let rules = pipeline.store.list_rpz_rules("malware").await.unwrap();
        assert_eq!(rules.len(), 996);
        assert!(rules.iter().all(|r| matches!(r.source, RpzSource::BulkImport)));
    }
}
