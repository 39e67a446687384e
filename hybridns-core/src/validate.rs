//! DNS Validators (C2)
//!
//! Pure functions: no I/O, no store access. The projection engine (C5) runs
//! these before opening a transaction so a malformed request never reaches
//! the backup/write/reload pipeline.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::FieldError;
use crate::store::model::{Forwarder, Record, RecordType, RpzAction, RpzRule, Zone, ZoneType};

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;
const MIN_TTL: u32 = 1;
const MAX_TTL: u32 = 2_147_483_647;

/// Letters, digits, underscores (for `_service._proto` SRV labels), and
/// interior hyphens — never a leading or trailing hyphen.
fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]([A-Za-z0-9_-]*[A-Za-z0-9_])?$").unwrap())
}

/// Validate a DNS name's label/total-length constraints (RFC 1035 §3.1) and
/// character set, with a `*` wildcard allowed only as the leftmost label.
pub fn validate_dns_name(name: &str) -> Result<(), FieldError> {
    if name.is_empty() {
        return Err(FieldError::new("name", "name is empty", "provide a non-empty DNS name"));
    }
    // `@` is the zone-file shorthand for the zone apex, not a label.
    if name == "@" {
        return Ok(());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FieldError::new(
            "name",
            format!("name is {} bytes, exceeds {MAX_NAME_LEN}", name.len()),
            "shorten the name",
        ));
    }
    for (i, label) in name.trim_end_matches('.').split('.').enumerate() {
        if label.is_empty() {
            return Err(FieldError::new("name", "empty label (consecutive dots)", "remove the extra dot"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(FieldError::new(
                "name",
                format!("label '{label}' is {} bytes, exceeds {MAX_LABEL_LEN}", label.len()),
                "shorten the label",
            ));
        }
        if label == "*" {
            if i != 0 {
                return Err(FieldError::new(
                    "name",
                    "wildcard '*' is only allowed as the leftmost label",
                    "move the wildcard to the start of the name",
                ));
            }
            continue;
        }
        if !label_pattern().is_match(label) {
            return Err(FieldError::new(
                "name",
                format!("label '{label}' contains characters other than letters, digits, '_', and interior '-'"),
                "use letters, digits, underscores, and interior hyphens only",
            ));
        }
    }
    Ok(())
}

/// Validate and normalize a TTL, returning the field error used throughout
/// the record validators.
pub fn validate_ttl(ttl: u32) -> Result<(), FieldError> {
    if ttl < MIN_TTL || ttl > MAX_TTL {
        return Err(FieldError::new(
            "ttl",
            format!("ttl {ttl} is out of range [{MIN_TTL}, {MAX_TTL}]"),
            "use a ttl between 1 and 2147483647",
        ));
    }
    Ok(())
}

/// Normalize and validate an IPv4 address, returning its canonical string form.
pub fn normalize_ipv4(value: &str) -> Result<String, FieldError> {
    value
        .parse::<Ipv4Addr>()
        .map(|ip| ip.to_string())
        .map_err(|_| FieldError::new("value", format!("'{value}' is not a valid IPv4 address"), "use dotted-quad notation, e.g. 10.0.0.1"))
}

/// Normalize and validate an IPv6 address, returning its canonical string form.
pub fn normalize_ipv6(value: &str) -> Result<String, FieldError> {
    value
        .parse::<Ipv6Addr>()
        .map(|ip| ip.to_string())
        .map_err(|_| FieldError::new("value", format!("'{value}' is not a valid IPv6 address"), "use RFC 5952 notation, e.g. 2001:db8::1"))
}

/// Convert a plain email address (`admin@example.com`) to DNS-dotted SOA
/// form (`admin.example.com`), validating along the way. Already-dotted
/// input (no `@`) is validated and returned unchanged.
pub fn to_dns_dotted_email(value: &str) -> Result<String, FieldError> {
    if let Some((local, domain)) = value.split_once('@') {
        if local.is_empty() || domain.is_empty() {
            return Err(FieldError::new("admin_email", "empty local or domain part", "use the form admin@example.com"));
        }
        let dotted = format!("{}.{}", local.replace('.', "\\."), domain);
        validate_dns_name(domain)?;
        Ok(dotted)
    } else {
        validate_dns_name(value)?;
        Ok(value.to_string())
    }
}

/// Cross-field validation for a [`Zone`] beyond what its type already
/// enforces: slave zones need master servers, forward zones need upstream
/// IPs, SOA arithmetic must be sane.
pub fn validate_zone(zone: &Zone) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_dns_name(&zone.name) {
        errors.push(e);
    }

    match zone.zone_type {
        ZoneType::Slave if zone.master_servers.is_empty() => {
            errors.push(FieldError::new(
                "master_servers",
                "slave zones require at least one master server",
                "add a master_servers entry",
            ));
        }
        ZoneType::Forward if zone.forwarder_ips.is_empty() => {
            errors.push(FieldError::new(
                "forwarder_ips",
                "forward zones require at least one forwarder IP",
                "add a forwarder_ips entry",
            ));
        }
        _ => {}
    }

    for ip in zone.master_servers.iter().chain(zone.forwarder_ips.iter()) {
        if normalize_ipv4(ip).is_err() && normalize_ipv6(ip).is_err() {
            errors.push(FieldError::new("master_servers", format!("'{ip}' is not a valid IP address"), "use a valid IPv4 or IPv6 address"));
        }
    }

    if zone.refresh == 0 || zone.retry == 0 || zone.expire == 0 || zone.minimum == 0 {
        errors.push(FieldError::new(
            "refresh/retry/expire/minimum",
            "SOA timers must be non-zero",
            "use positive values per RFC 1035",
        ));
    }
    if zone.retry >= zone.refresh {
        errors.push(FieldError::new("retry", "retry must be less than refresh", "lower retry below refresh"));
    }

    errors
}

/// Cross-field and per-type validation for a [`Record`].
///
/// `is_apex` must be true when `record.name` denotes the zone's apex (`@`
/// or equal to the zone name) — a CNAME there would shadow the zone's own
/// NS/SOA records, which is forbidden by RFC 1034 §3.6.2.
pub fn validate_record(record: &Record, is_apex: bool) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_dns_name(&record.name) {
        errors.push(e);
    }
    if let Err(e) = validate_ttl(record.ttl) {
        errors.push(e);
    }

    if is_apex && record.record_type == RecordType::Cname {
        errors.push(FieldError::new(
            "record_type",
            "CNAME not allowed at zone apex",
            "use A/AAAA/ALIAS at the apex instead",
        ));
    }

    match record.record_type {
        RecordType::A => {
            if let Err(e) = normalize_ipv4(&record.value) {
                errors.push(e);
            }
        }
        RecordType::Aaaa => {
            if let Err(e) = normalize_ipv6(&record.value) {
                errors.push(e);
            }
        }
        RecordType::Cname | RecordType::Ns | RecordType::Ptr => {
            if let Err(e) = validate_dns_name(&record.value) {
                errors.push(e);
            }
        }
        RecordType::Mx => {
            if record.priority.is_none() {
                errors.push(FieldError::new("priority", "MX records require a priority", "set priority (0-65535)"));
            }
            if let Err(e) = validate_dns_name(&record.value) {
                errors.push(e);
            }
        }
        RecordType::Srv => {
            if record.priority.is_none() || record.weight.is_none() || record.port.is_none() {
                errors.push(FieldError::new(
                    "priority/weight/port",
                    "SRV records require priority, weight, and port",
                    "set all three fields",
                ));
            }
            if !record.name.starts_with('_') {
                errors.push(FieldError::new("name", "SRV record name must start with '_service._proto'", "use the form _sip._tcp.example.com"));
            }
        }
        RecordType::Txt => {
            if record.value.len() > 255 {
                errors.push(FieldError::new("value", "TXT value exceeds 255 bytes per string", "split into multiple strings"));
            }
        }
        RecordType::Soa | RecordType::Caa | RecordType::Sshfp | RecordType::Tlsa | RecordType::Naptr | RecordType::Loc => {
            if record.value.is_empty() {
                errors.push(FieldError::new("value", "value must not be empty", "provide the record payload"));
            }
        }
    }

    errors
}

/// Cross-field validation for an [`RpzRule`]: the domain must be a valid DNS
/// name, and a redirect action must carry a resolvable target.
pub fn validate_rpz_rule(rule: &RpzRule) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_dns_name(&rule.domain) {
        errors.push(e);
    }

    if rule.action == RpzAction::Redirect {
        match rule.redirect_target.as_deref() {
            None | Some("") => errors.push(FieldError::new(
                "redirect_target",
                "redirect rules require a redirect_target",
                "set redirect_target to the destination domain",
            )),
            Some(target) => {
                if let Err(e) = validate_dns_name(target) {
                    errors.push(e);
                }
            }
        }
    }

    errors
}

/// Cross-field validation for a [`Forwarder`]: at least one server with a
/// parseable address, and every declared domain must be a valid DNS name.
pub fn validate_forwarder(forwarder: &Forwarder) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if forwarder.servers.is_empty() {
        errors.push(FieldError::new("servers", "forwarder requires at least one server", "add a server entry"));
    }
    for server in &forwarder.servers {
        if normalize_ipv4(&server.ip).is_err() && normalize_ipv6(&server.ip).is_err() {
            errors.push(FieldError::new("servers", format!("'{}' is not a valid IP address", server.ip), "use a valid IPv4 or IPv6 address"));
        }
    }
    for domain in &forwarder.domains {
        if let Err(e) = validate_dns_name(domain) {
            errors.push(e);
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dns_name_rejects_long_label() {
        let label = "a".repeat(64);
        let name = format!("{label}.example.com");
        assert!(validate_dns_name(&name).is_err());
    }

    #[test]
    fn test_validate_dns_name_rejects_double_dot() {
        assert!(validate_dns_name("foo..example.com").is_err());
    }

    #[test]
    fn test_validate_dns_name_accepts_leading_wildcard() {
        assert!(validate_dns_name("*.example.com").is_ok());
    }

    #[test]
    fn test_validate_dns_name_rejects_wildcard_past_leftmost_label() {
        assert!(validate_dns_name("www.*.example.com").is_err());
    }

    #[test]
    fn test_validate_dns_name_accepts_apex_marker() {
        assert!(validate_dns_name("@").is_ok());
    }

    #[test]
    fn test_validate_dns_name_accepts_underscore_service_label() {
        assert!(validate_dns_name("_sip._tcp.example.com").is_ok());
    }

    #[test]
    fn test_validate_dns_name_rejects_invalid_characters() {
        assert!(validate_dns_name("no spaces.example.com").is_err());
        assert!(validate_dns_name("-leading-hyphen.example.com").is_err());
    }

    #[test]
    fn test_normalize_ipv4_rejects_garbage() {
        assert!(normalize_ipv4("not-an-ip").is_err());
        assert!(normalize_ipv4("10.0.0.1").is_ok());
    }

    #[test]
    fn test_to_dns_dotted_email() {
        assert_eq!(to_dns_dotted_email("admin@example.com").unwrap(), "admin.example.com");
        assert_eq!(to_dns_dotted_email("admin.example.com").unwrap(), "admin.example.com");
    }

    #[test]
    fn test_validate_zone_slave_requires_master_servers() {
        let zone = Zone {
            name: "example.com".to_string(),
            zone_type: ZoneType::Slave,
            serial: 1,
            refresh: 3600,
            retry: 600,
            expire: 604800,
            minimum: 86400,
            admin_email: "admin.example.com".to_string(),
            active: true,
            master_servers: vec![],
            forwarder_ips: vec![],
        };
        let errors = validate_zone(&zone);
        assert!(errors.iter().any(|e| e.field == "master_servers"));
    }

    #[test]
    fn test_validate_record_cname_at_apex_rejected() {
        let record = Record {
            zone_name: "example.com".to_string(),
            name: "@".to_string(),
            record_type: RecordType::Cname,
            value: "target.example.com".to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 3600,
            active: true,
        };
        let errors = validate_record(&record, true);
        assert!(errors.iter().any(|e| e.field == "record_type"));
    }

    #[test]
    fn test_validate_record_srv_requires_weight_priority_port() {
        let record = Record {
            zone_name: "example.com".to_string(),
            name: "_sip._tcp".to_string(),
            record_type: RecordType::Srv,
            value: "sipserver.example.com".to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 3600,
            active: true,
        };
        let errors = validate_record(&record, false);
        assert!(errors.iter().any(|e| e.field == "priority/weight/port"));
    }

    #[test]
    fn test_validate_record_a_valid() {
        let record = Record {
            zone_name: "example.com".to_string(),
            name: "www".to_string(),
            record_type: RecordType::A,
            value: "10.0.0.5".to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 300,
            active: true,
        };
        assert!(validate_record(&record, false).is_empty());
    }

    #[test]
    fn test_validate_rpz_rule_redirect_requires_target() {
        let rule = RpzRule {
            rpz_zone: "rpz.local".to_string(),
            domain: "malware.example".to_string(),
            action: RpzAction::Redirect,
            redirect_target: None,
            source: crate::store::model::RpzSource::Manual,
            description: String::new(),
            active: true,
        };
        let errors = validate_rpz_rule(&rule);
        assert!(errors.iter().any(|e| e.field == "redirect_target"));
    }

    #[test]
    fn test_validate_rpz_rule_block_is_valid() {
        let rule = RpzRule {
            rpz_zone: "rpz.local".to_string(),
            domain: "malware.example".to_string(),
            action: RpzAction::Block,
            redirect_target: None,
            source: crate::store::model::RpzSource::Manual,
            description: String::new(),
            active: true,
        };
        assert!(validate_rpz_rule(&rule).is_empty());
    }

    #[test]
    fn test_validate_forwarder_requires_at_least_one_server() {
        let forwarder = Forwarder {
            name: "internal".to_string(),
            domains: vec!["corp.example".to_string()],
            forwarder_type: crate::store::model::ForwarderType::Intranet,
            servers: vec![],
            health_check_enabled: false,
            active: true,
        };
        let errors = validate_forwarder(&forwarder);
        assert!(errors.iter().any(|e| e.field == "servers"));
    }
}
