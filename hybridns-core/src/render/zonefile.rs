//! Deterministic BIND-style zone file rendering.

use std::fmt::Write as _;

use crate::store::model::{Record, RecordType, Zone};

/// Render a master zone's SOA header plus every record, in a stable order
/// (apex first, then alphabetically by name) so repeated renders of
/// unchanged data produce byte-identical output — required for the
/// projection engine's verify step to detect drift correctly.
pub fn render_zone_file(zone: &Zone, records: &[Record]) -> String {
    let mut out = String::new();

    writeln!(out, "$TTL {}", zone.minimum).unwrap();
    writeln!(
        out,
        "@ IN SOA ns1.{name}. {admin} ({serial} {refresh} {retry} {expire} {minimum})",
        name = zone.name,
        admin = zone.admin_email,
        serial = zone.serial,
        refresh = zone.refresh,
        retry = zone.retry,
        expire = zone.expire,
        minimum = zone.minimum,
    )
    .unwrap();
    out.push('\n');

    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| {
        let a_apex = is_apex(a, &zone.name);
        let b_apex = is_apex(b, &zone.name);
        b_apex.cmp(&a_apex).then_with(|| a.name.cmp(&b.name)).then_with(|| a.value.cmp(&b.value))
    });

    for record in sorted {
        writeln!(out, "{}", render_record_line(record)).unwrap();
    }

    out
}

fn is_apex(record: &Record, zone_name: &str) -> bool {
    record.name == "@" || record.name == zone_name
}

fn render_record_line(record: &Record) -> String {
    let name = &record.name;
    let ttl = record.ttl;
    let type_str = record_type_str(record.record_type);

    match record.record_type {
        RecordType::Mx => format!("{name} {ttl} IN {type_str} {} {}", record.priority.unwrap_or(10), record.value),
        RecordType::Srv => format!(
            "{name} {ttl} IN {type_str} {} {} {} {}",
            record.priority.unwrap_or(0),
            record.weight.unwrap_or(0),
            record.port.unwrap_or(0),
            record.value
        ),
        RecordType::Txt => format!("{name} {ttl} IN {type_str} \"{}\"", record.value.replace('"', "\\\"")),
        _ => format!("{name} {ttl} IN {type_str} {}", record.value),
    }
}

fn record_type_str(record_type: RecordType) -> &'static str {
    match record_type {
        RecordType::A => "A",
        RecordType::Aaaa => "AAAA",
        RecordType::Cname => "CNAME",
        RecordType::Mx => "MX",
        RecordType::Txt => "TXT",
        RecordType::Srv => "SRV",
        RecordType::Ptr => "PTR",
        RecordType::Ns => "NS",
        RecordType::Soa => "SOA",
        RecordType::Caa => "CAA",
        RecordType::Sshfp => "SSHFP",
        RecordType::Tlsa => "TLSA",
        RecordType::Naptr => "NAPTR",
        RecordType::Loc => "LOC",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::ZoneType;

    fn zone() -> Zone {
        Zone {
            name: "example.com".to_string(),
            zone_type: ZoneType::Master,
            serial: 2026072801,
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

    fn record(name: &str, record_type: RecordType, value: &str) -> Record {
        Record {
            zone_name: "example.com".to_string(),
            name: name.to_string(),
            record_type,
            value: value.to_string(),
            priority: None,
            weight: None,
            port: None,
            ttl: 300,
            active: true,
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let z = zone();
        let records = vec![record("www", RecordType::A, "10.0.0.1"), record("@", RecordType::A, "10.0.0.2")];
        let first = render_zone_file(&z, &records);
        let second = render_zone_file(&z, &records);
        assert_eq!(first, second);
    }

    #[test]
    fn test_apex_record_renders_first() {
        let z = zone();
        let records = vec![record("www", RecordType::A, "10.0.0.1"), record("@", RecordType::A, "10.0.0.2")];
        let rendered = render_zone_file(&z, &records);
        let apex_pos = rendered.find("@ 300 IN A 10.0.0.2").unwrap();
        let www_pos = rendered.find("www 300 IN A 10.0.0.1").unwrap();
        assert!(apex_pos < www_pos);
    }

    #[test]
    fn test_mx_record_includes_priority() {
        let mut rec = record("@", RecordType::Mx, "mail.example.com");
        rec.priority = Some(10);
        let line = render_record_line(&rec);
        assert_eq!(line, "@ 300 IN MX 10 mail.example.com");
    }

    #[test]
    fn test_soa_line_contains_all_fields() {
        let z = zone();
        let rendered = render_zone_file(&z, &[]);
        assert!(rendered.contains("2026072801"));
        assert!(rendered.contains("admin.example.com"));
    }
}
