//! `named.conf.local` and forwarder stanza rendering.

use std::fmt::Write as _;

use crate::store::model::{Forwarder, Zone, ZoneType};

/// Render the `zone { ... }` stanzas for `named.conf.local`.
pub fn render_named_conf_local(zones: &[Zone], rpz_zones: &[String]) -> String {
    let mut out = String::new();

    for zone in zones.iter().filter(|z| z.active) {
        match zone.zone_type {
            ZoneType::Master => {
                writeln!(out, "zone \"{}\" {{", zone.name).unwrap();
                writeln!(out, "    type master;").unwrap();
                writeln!(out, "    file \"/etc/named/zones/{}.zone\";", zone.name).unwrap();
                writeln!(out, "}};").unwrap();
            }
            ZoneType::Slave => {
                writeln!(out, "zone \"{}\" {{", zone.name).unwrap();
                writeln!(out, "    type slave;").unwrap();
                writeln!(out, "    file \"/etc/named/zones/{}.zone\";", zone.name).unwrap();
                writeln!(out, "    masters {{ {} }};", zone.master_servers.join("; ") + ";").unwrap();
                writeln!(out, "}};").unwrap();
            }
            ZoneType::Forward => {
                writeln!(out, "zone \"{}\" {{", zone.name).unwrap();
                writeln!(out, "    type forward;").unwrap();
                writeln!(out, "    forwarders {{ {} }};", zone.forwarder_ips.join("; ") + ";").unwrap();
                writeln!(out, "}};").unwrap();
            }
        }
        out.push('\n');
    }

    for rpz_zone in rpz_zones {
        writeln!(out, "zone \"{rpz_zone}\" {{").unwrap();
        writeln!(out, "    type master;").unwrap();
        writeln!(out, "    file \"/etc/named/rpz/{rpz_zone}.zone\";").unwrap();
        writeln!(out, "}};").unwrap();
        out.push('\n');
    }

    out
}

/// Render `named.conf.options`' `response-policy` clause and per-forwarder
/// `view`/`forwarders` stanzas.
pub fn render_named_conf_options(forwarders: &[Forwarder], rpz_zones: &[String]) -> String {
    let mut out = String::new();

    writeln!(out, "options {{").unwrap();
    writeln!(out, "    directory \"/var/cache/named\";").unwrap();
    writeln!(out, "    recursion yes;").unwrap();

    if !rpz_zones.is_empty() {
        let clauses: Vec<String> = rpz_zones.iter().map(|z| format!("zone \"{z}\"")).collect();
        writeln!(out, "    response-policy {{ {}; }};", clauses.join("; ")).unwrap();
    }
    writeln!(out, "}};").unwrap();
    out.push('\n');

    for forwarder in forwarders.iter().filter(|f| f.active) {
        let mut servers: Vec<&crate::store::model::Server> = forwarder.servers.iter().collect();
        servers.sort_by_key(|s| s.priority);
        let server_list: Vec<String> = servers.iter().map(|s| format!("{}:{}", s.ip, s.port)).collect();

        writeln!(out, "# forwarder: {}", forwarder.name).unwrap();
        for domain in &forwarder.domains {
            writeln!(out, "zone \"{domain}\" {{").unwrap();
            writeln!(out, "    type forward;").unwrap();
            writeln!(out, "    forwarders {{ {} }};", server_list.join("; ") + ";").unwrap();
            writeln!(out, "}};").unwrap();
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{ForwarderType, Server};

    #[test]
    fn test_master_zone_stanza() {
        let zone = Zone {
            name: "example.com".to_string(),
            zone_type: ZoneType::Master,
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
        let rendered = render_named_conf_local(&[zone], &[]);
        assert!(rendered.contains("type master;"));
        assert!(rendered.contains("zone \"example.com\""));
    }

    #[test]
    fn test_forwarders_sorted_by_priority() {
        let forwarder = Forwarder {
            name: "internal".to_string(),
            domains: vec!["corp.example".to_string()],
            forwarder_type: ForwarderType::Intranet,
            servers: vec![
                Server { ip: "10.0.0.2".to_string(), port: 53, priority: 2 },
                Server { ip: "10.0.0.1".to_string(), port: 53, priority: 1 },
            ],
            health_check_enabled: true,
            active: true,
        };
        let rendered = render_named_conf_options(&[forwarder], &[]);
        let pos1 = rendered.find("10.0.0.1").unwrap();
        let pos2 = rendered.find("10.0.0.2").unwrap();
        assert!(pos1 < pos2);
    }
}
