//! Response Policy Zone file rendering.

use std::fmt::Write as _;

use crate::store::model::{RpzAction, RpzRule};

/// Render an RPZ zone's rules as CNAME-trigger records, the standard BIND
/// RPZ encoding: block -> CNAME ".", passthru -> CNAME rpz-passthru.,
/// redirect -> CNAME to the configured target.
pub fn render_rpz_file(rpz_zone: &str, serial: u32, rules: &[RpzRule]) -> String {
    let mut out = String::new();
    writeln!(out, "$TTL 60").unwrap();
    writeln!(out, "@ IN SOA ns1.{rpz_zone}. admin.{rpz_zone}. ({serial} 3600 600 604800 60)").unwrap();
    out.push('\n');

    let mut sorted: Vec<&RpzRule> = rules.iter().filter(|r| r.active).collect();
    sorted.sort_by(|a, b| a.domain.cmp(&b.domain));

    for rule in sorted {
        let target = match rule.action {
            RpzAction::Block => ".".to_string(),
            RpzAction::Passthru => "rpz-passthru.".to_string(),
            RpzAction::Redirect => rule.redirect_target.clone().unwrap_or_else(|| ".".to_string()),
        };
        writeln!(out, "{} CNAME {}", rule.domain, target).unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::RpzSource;

    fn rule(domain: &str, action: RpzAction) -> RpzRule {
        RpzRule {
            rpz_zone: "rpz.local".to_string(),
            domain: domain.to_string(),
            action,
            redirect_target: None,
            source: RpzSource::Manual,
            description: String::new(),
            active: true,
        }
    }

    #[test]
    fn test_block_rule_renders_dot_cname() {
        let rendered = render_rpz_file("rpz.local", 1, &[rule("malware.example", RpzAction::Block)]);
        assert!(rendered.contains("malware.example CNAME ."));
    }

    #[test]
    fn test_passthru_rule_renders_passthru_cname() {
        let rendered = render_rpz_file("rpz.local", 1, &[rule("safe.example", RpzAction::Passthru)]);
        assert!(rendered.contains("safe.example CNAME rpz-passthru."));
    }

    #[test]
    fn test_inactive_rule_excluded() {
        let mut r = rule("disabled.example", RpzAction::Block);
        r.active = false;
        let rendered = render_rpz_file("rpz.local", 1, &[r]);
        assert!(!rendered.contains("disabled.example"));
    }
}
