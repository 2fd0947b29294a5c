//! Clash YAML rule compilation.
//!
//! Ingests a Clash-style config (`rules:` list plus optional
//! `rule-providers:`) and emits the binary slice format. Source order is
//! preserved: each run of consecutive rules with the same kind and target
//! coalesces into a single slice, so "first match wins" survives while
//! the slice walk stays short.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{Error, Result, Target};

use super::RulesetWriter;

#[derive(Debug, Deserialize)]
struct ClashDoc {
    #[serde(default)]
    rules: Vec<String>,
    #[serde(rename = "rule-providers", default)]
    rule_providers: HashMap<String, ProviderSpec>,
}

#[derive(Debug, Deserialize)]
struct ProviderSpec {
    behavior: String,
    /// Inline entries, mostly for tests; real providers load separately.
    #[serde(default)]
    rules: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderPayload {
    #[serde(default)]
    payload: Vec<String>,
}

/// Pending slice under construction; consecutive same-kind, same-target
/// rules merge into the open group.
enum Group {
    Domains {
        domains: Vec<String>,
        target: Target,
    },
    CidrV4 {
        nets: Vec<(u32, u8)>,
        target: Target,
    },
    CidrV6 {
        nets: Vec<([u8; 16], u8)>,
        target: Target,
    },
    GeoIp {
        codes: Vec<String>,
        target: Target,
    },
}

/// Private ranges substituted for `GEOIP,LAN` rules.
const LAN_V4: &[(u32, u8)] = &[
    (0x0A00_0000, 8),
    (0xAC10_0000, 12),
    (0xC0A8_0000, 16),
    (0x7F00_0000, 8),
    (0xA9FE_0000, 16),
];

const LAN_V6: &[([u8; 16], u8)] = &[
    (
        [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
        128,
    ),
    (
        [0xFE, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        10,
    ),
    (
        [0xFC, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        7,
    ),
];

/// Compiler from Clash YAML to the binary slice format.
#[derive(Default)]
pub struct ClashCompiler {
    providers: HashMap<String, Vec<String>>,
}

impl ClashCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider's payload from its own YAML document.
    pub fn load_provider(&mut self, name: &str, yaml: &str) -> Result<()> {
        let payload: ProviderPayload = serde_yaml::from_str(yaml)?;
        self.providers.insert(name.to_string(), payload.payload);
        Ok(())
    }

    /// Register provider entries directly.
    pub fn set_provider(&mut self, name: &str, entries: Vec<String>) {
        self.providers.insert(name.to_string(), entries);
    }

    /// Compile a Clash config into `.k2r` bytes.
    pub fn compile(&self, yaml: &str) -> Result<Vec<u8>> {
        let doc: ClashDoc = serde_yaml::from_str(yaml)?;

        let mut groups: Vec<Group> = Vec::new();
        let mut fallback = Target::Proxy;

        for line in &doc.rules {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.is_empty() {
                continue;
            }
            match parts[0] {
                "MATCH" | "FINAL" => {
                    if parts.len() >= 2 {
                        fallback = Target::parse_lossy(parts[1]);
                    }
                    // MATCH is terminal; anything after it is unreachable.
                    break;
                }
                "DOMAIN-SUFFIX" if parts.len() >= 3 => {
                    let target = Target::parse_lossy(parts[2]);
                    push_domain(&mut groups, parts[1], target);
                }
                "DOMAIN" if parts.len() >= 3 => {
                    // Compiles identically to DOMAIN-SUFFIX: the binary
                    // format stores one dot-prefixed key per domain and
                    // subdomains match it.
                    let target = Target::parse_lossy(parts[2]);
                    push_domain(&mut groups, parts[1], target);
                }
                "IP-CIDR" | "IP-CIDR6" if parts.len() >= 3 => {
                    let target = rule_target(&parts[2..]);
                    push_cidr(&mut groups, parts[1], target)?;
                }
                "GEOIP" if parts.len() >= 3 => {
                    let target = rule_target(&parts[2..]);
                    if parts[1].eq_ignore_ascii_case("LAN") {
                        push_lan(&mut groups, target);
                    } else {
                        push_geoip(&mut groups, parts[1], target);
                    }
                }
                "RULE-SET" if parts.len() >= 3 => {
                    let target = Target::parse_lossy(parts[2]);
                    self.expand_provider(&doc, &mut groups, parts[1], target)?;
                }
                other => {
                    log::debug!("skipping unsupported rule type: {other}");
                }
            }
        }

        let mut writer = RulesetWriter::new(fallback);
        for group in &groups {
            match group {
                Group::Domains { domains, target } => {
                    let d: Vec<&str> = domains.iter().map(String::as_str).collect();
                    writer.push_domains(&d, &[], *target)?;
                }
                Group::CidrV4 { nets, target } => writer.push_cidrs_v4(nets, *target)?,
                Group::CidrV6 { nets, target } => writer.push_cidrs_v6(nets, *target)?,
                Group::GeoIp { codes, target } => {
                    let c: Vec<&str> = codes.iter().map(String::as_str).collect();
                    writer.push_geoip(&c, *target)?;
                }
            }
        }
        writer.finish()
    }

    fn expand_provider(
        &self,
        doc: &ClashDoc,
        groups: &mut Vec<Group>,
        name: &str,
        target: Target,
    ) -> Result<()> {
        let spec = doc.rule_providers.get(name);
        let behavior = spec.map(|s| s.behavior.as_str()).unwrap_or("domain");
        let entries = self
            .providers
            .get(name)
            .cloned()
            .or_else(|| spec.map(|s| s.rules.clone()))
            .unwrap_or_default();
        if entries.is_empty() {
            log::warn!("rule provider {name} has no entries");
            return Ok(());
        }

        match behavior {
            "domain" => {
                for entry in &entries {
                    // Clash domain-set markers ("+.x", ".x") and bare
                    // names all land as one suffix key.
                    let name = entry.strip_prefix("+.").unwrap_or(entry);
                    push_domain(groups, name, target);
                }
            }
            "ipcidr" => {
                for entry in &entries {
                    push_cidr(groups, entry, target)?;
                }
            }
            "classical" => {
                for entry in &entries {
                    let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
                    if parts.len() < 2 {
                        continue;
                    }
                    match parts[0] {
                        "DOMAIN" | "DOMAIN-SUFFIX" => push_domain(groups, parts[1], target),
                        "IP-CIDR" | "IP-CIDR6" => push_cidr(groups, parts[1], target)?,
                        other => log::debug!("skipping classical entry type: {other}"),
                    }
                }
            }
            other => {
                log::warn!("unknown provider behavior {other} for {name}");
            }
        }
        Ok(())
    }
}

/// The rule target, skipping Clash flags like `no-resolve`.
fn rule_target(rest: &[&str]) -> Target {
    rest.iter()
        .find(|p| !p.eq_ignore_ascii_case("no-resolve"))
        .map(|p| Target::parse_lossy(p))
        .unwrap_or(Target::Proxy)
}

fn push_domain(groups: &mut Vec<Group>, domain: &str, target: Target) {
    if let Some(Group::Domains {
        domains, target: t,
    }) = groups.last_mut()
    {
        if *t == target {
            domains.push(domain.to_string());
            return;
        }
    }
    groups.push(Group::Domains {
        domains: vec![domain.to_string()],
        target,
    });
}

fn push_cidr(groups: &mut Vec<Group>, cidr: &str, target: Target) -> Result<()> {
    if cidr.contains(':') {
        let net: ipnet::Ipv6Net = cidr
            .parse()
            .map_err(|_| Error::Cidr(cidr.to_string()))?;
        let octets: [u8; 16] = net.network().octets();
        if let Some(Group::CidrV6 { nets, target: t }) = groups.last_mut() {
            if *t == target {
                nets.push((octets, net.prefix_len()));
                return Ok(());
            }
        }
        groups.push(Group::CidrV6 {
            nets: vec![(octets, net.prefix_len())],
            target,
        });
    } else {
        let net: ipnet::Ipv4Net = cidr
            .parse()
            .map_err(|_| Error::Cidr(cidr.to_string()))?;
        let bits = u32::from(net.network());
        if let Some(Group::CidrV4 { nets, target: t }) = groups.last_mut() {
            if *t == target {
                nets.push((bits, net.prefix_len()));
                return Ok(());
            }
        }
        groups.push(Group::CidrV4 {
            nets: vec![(bits, net.prefix_len())],
            target,
        });
    }
    Ok(())
}

fn push_geoip(groups: &mut Vec<Group>, code: &str, target: Target) {
    if let Some(Group::GeoIp { codes, target: t }) = groups.last_mut() {
        if *t == target {
            codes.push(code.to_string());
            return;
        }
    }
    groups.push(Group::GeoIp {
        codes: vec![code.to_string()],
        target,
    });
}

fn push_lan(groups: &mut Vec<Group>, target: Target) {
    groups.push(Group::CidrV4 {
        nets: LAN_V4.to_vec(),
        target,
    });
    groups.push(Group::CidrV6 {
        nets: LAN_V6.to_vec(),
        target,
    });
}
