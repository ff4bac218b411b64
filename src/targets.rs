//! Target expansion
//!
//! Turns a job's discrete addresses and segment strings into the ordered
//! list of addresses to probe. Expansion is deliberately approximate:
//! `/16` segments only yield a small sample and malformed segments are
//! passed through verbatim.

use ipnetwork::Ipv4Network;
use std::{net::Ipv4Addr, str::FromStr};
use tracing::warn;

/// Addresses yielded for a `/16` segment
pub const SLASH16_SAMPLE: usize = 20;

/// Host addresses of a `/24`, network and broadcast excluded
const SLASH24_HOSTS: usize = 254;

const ESTIMATE_SLASH24: usize = 254;
const ESTIMATE_SLASH16: usize = 100;
const ESTIMATE_OTHER: usize = 10;

/// Discrete addresses first, then each segment's expansion, in input order.
/// Duplicates are kept.
pub fn expand_targets(addresses: &[String], segments: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = addresses
        .iter()
        .map(|address| address.trim())
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect();

    for segment in segments {
        targets.extend(expand_segment(segment));
    }

    targets
}

/// Expand one segment string. Never fails; anything unparseable comes back
/// as a single literal target.
pub fn expand_segment(segment: &str) -> Vec<String> {
    let segment = segment.trim();
    if segment.is_empty() {
        return Vec::new();
    }

    let expanded = if segment.contains('/') {
        expand_cidr(segment)
    } else if segment.contains('-') {
        expand_dash_range(segment)
    } else {
        Ok(vec![segment.to_string()])
    };

    match expanded {
        Ok(addresses) => addresses,
        Err(reason) => {
            warn!(segment, reason = %reason, "Could not expand segment, using it verbatim");
            vec![segment.to_string()]
        }
    }
}

fn expand_cidr(segment: &str) -> Result<Vec<String>, String> {
    let network = Ipv4Network::from_str(segment).map_err(|e| e.to_string())?;

    // Host bits in the written base are ignored: 10.1.1.77/24 covers 10.1.1.0/24
    let hosts = |count: usize| -> Vec<String> {
        network
            .iter()
            .skip(1)
            .take(count)
            .map(|ip| ip.to_string())
            .collect()
    };

    Ok(match network.prefix() {
        24 => hosts(SLASH24_HOSTS),
        16 => hosts(SLASH16_SAMPLE),
        _ => vec![network.ip().to_string()],
    })
}

/// `a.b.c.N-M`: last octet N through M inclusive
fn expand_dash_range(segment: &str) -> Result<Vec<String>, String> {
    let parts: Vec<&str> = segment.split('-').collect();
    if parts.len() != 2 {
        return Err("expected exactly one '-'".to_string());
    }

    let base = parts[0]
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| format!("'{}' is not an IPv4 address", parts[0].trim()))?;
    let end: u8 = parts[1]
        .trim()
        .parse()
        .map_err(|_| format!("invalid range end '{}'", parts[1]))?;

    let [a, b, c, start] = base.octets();
    // Empty when `end < start`
    Ok((start..=end)
        .map(|last| Ipv4Addr::new(a, b, c, last).to_string())
        .collect())
}

/// Creation-time estimate of how many targets a job will probe
pub fn estimate_target_count(addresses: &[String], segments: &[String]) -> usize {
    let segment_estimate: usize = segments
        .iter()
        .map(|segment| {
            if segment.contains("/24") {
                ESTIMATE_SLASH24
            } else if segment.contains("/16") {
                ESTIMATE_SLASH16
            } else {
                ESTIMATE_OTHER
            }
        })
        .sum();

    addresses.len() + segment_estimate
}
