//! Hostname handling for the `ips.hostnames` column.

use regex::Regex;
use std::sync::OnceLock;

/// Comma separated, surrounding whitespace trimmed, empty segments dropped.
pub fn split_hostnames(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn primary_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Shortest suffix that is either label + 2-3 char label + 2 char ccTLD
    // (bbc.co.uk) or label + TLD (example.com). Approximates eTLD+1 without
    // a public suffix list.
    RE.get_or_init(|| {
        Regex::new(r"^(?:.*?\.)??([^.]+\.[a-z]{2,3}\.[a-z]{2}|[^.]+\.[^.]+)$").expect("primary domain pattern")
    })
}

/// Coarsen a hostname to its primary domain. Single-label names reduce to
/// themselves; names that are empty after normalization yield `None`.
pub fn primary_domain(hostname: &str) -> Option<String> {
    let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.split('.').any(str::is_empty) {
        return None;
    }
    match primary_domain_re().captures(&host) {
        Some(caps) => caps.get(1).map(|m| m.as_str().to_string()),
        None => Some(host),
    }
}
