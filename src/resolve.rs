//! Host list assembly: CLI positional args, `--hosts-file`, and the
//! `SSHP_DOMAINS` suffix rule. Deliberately thin — this is not a discovery
//! or inventory system, just the minimal surface spec.md §4.2 names.

use std::path::Path;

use crate::errors::NoHostsError;

/// Resolve the final host list from whichever sources were given. Hosts
/// from `--hosts-file` are appended after positional hosts, in file order;
/// blank lines and lines starting with `#` are skipped (spec.md §4.2).
/// Duplicates are preserved, never deduplicated (spec.md §9).
pub fn resolve_hosts(
    positional: &[String],
    hosts_file: Option<&Path>,
    domains: &[String],
) -> anyhow::Result<Vec<String>> {
    let mut hosts = positional.to_vec();

    if let Some(path) = hosts_file {
        let body = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading hosts file {}: {e}", path.display()))?;
        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            hosts.push(line.to_string());
        }
    }

    if !domains.is_empty() {
        hosts = hosts
            .into_iter()
            .map(|h| apply_domain_suffix(&h, domains))
            .collect();
    }

    if hosts.is_empty() {
        anyhow::bail!(NoHostsError);
    }

    Ok(hosts)
}

/// A bare host name (no dot) gets the first configured domain appended;
/// anything already dotted, or carrying a `user@` prefix with a dotted
/// host, is left untouched.
fn apply_domain_suffix(host: &str, domains: &[String]) -> String {
    let host_part = host.split('@').next_back().unwrap_or(host);
    if host_part.contains('.') {
        return host.to_string();
    }
    match domains.first() {
        Some(domain) => format!("{host}.{domain}"),
        None => host.to_string(),
    }
}
