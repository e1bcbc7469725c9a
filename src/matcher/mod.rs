// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule Matcher - finds every rule and group that claims a download.
//!
//! Matching is a pure function of the download metadata and a rule snapshot.
//! It never fails: a URL that does not parse simply contributes no domain
//! match. An empty result is valid and means "use the default folder".

use url::Url;

use crate::error::{Result, RoutingError};
use crate::rules::RuleSet;
use crate::types::{normalize_extension, DownloadInfo, MatchSource, MatchedRule, Rule, RuleKind};

/// Lowest priority a domain override may rewrite a group to.
pub const OVERRIDE_PRIORITY_FLOOR: f64 = 0.1;

/// How far below the best domain rule an overriding group is placed.
pub const OVERRIDE_PRIORITY_STEP: f64 = 0.1;

// ============================================================================
// DOMAIN NORMALIZATION
// ============================================================================

/// Strip `www.` and trailing dots from an already-lowercased hostname.
fn trim_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.');
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// Normalized host of a URL (lowercased, no `www.`, no port).
pub fn url_host(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim()).map_err(|e| RoutingError::Match {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(trim_host(&host.to_lowercase())),
        _ => Err(RoutingError::Match {
            url: raw.to_string(),
            reason: "URL has no host".to_string(),
        }),
    }
}

/// Split a domain rule value into its normalized domain and optional path prefix.
///
/// Accepts loose user input: `https://www.GitHub.com:443/org` yields
/// `("github.com", Some("/org"))`.
pub fn split_domain_rule(value: &str) -> (String, Option<String>) {
    let mut rest = value.trim().to_lowercase();
    if let Some(idx) = rest.find("://") {
        rest = rest[idx + 3..].to_string();
    }

    let (host_port, path) = match rest.find('/') {
        Some(idx) => (rest[..idx].to_string(), Some(rest[idx..].to_string())),
        None => (rest, None),
    };
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => host_port,
    };

    let prefix = path.filter(|p| !p.trim_matches('/').is_empty());
    (trim_host(&host), prefix)
}

/// Normalized domain of a rule value, without any path prefix.
pub fn normalize_domain(value: &str) -> String {
    split_domain_rule(value).0
}

/// True if `host` equals `domain` or is one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(domain)
            .map(|head| head.ends_with('.'))
            .unwrap_or(false)
}

// ============================================================================
// PER-KIND MATCHING
// ============================================================================

/// Does a domain rule claim any of the download's source URLs?
pub fn domain_rule_matches(rule_value: &str, info: &DownloadInfo) -> bool {
    let (domain, prefix) = split_domain_rule(rule_value);
    if domain.is_empty() {
        return false;
    }

    info.source_urls().any(|candidate| {
        let parsed = match Url::parse(candidate.trim()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(url = candidate, error = %e, "Skipping unparseable URL for domain match");
                return false;
            }
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if !host_matches(&trim_host(&host.to_lowercase()), &domain) {
            return false;
        }
        match &prefix {
            Some(prefix) => parsed.path().to_lowercase().starts_with(prefix.as_str()),
            None => true,
        }
    })
}

/// Does any comma-separated phrase occur in the filename (case-insensitive)?
pub fn contains_rule_matches(rule_value: &str, filename: &str) -> bool {
    let filename = filename.to_lowercase();
    rule_value
        .split(',')
        .map(|phrase| phrase.trim().to_lowercase())
        .filter(|phrase| !phrase.is_empty())
        .any(|phrase| filename.contains(&phrase))
}

/// Is the extension one of the rule's comma-separated extensions?
pub fn extension_rule_matches(rule_value: &str, extension: &str) -> bool {
    let Some(extension) = normalize_extension(extension) else {
        return false;
    };
    rule_value
        .split(',')
        .filter_map(normalize_extension)
        .any(|candidate| candidate == extension)
}

fn rule_matches(rule: &Rule, info: &DownloadInfo) -> bool {
    match rule.kind {
        RuleKind::Domain => domain_rule_matches(&rule.value, info),
        RuleKind::Contains => contains_rule_matches(&rule.value, &info.filename),
        RuleKind::Extension => extension_rule_matches(&rule.value, &info.extension),
    }
}

// ============================================================================
// MATCHER
// ============================================================================

/// Collect every enabled rule and group that matches the download.
///
/// Groups with `override_domain_rules` are re-ranked just below the best
/// matching domain rule. The rewrite only affects the returned list.
pub fn match_download(info: &DownloadInfo, rules: &RuleSet) -> Vec<MatchedRule> {
    let mut matches: Vec<MatchedRule> = rules
        .rules
        .iter()
        .filter(|rule| rule.enabled && rule_matches(rule, info))
        .map(MatchedRule::from_rule)
        .collect();

    let best_domain = matches
        .iter()
        .filter(|m| m.source == MatchSource::Domain)
        .map(|m| m.priority)
        .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.min(p))));

    if !info.extension.is_empty() {
        for group in rules.groups.values() {
            if !group.enabled || !group.contains_extension(&info.extension) {
                continue;
            }
            let mut matched = MatchedRule::from_group(group);
            if group.override_domain_rules {
                if let Some(best) = best_domain {
                    matched.priority = (best - OVERRIDE_PRIORITY_STEP).max(OVERRIDE_PRIORITY_FLOOR);
                    matched.overrides_domain = true;
                    tracing::debug!(
                        group = %group.name,
                        from = group.priority,
                        to = matched.priority,
                        "Group overrides domain rules"
                    );
                }
            }
            matches.push(matched);
        }
    }

    matches
}
