// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across dlrouter.
//!
//! Rules, file-type groups and settings are the persisted configuration;
//! `DownloadInfo` and `MatchedRule` are the per-download values that flow
//! from the matcher through the resolver into the lifecycle controller.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::matcher;

/// Browser-assigned download identifier.
pub type DownloadId = u64;

/// Default priority for domain/contains/extension rules.
pub const DEFAULT_RULE_PRIORITY: f64 = 2.0;

/// Default priority for file-type groups.
pub const DEFAULT_GROUP_PRIORITY: f64 = 3.0;

/// Default confirmation window (5 seconds).
pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 5_000;

/// Default folder for downloads no rule claims.
pub const DEFAULT_FOLDER: &str = "Downloads";

fn default_rule_priority() -> f64 {
    DEFAULT_RULE_PRIORITY
}

fn default_group_priority() -> f64 {
    DEFAULT_GROUP_PRIORITY
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_MS
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

/// What part of a download a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Hostname (optionally with a path prefix) of the source, referrer or blob origin
    Domain,
    /// Comma-separated substrings of the filename
    Contains,
    /// Comma-separated file extensions
    Extension,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Contains => "contains",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "domain" => Ok(Self::Domain),
            "contains" => Ok(Self::Contains),
            "extension" | "ext" => Ok(Self::Extension),
            other => Err(format!("unknown rule kind '{}' (expected domain, contains or extension)", other)),
        }
    }
}

/// A user-defined routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    pub value: String,
    pub folder: String,
    /// Lower value wins
    #[serde(default = "default_rule_priority")]
    pub priority: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Rule {
    pub fn new(kind: RuleKind, value: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            folder: folder.into(),
            priority: DEFAULT_RULE_PRIORITY,
            enabled: true,
        }
    }

    pub fn domain(value: impl Into<String>, folder: impl Into<String>) -> Self {
        Self::new(RuleKind::Domain, value, folder)
    }

    pub fn contains(value: impl Into<String>, folder: impl Into<String>) -> Self {
        Self::new(RuleKind::Contains, value, folder)
    }

    pub fn extension(value: impl Into<String>, folder: impl Into<String>) -> Self {
        Self::new(RuleKind::Extension, value, folder)
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// True if both rules share the `(kind, value)` identity.
    pub fn same_key(&self, other: &Rule) -> bool {
        self.kind == other.kind && self.value.trim().eq_ignore_ascii_case(other.value.trim())
    }
}

/// A named bucket of file extensions routed to one folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    /// Lowercased, without the leading dot
    pub extensions: BTreeSet<String>,
    pub folder: String,
    #[serde(default = "default_group_priority")]
    pub priority: f64,
    /// Outrank every matching domain rule for this download
    #[serde(default)]
    pub override_domain_rules: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Group {
    pub fn new<I, S>(name: impl Into<String>, extensions: I, folder: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            extensions: extensions
                .into_iter()
                .filter_map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
            folder: folder.into(),
            priority: DEFAULT_GROUP_PRIORITY,
            override_domain_rules: false,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn overriding_domain_rules(mut self) -> Self {
        self.override_domain_rules = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn contains_extension(&self, extension: &str) -> bool {
        normalize_extension(extension)
            .map(|ext| self.extensions.contains(&ext))
            .unwrap_or(false)
    }
}

/// Lowercase an extension and strip its leading dot. Empty input yields `None`.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let ext = raw.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// How ties at the winning priority are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Pick the first rule after tie-break ordering
    #[default]
    Auto,
    /// Leave the choice to the confirmation UI
    Ask,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ask" => Ok(Self::Ask),
            other => Err(format!("unknown conflict policy '{}' (expected auto or ask)", other)),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Ask => f.write_str("ask"),
        }
    }
}

/// User settings kept in the rule store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub confirmation_enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default = "default_folder")]
    pub default_folder: String,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confirmation_enabled: true,
            confirmation_timeout_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            default_folder: default_folder(),
            conflict_policy: ConflictPolicy::Auto,
        }
    }
}

impl Settings {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

/// Which kind of rule produced a match.
///
/// The derived ordering is the deterministic tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Domain,
    Contains,
    Filetype,
    /// Synthetic fallback to `Settings::default_folder`
    Default,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Contains => "contains",
            Self::Filetype => "filetype",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule or group that matched a particular download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedRule {
    pub source: MatchSource,
    /// Rule value or group name
    pub label: String,
    pub folder: String,
    /// Effective priority for this decision (may be rewritten by a group override)
    pub priority: f64,
    /// Priority as configured
    pub original_priority: f64,
    /// Set on a group re-ranked by `override_domain_rules`; it wins every
    /// tie against domain rules
    pub overrides_domain: bool,
}

impl MatchedRule {
    pub fn from_rule(rule: &Rule) -> Self {
        let source = match rule.kind {
            RuleKind::Domain => MatchSource::Domain,
            RuleKind::Contains => MatchSource::Contains,
            RuleKind::Extension => MatchSource::Filetype,
        };
        Self {
            source,
            label: rule.value.clone(),
            folder: rule.folder.clone(),
            priority: rule.priority,
            original_priority: rule.priority,
            overrides_domain: false,
        }
    }

    pub fn from_group(group: &Group) -> Self {
        Self {
            source: MatchSource::Filetype,
            label: group.name.clone(),
            folder: group.folder.clone(),
            priority: group.priority,
            original_priority: group.priority,
            overrides_domain: false,
        }
    }

    /// The synthetic rule used when nothing matched.
    pub fn default_folder(folder: impl Into<String>) -> Self {
        Self {
            source: MatchSource::Default,
            label: "default".to_string(),
            folder: folder.into(),
            priority: f64::INFINITY,
            original_priority: f64::INFINITY,
            overrides_domain: false,
        }
    }
}

/// Metadata of one intercepted download, as seen by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadInfo {
    pub id: DownloadId,
    pub filename: String,
    /// Lowercased, without the dot; empty when the file has none
    pub extension: String,
    pub url: String,
    pub referrer: Option<String>,
    /// Inner URL of a `blob:` download
    pub origin_url: Option<String>,
    /// Normalized host of the first parseable URL, empty if none parsed
    pub domain: String,
}

impl DownloadInfo {
    pub fn new(
        id: DownloadId,
        url: impl Into<String>,
        referrer: Option<String>,
        filename: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let filename = filename.into();
        let extension = Path::new(&filename)
            .extension()
            .and_then(|ext| normalize_extension(&ext.to_string_lossy()))
            .unwrap_or_default();
        let origin_url = url
            .strip_prefix("blob:")
            .map(|inner| inner.to_string())
            .filter(|inner| !inner.is_empty());
        let referrer = referrer.filter(|r| !r.trim().is_empty());

        let mut info = Self {
            id,
            filename,
            extension,
            url,
            referrer,
            origin_url,
            domain: String::new(),
        };
        let domain = info
            .source_urls()
            .find_map(|candidate| matcher::url_host(candidate).ok())
            .unwrap_or_default();
        info.domain = domain;
        info
    }

    /// Every URL a domain rule may match against: direct URL, referrer, blob origin.
    pub fn source_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str())
            .chain(self.referrer.as_deref())
            .chain(self.origin_url.as_deref())
    }
}
