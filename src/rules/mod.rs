// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule and group editing.
//!
//! A `RuleSet` is the snapshot the matcher works on. The editing helpers keep
//! the one invariant the rule list has: no two rules share `(kind, value)`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{Group, Rule, RuleKind};

/// Rules plus file-type groups, as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub groups: IndexMap<String, Group>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>, groups: IndexMap<String, Group>) -> Self {
        Self { rules, groups }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.groups.is_empty()
    }
}

/// Insert a rule, replacing any rule with the same `(kind, value)` in place.
///
/// Returns the rule that was replaced, if any.
pub fn upsert_rule(rules: &mut Vec<Rule>, rule: Rule) -> Option<Rule> {
    match rules.iter().position(|existing| existing.same_key(&rule)) {
        Some(idx) => Some(std::mem::replace(&mut rules[idx], rule)),
        None => {
            rules.push(rule);
            None
        }
    }
}

/// Remove the rule with the given `(kind, value)`.
pub fn remove_rule(rules: &mut Vec<Rule>, kind: RuleKind, value: &str) -> Option<Rule> {
    let probe = Rule::new(kind, value, "");
    let idx = rules.iter().position(|existing| existing.same_key(&probe))?;
    Some(rules.remove(idx))
}

/// Insert or replace a group under its name.
pub fn upsert_group(groups: &mut IndexMap<String, Group>, group: Group) -> Option<Group> {
    groups.insert(group.name.clone(), group)
}

/// Remove a group by name, keeping the order of the rest.
pub fn remove_group(groups: &mut IndexMap<String, Group>, name: &str) -> Option<Group> {
    groups.shift_remove(name)
}

/// Collapse duplicates in a rule list loaded from disk, last one wins.
pub fn dedupe_rules(rules: Vec<Rule>) -> Vec<Rule> {
    let mut out: Vec<Rule> = Vec::with_capacity(rules.len());
    for rule in rules {
        upsert_rule(&mut out, rule);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_same_key_replaces() {
        let mut rules = Vec::new();
        assert!(upsert_rule(&mut rules, Rule::domain("github.com", "Code")).is_none());
        let replaced = upsert_rule(&mut rules, Rule::domain("github.com", "Repos"));

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].folder, "Repos");
        assert_eq!(replaced.map(|r| r.folder), Some("Code".to_string()));
    }

    #[test]
    fn test_upsert_different_kind_coexists() {
        let mut rules = Vec::new();
        upsert_rule(&mut rules, Rule::domain("pdf", "A"));
        upsert_rule(&mut rules, Rule::contains("pdf", "B"));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_remove_rule() {
        let mut rules = vec![Rule::domain("github.com", "Code"), Rule::contains("invoice", "Bills")];
        let removed = remove_rule(&mut rules, RuleKind::Domain, "GITHUB.com");
        assert!(removed.is_some());
        assert_eq!(rules.len(), 1);
        assert!(remove_rule(&mut rules, RuleKind::Domain, "github.com").is_none());
    }

    #[test]
    fn test_group_upsert_and_remove_keep_order() {
        let mut groups = IndexMap::new();
        upsert_group(&mut groups, Group::new("images", ["png"], "Pics"));
        upsert_group(&mut groups, Group::new("video", ["mp4"], "Video"));
        upsert_group(&mut groups, Group::new("docs", ["pdf"], "Docs"));
        upsert_group(&mut groups, Group::new("images", ["png", "jpg"], "Images"));

        assert_eq!(groups.len(), 3);
        assert_eq!(groups["images"].folder, "Images");

        remove_group(&mut groups, "video");
        let names: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(names, vec!["images", "docs"]);
    }

    #[test]
    fn test_dedupe_rules_last_wins() {
        let rules = dedupe_rules(vec![
            Rule::domain("a.com", "First"),
            Rule::domain("b.com", "B"),
            Rule::domain("A.com", "Second"),
        ]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].folder, "Second");
    }
}
