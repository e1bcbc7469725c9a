// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conflict Resolver - picks the winning rule out of the matcher's candidates.
//!
//! Priorities are compared with a tolerance of 0.01, so `2.0` and `2.005`
//! are the same priority. When several candidates share the best priority the
//! configured policy decides: `Auto` takes the first one in tie-break order
//! (domain, contains, filetype), `Ask` hands the whole tied group to the UI.
//! A group carrying the domain override never ties with a domain rule: it
//! wins outright against every domain rule it shares a priority with.

use std::cmp::Ordering;

use serde::Serialize;

use crate::types::{ConflictPolicy, MatchSource, MatchedRule};

/// Priorities closer than this are equal.
pub const PRIORITY_TOLERANCE: f64 = 0.01;

/// Outcome of resolving one candidate list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "rules", rename_all = "snake_case")]
pub enum Resolution {
    /// One rule wins
    Final(MatchedRule),
    /// Several rules tie and the user must choose
    Conflict(Vec<MatchedRule>),
}

/// Ranked candidates plus the resolution derived from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// All candidates, best first
    pub ranked: Vec<MatchedRule>,
    pub resolution: Resolution,
}

impl Decision {
    pub fn final_rule(&self) -> Option<&MatchedRule> {
        match &self.resolution {
            Resolution::Final(rule) => Some(rule),
            Resolution::Conflict(_) => None,
        }
    }

    pub fn conflict_set(&self) -> Option<&[MatchedRule]> {
        match &self.resolution {
            Resolution::Final(_) => None,
            Resolution::Conflict(rules) => Some(rules),
        }
    }

    /// The rule whose folder is used right now.
    ///
    /// For a pending conflict this is the first rule of the tied group, which
    /// stays the destination until the user picks another one.
    pub fn provisional(&self) -> &MatchedRule {
        match &self.resolution {
            Resolution::Final(rule) => rule,
            Resolution::Conflict(rules) => &rules[0],
        }
    }
}

/// True if two priorities are equal within `PRIORITY_TOLERANCE`.
pub fn priorities_equal(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= PRIORITY_TOLERANCE
}

fn rank_order(a: &MatchedRule, b: &MatchedRule) -> Ordering {
    a.priority
        .total_cmp(&b.priority)
        .then_with(|| b.overrides_domain.cmp(&a.overrides_domain))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.label.cmp(&b.label))
}

fn tie_break_order(a: &MatchedRule, b: &MatchedRule) -> Ordering {
    b.overrides_domain
        .cmp(&a.overrides_domain)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.priority.total_cmp(&b.priority))
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| a.folder.cmp(&b.folder))
}

/// Resolve the candidate list under the given policy.
///
/// An empty list resolves to a synthetic rule pointing at `default_folder`.
pub fn resolve(candidates: Vec<MatchedRule>, policy: ConflictPolicy, default_folder: &str) -> Decision {
    if candidates.is_empty() {
        let fallback = MatchedRule::default_folder(default_folder);
        return Decision {
            ranked: vec![fallback.clone()],
            resolution: Resolution::Final(fallback),
        };
    }

    let mut ranked = candidates;
    ranked.sort_by(rank_order);

    let best = ranked[0].priority;
    let mut tied: Vec<MatchedRule> = ranked
        .iter()
        .filter(|candidate| priorities_equal(candidate.priority, best))
        .cloned()
        .collect();
    if tied.iter().any(|candidate| candidate.overrides_domain) {
        tied.retain(|candidate| candidate.source != MatchSource::Domain);
    }
    tied.sort_by(tie_break_order);

    let resolution = if tied.len() == 1 {
        Resolution::Final(tied.remove(0))
    } else {
        match policy {
            ConflictPolicy::Auto => Resolution::Final(tied.remove(0)),
            ConflictPolicy::Ask => Resolution::Conflict(tied),
        }
    };

    Decision { ranked, resolution }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Group, Rule};

    fn domain(value: &str, folder: &str, priority: f64) -> MatchedRule {
        MatchedRule::from_rule(&Rule::domain(value, folder).with_priority(priority))
    }

    #[test]
    fn test_empty_resolves_to_default_folder() {
        let decision = resolve(Vec::new(), ConflictPolicy::Ask, "Unsorted");
        let rule = decision.final_rule().unwrap();
        assert_eq!(rule.source, MatchSource::Default);
        assert_eq!(rule.folder, "Unsorted");
        assert!(rule.priority.is_infinite());
    }

    #[test]
    fn test_lower_priority_wins() {
        let group = MatchedRule::from_group(&Group::new("images", ["png"], "Pics"));
        let decision = resolve(
            vec![group, domain("github.com", "Code", 1.0)],
            ConflictPolicy::Auto,
            "Downloads",
        );
        assert_eq!(decision.final_rule().unwrap().folder, "Code");
        assert_eq!(decision.ranked.len(), 2);
    }

    #[test]
    fn test_tolerance_treats_close_priorities_as_tied() {
        let decision = resolve(
            vec![domain("a.com", "A", 2.0), domain("b.com", "B", 2.005)],
            ConflictPolicy::Ask,
            "Downloads",
        );
        assert_eq!(decision.conflict_set().map(|c| c.len()), Some(2));
        assert!(decision.final_rule().is_none());
    }

    #[test]
    fn test_outside_tolerance_is_ordered() {
        let decision = resolve(
            vec![domain("b.com", "B", 2.02), domain("a.com", "A", 2.0)],
            ConflictPolicy::Ask,
            "Downloads",
        );
        assert_eq!(decision.final_rule().unwrap().folder, "A");
    }

    #[test]
    fn test_ask_policy_returns_conflict_set() {
        let decision = resolve(
            vec![domain("a.com", "A", 2.0), domain("b.com", "B", 2.0)],
            ConflictPolicy::Ask,
            "Downloads",
        );
        assert!(decision.final_rule().is_none());
        assert_eq!(decision.conflict_set().unwrap().len(), 2);
        assert_eq!(decision.provisional().folder, "A");
    }

    #[test]
    fn test_auto_policy_is_deterministic() {
        let a = domain("a.com", "A", 2.0);
        let b = domain("b.com", "B", 2.0);

        let first = resolve(vec![a.clone(), b.clone()], ConflictPolicy::Auto, "Downloads");
        let second = resolve(vec![b, a], ConflictPolicy::Auto, "Downloads");

        assert_eq!(first.final_rule(), second.final_rule());
        assert_eq!(first.final_rule().unwrap().folder, "A");
    }

    #[test]
    fn test_tie_break_prefers_domain_over_filetype() {
        let group = MatchedRule::from_group(&Group::new("images", ["png"], "Pics").with_priority(2.0));
        let contains = MatchedRule::from_rule(&Rule::contains("shot", "Shots"));
        let decision = resolve(
            vec![group, contains, domain("z.com", "Z", 2.0)],
            ConflictPolicy::Auto,
            "Downloads",
        );
        assert_eq!(decision.final_rule().unwrap().source, MatchSource::Domain);
    }

    #[test]
    fn test_overriding_group_wins_ties_with_domain_rules() {
        let mut group = MatchedRule::from_group(&Group::new("images", ["png"], "Pics"));
        group.priority = 0.1;
        group.overrides_domain = true;
        let contains = MatchedRule::from_rule(&Rule::contains("shot", "Shots").with_priority(0.1));

        let decision = resolve(
            vec![domain("github.com", "Code", 0.1), group.clone()],
            ConflictPolicy::Ask,
            "Downloads",
        );
        assert_eq!(decision.final_rule().unwrap().folder, "Pics");
        assert_eq!(decision.ranked[0].folder, "Pics");

        // Non-domain rules still tie with it
        let decision = resolve(
            vec![domain("github.com", "Code", 0.1), group, contains],
            ConflictPolicy::Ask,
            "Downloads",
        );
        let conflict = decision.conflict_set().unwrap();
        assert_eq!(conflict.len(), 2);
        assert!(conflict.iter().all(|rule| rule.source != MatchSource::Domain));
        assert_eq!(decision.provisional().folder, "Pics");
    }
}
