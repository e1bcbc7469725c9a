// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Matcher -> Resolver -> Path Resolver, in one call.

use serde::Serialize;

use crate::matcher;
use crate::paths::{self, Destination};
use crate::resolver::{self, Decision};
use crate::rules::RuleSet;
use crate::types::{DownloadInfo, Settings};

/// Everything the controller needs to route one download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub decision: Decision,
    /// Destination for the provisional rule
    pub destination: Destination,
}

/// Match, resolve and place one download against a rule snapshot.
pub fn plan_route(info: &DownloadInfo, rules: &RuleSet, settings: &Settings) -> RoutePlan {
    let candidates = matcher::match_download(info, rules);
    let decision = resolver::resolve(candidates, settings.conflict_policy, &settings.default_folder);
    let destination = paths::resolve_destination(&decision.provisional().folder, &info.filename);
    tracing::debug!(
        id = info.id,
        candidates = decision.ranked.len(),
        folder = %decision.provisional().folder,
        path = %destination.relative_path,
        "Planned route"
    );
    RoutePlan { decision, destination }
}
