// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-download lifecycle types.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::timer::ConfirmationTimer;
use crate::bridge::{PendingSummary, SuggestResponder};
use crate::error::{Result, RoutingError};
use crate::paths::Destination;
use crate::planner::RoutePlan;
use crate::resolver::{Decision, Resolution};
use crate::types::{DownloadId, DownloadInfo, MatchedRule};

/// Lifecycle phase of a pending download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Rules are being evaluated
    Determining,
    /// Countdown running (or waiting for the user when confirmation is on)
    AwaitingConfirmation,
    /// An editor is open, no countdown
    Paused,
    /// Destination committed, browser still downloading
    Confirmed,
    /// Confirmed and the browser finished writing the file
    Completed,
    /// Post-download move in flight
    Moving,
    Done,
    Cancelled,
}

impl Phase {
    /// Returns true once the download left the routing lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled)
    }

    /// Returns true once the destination has been committed. Never reverts.
    pub fn is_confirmed(self) -> bool {
        matches!(self, Phase::Confirmed | Phase::Completed | Phase::Moving | Phase::Done)
    }

    /// The transition table.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Determining, AwaitingConfirmation | Confirmed | Cancelled)
                | (AwaitingConfirmation, Paused | Confirmed | Cancelled)
                | (Paused, AwaitingConfirmation | Confirmed | Cancelled)
                | (Confirmed, Completed | Cancelled)
                | (Completed, Moving | Done | Cancelled)
                | (Moving, Done | Cancelled)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Determining => "Determining",
            Phase::AwaitingConfirmation => "AwaitingConfirmation",
            Phase::Paused => "Paused",
            Phase::Confirmed => "Confirmed",
            Phase::Completed => "Completed",
            Phase::Moving => "Moving",
            Phase::Done => "Done",
            Phase::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// What happens to the file after the browser has written it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostMove {
    /// The browser already writes it to the right place
    None,
    /// Move into this folder, keeping the routed filename
    Auto { folder: PathBuf },
    /// One-shot move to a path picked in the Save-As dialog
    SaveAs { target: PathBuf },
}

impl PostMove {
    pub fn is_needed(&self) -> bool {
        !matches!(self, PostMove::None)
    }

    fn from_destination(destination: &Destination) -> Self {
        match &destination.absolute_folder {
            Some(folder) => PostMove::Auto { folder: folder.clone() },
            None => PostMove::None,
        }
    }
}

/// Serializable snapshot of a pending download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingView {
    pub id: DownloadId,
    pub phase: Phase,
    pub filename: String,
    pub domain: String,
    pub relative_path: String,
    pub absolute_destination: Option<PathBuf>,
    pub needs_post_move: bool,
    pub save_as: bool,
    pub candidates: Vec<MatchedRule>,
    pub final_rule: Option<MatchedRule>,
    pub conflict_set: Option<Vec<MatchedRule>>,
    pub timer_armed: bool,
    pub remaining_ms: Option<u64>,
    pub browser_complete: bool,
    pub actual_final_path: Option<PathBuf>,
}

/// One intercepted download, owned by the controller until it is evicted.
#[derive(Debug)]
pub struct PendingDownload {
    pub info: DownloadInfo,
    pub decision: Decision,
    /// Path handed to the browser, relative to its download root
    pub relative_path: String,
    pub post_move: PostMove,
    /// The countdown was stopped by an open folder picker or Save As dialog
    /// rather than by the user
    pub paused_by_dialog: bool,
    phase: Phase,
    timer: Option<ConfirmationTimer>,
    responder: Option<SuggestResponder>,
    /// Where the browser actually wrote the file
    pub browser_final_path: Option<PathBuf>,
    pub actual_final_path: Option<PathBuf>,
}

impl PendingDownload {
    pub fn new(info: DownloadInfo, plan: RoutePlan, responder: Option<SuggestResponder>) -> Self {
        let post_move = PostMove::from_destination(&plan.destination);
        Self {
            info,
            decision: plan.decision,
            relative_path: plan.destination.relative_path,
            post_move,
            paused_by_dialog: false,
            phase: Phase::Determining,
            timer: None,
            responder,
            browser_final_path: None,
            actual_final_path: None,
        }
    }

    pub fn id(&self) -> DownloadId {
        self.info.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(RoutingError::InvalidTransition {
                id: self.info.id,
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(id = self.info.id, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        Ok(())
    }

    /// Arm a new timer. Any previous timer is cancelled first.
    pub fn arm_timer(&mut self, timer: ConfirmationTimer) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.cancel();
        }
    }

    /// Disarm the timer, returning it so callers can read its elapsed time.
    pub fn take_timer(&mut self) -> Option<ConfirmationTimer> {
        self.timer.take()
    }

    pub fn timer(&self) -> Option<&ConfirmationTimer> {
        self.timer.as_ref()
    }

    pub fn timer_generation(&self) -> Option<u64> {
        self.timer.as_ref().map(ConfirmationTimer::generation)
    }

    pub fn take_responder(&mut self) -> Option<SuggestResponder> {
        self.responder.take()
    }

    /// The browser can no longer take a suggestion for this download.
    pub fn drop_responder(&mut self) {
        self.responder = None;
    }

    pub fn absolute_destination(&self) -> Option<&Path> {
        match &self.post_move {
            PostMove::None => None,
            PostMove::Auto { folder } => Some(folder),
            PostMove::SaveAs { target } => Some(target),
        }
    }

    /// Point the download at a new destination. A chosen Save-As target wins.
    pub fn set_destination(&mut self, destination: Destination) {
        if !matches!(self.post_move, PostMove::SaveAs { .. }) {
            self.post_move = PostMove::from_destination(&destination);
        }
        self.relative_path = destination.relative_path;
    }

    /// Replace the routing decision and destination with a fresh plan.
    pub fn apply_plan(&mut self, plan: RoutePlan) {
        self.decision = plan.decision;
        self.set_destination(plan.destination);
    }

    /// Commit to one rule picked by the user.
    pub fn commit_rule(&mut self, rule: MatchedRule, destination: Destination) {
        self.decision.resolution = Resolution::Final(rule);
        self.set_destination(destination);
    }

    /// Source and destination of the post-download move, once both are known.
    pub fn move_plan(&self) -> Option<(PathBuf, PathBuf)> {
        let source = self.browser_final_path.clone()?;
        let destination = match &self.post_move {
            PostMove::None => return None,
            PostMove::Auto { folder } => {
                let name = Path::new(&self.relative_path)
                    .file_name()
                    .or_else(|| source.file_name())?;
                folder.join(name)
            }
            PostMove::SaveAs { target } => target.clone(),
        };
        Some((source, destination))
    }

    pub fn view(&self) -> PendingView {
        PendingView {
            id: self.info.id,
            phase: self.phase,
            filename: self.info.filename.clone(),
            domain: self.info.domain.clone(),
            relative_path: self.relative_path.clone(),
            absolute_destination: self.absolute_destination().map(Path::to_path_buf),
            needs_post_move: self.post_move.is_needed(),
            save_as: matches!(self.post_move, PostMove::SaveAs { .. }),
            candidates: self.decision.ranked.clone(),
            final_rule: self.decision.final_rule().cloned(),
            conflict_set: self.decision.conflict_set().map(<[MatchedRule]>::to_vec),
            timer_armed: self.timer.is_some(),
            remaining_ms: self
                .timer
                .as_ref()
                .map(|timer| timer.remaining().as_millis() as u64),
            browser_complete: self.browser_final_path.is_some(),
            actual_final_path: self.actual_final_path.clone(),
        }
    }

    pub fn summary(&self, timeout_ms: Option<u64>, helper_available: bool) -> PendingSummary {
        PendingSummary {
            id: self.info.id,
            filename: self.info.filename.clone(),
            domain: self.info.domain.clone(),
            relative_path: self.relative_path.clone(),
            absolute_destination: self.absolute_destination().map(Path::to_path_buf),
            candidates: self.decision.ranked.clone(),
            final_rule: self.decision.final_rule().cloned(),
            conflict_set: self.decision.conflict_set().map(<[MatchedRule]>::to_vec),
            timeout_ms,
            helper_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_route;
    use crate::rules::RuleSet;
    use crate::types::{Rule, Settings};
    use indexmap::IndexMap;

    fn pending(folder: &str, filename: &str) -> PendingDownload {
        let rules = RuleSet::new(vec![Rule::domain("example.com", folder)], IndexMap::new());
        let info = DownloadInfo::new(5, "https://example.com/f", None, filename);
        let plan = plan_route(&info, &rules, &Settings::default());
        PendingDownload::new(info, plan, None)
    }

    #[test]
    fn test_transition_table() {
        assert!(Phase::Determining.can_transition_to(Phase::AwaitingConfirmation));
        assert!(Phase::AwaitingConfirmation.can_transition_to(Phase::Paused));
        assert!(Phase::Paused.can_transition_to(Phase::AwaitingConfirmation));
        assert!(Phase::Confirmed.can_transition_to(Phase::Completed));
        assert!(Phase::Completed.can_transition_to(Phase::Moving));
        assert!(Phase::Moving.can_transition_to(Phase::Done));

        assert!(!Phase::Confirmed.can_transition_to(Phase::AwaitingConfirmation));
        assert!(!Phase::Confirmed.can_transition_to(Phase::Paused));
        assert!(!Phase::Done.can_transition_to(Phase::Cancelled));
        assert!(!Phase::Cancelled.can_transition_to(Phase::Confirmed));
    }

    #[test]
    fn test_cancel_reachable_from_every_live_phase() {
        for phase in [
            Phase::Determining,
            Phase::AwaitingConfirmation,
            Phase::Paused,
            Phase::Confirmed,
            Phase::Completed,
            Phase::Moving,
        ] {
            assert!(phase.can_transition_to(Phase::Cancelled), "{} -> Cancelled", phase);
        }
    }

    #[test]
    fn test_invalid_transition_is_an_error() {
        let mut record = pending("Code", "a.zip");
        record.transition(Phase::Confirmed).unwrap();
        let err = record.transition(Phase::Paused).unwrap_err();
        assert!(matches!(
            err,
            RoutingError::InvalidTransition {
                from: Phase::Confirmed,
                to: Phase::Paused,
                ..
            }
        ));
        assert_eq!(record.phase(), Phase::Confirmed);
    }

    #[test]
    fn test_absolute_folder_sets_post_move() {
        let record = pending("/srv/models", "m.gguf");
        assert_eq!(record.relative_path, "m.gguf");
        assert_eq!(
            record.post_move,
            PostMove::Auto {
                folder: PathBuf::from("/srv/models")
            }
        );
        assert_eq!(record.absolute_destination(), Some(Path::new("/srv/models")));
    }

    #[test]
    fn test_move_plan_waits_for_browser_path() {
        let mut record = pending("/srv/models", "m.gguf");
        assert!(record.move_plan().is_none());

        record.browser_final_path = Some(PathBuf::from("/dl/m (1).gguf"));
        let (source, destination) = record.move_plan().unwrap();
        assert_eq!(source, PathBuf::from("/dl/m (1).gguf"));
        assert_eq!(destination, PathBuf::from("/srv/models/m.gguf"));
    }

    #[test]
    fn test_save_as_survives_new_destination() {
        let mut record = pending("Code", "a.zip");
        record.post_move = PostMove::SaveAs {
            target: PathBuf::from("/home/u/picked.zip"),
        };
        record.set_destination(crate::paths::resolve_destination("/elsewhere", "a.zip"));

        assert!(matches!(record.post_move, PostMove::SaveAs { .. }));
        record.browser_final_path = Some(PathBuf::from("/dl/a.zip"));
        assert_eq!(record.move_plan().unwrap().1, PathBuf::from("/home/u/picked.zip"));
    }

    #[test]
    fn test_relative_destination_needs_no_move() {
        let mut record = pending("Code", "a.zip");
        record.browser_final_path = Some(PathBuf::from("/dl/Code/a.zip"));
        assert!(!record.post_move.is_needed());
        assert!(record.move_plan().is_none());
        assert!(!record.view().needs_post_move);
    }
}
