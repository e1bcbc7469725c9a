// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule-change reactor.
//!
//! When rules, groups or settings change while downloads wait for
//! confirmation, those downloads are re-planned against the fresh data and
//! the UI is told. Paused downloads are left alone: whatever the user is
//! editing wins over a background change.

use std::path::Path;

use super::controller::Controller;
use super::types::Phase;
use crate::bridge::{CloseReason, UiEvent};
use crate::error::Result;
use crate::planner::plan_route;
use crate::store::StoreChange;
use crate::types::Settings;

impl Controller {
    /// Reload what changed (everything for `None`) and re-plan waiting downloads.
    pub(super) async fn on_store_change(&mut self, change: Option<StoreChange>) -> Result<()> {
        let previous_settings = self.settings.clone();

        if matches!(change, None | Some(StoreChange::Rules) | Some(StoreChange::Groups)) {
            self.rules = self.store.snapshot().await?;
        }
        if matches!(change, None | Some(StoreChange::Settings)) {
            self.settings = self.store.get_settings().await?;
        }
        tracing::debug!(?change, pending = self.registry.len(), "Store changed");

        self.replan_waiting();

        if self.settings != previous_settings {
            self.apply_settings(&previous_settings)?;
        }
        Ok(())
    }

    fn replan_waiting(&mut self) {
        for id in self.registry.ids() {
            let Ok(record) = self.registry.get_mut(id) else {
                continue;
            };
            if record.phase() != Phase::AwaitingConfirmation {
                continue;
            }

            let plan = plan_route(&record.info, &self.rules, &self.settings);
            let path_changed = plan.destination.relative_path != record.relative_path
                || plan.destination.absolute_folder.as_deref() != record.absolute_destination();
            record.apply_plan(plan);

            self.ui.publish(UiEvent::RulesUpdated {
                id,
                candidates: record.decision.ranked.clone(),
                final_rule: record.decision.final_rule().cloned(),
                conflict_set: record.decision.conflict_set().map(<[_]>::to_vec),
            });
            if path_changed {
                tracing::info!(id, path = %record.relative_path, "Destination changed by rule update");
                self.ui.publish(UiEvent::PathUpdated {
                    id,
                    relative_path: record.relative_path.clone(),
                    absolute_destination: record.absolute_destination().map(Path::to_path_buf),
                });
            }
        }
    }

    /// Re-time armed countdowns, or confirm at once when confirmation was switched off.
    fn apply_settings(&mut self, previous: &Settings) -> Result<()> {
        let waiting: Vec<_> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| {
                self.registry
                    .get(*id)
                    .map(|record| record.phase() == Phase::AwaitingConfirmation)
                    .unwrap_or(false)
            })
            .collect();

        if !self.settings.confirmation_enabled {
            for id in waiting {
                tracing::info!(id, "Confirmation disabled, confirming waiting download");
                self.confirm(id, CloseReason::AutoConfirmed)?;
            }
            return Ok(());
        }

        if self.settings.confirmation_timeout_ms == previous.confirmation_timeout_ms {
            return Ok(());
        }

        let timeout = self.settings.confirmation_timeout();
        for id in waiting {
            let elapsed = self
                .registry
                .get_mut(id)?
                .take_timer()
                .map(|timer| {
                    let elapsed = timer.elapsed();
                    timer.cancel();
                    elapsed
                })
                .unwrap_or_default();
            let remaining = timeout.saturating_sub(elapsed);
            tracing::debug!(id, remaining_ms = remaining.as_millis() as u64, "Countdown re-timed");
            self.arm_timer(id, remaining)?;
        }
        Ok(())
    }
}
