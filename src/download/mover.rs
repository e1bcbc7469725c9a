// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Post-download mover.
//!
//! A move starts only once the destination is confirmed and the browser has
//! reported where it wrote the file, in whichever order those arrive. The
//! browser-reported path is always the source. Failures are reported and the
//! record is evicted; nothing is retried.

use std::path::PathBuf;
use std::sync::Arc;

use super::controller::{Controller, Event};
use super::types::Phase;
use crate::bridge::{MoveOutcome, NoticeLevel};
use crate::error::{HelperError, Result, RoutingError};
use crate::types::DownloadId;

impl Controller {
    /// Finish the download if both halves (confirmation, browser completion) are in.
    pub(super) fn try_finish(&mut self, id: DownloadId) -> Result<()> {
        let record = self.registry.get_mut(id)?;
        if record.phase() != Phase::Confirmed || record.browser_final_path.is_none() {
            tracing::debug!(
                id,
                phase = %record.phase(),
                browser_complete = record.browser_final_path.is_some(),
                "Waiting before finishing"
            );
            return Ok(());
        }
        record.transition(Phase::Completed)?;

        match record.move_plan() {
            Some((source, destination)) if source != destination => {
                record.transition(Phase::Moving)?;
                tracing::info!(id, from = %source.display(), to = %destination.display(), "Moving download");

                let helper = Arc::clone(&self.helper);
                let tx = self.internal.clone();
                tokio::spawn(async move {
                    let result = helper.move_file(&source, &destination).await;
                    let _ = tx.send(Event::MoveFinished {
                        id,
                        source,
                        destination,
                        result,
                    });
                });
                Ok(())
            }
            _ => {
                record.actual_final_path = record.browser_final_path.clone();
                record.transition(Phase::Done)?;
                tracing::info!(id, path = %record.relative_path, "Download routed");
                self.registry.evict(id);
                Ok(())
            }
        }
    }

    pub(super) fn on_move_finished(
        &mut self,
        id: DownloadId,
        source: PathBuf,
        destination: PathBuf,
        result: std::result::Result<MoveOutcome, HelperError>,
    ) -> Result<()> {
        let record = self.registry.get_mut(id)?;
        if record.phase() != Phase::Moving {
            tracing::debug!(id, phase = %record.phase(), "Move result for a download that is not moving");
            return Ok(());
        }
        record.transition(Phase::Done)?;

        match result {
            Ok(outcome) => {
                tracing::info!(id, path = %outcome.final_path.display(), "Download moved");
                let message = format!("Saved to {}", outcome.final_path.display());
                record.actual_final_path = Some(outcome.final_path);
                self.registry.evict(id);
                self.notice(Some(id), NoticeLevel::Info, message);
            }
            Err(e) => {
                let err = RoutingError::MoveFailure {
                    source_path: source.clone(),
                    destination,
                    reason: e.to_string(),
                };
                tracing::warn!(id, error = %err, "Post-download move failed");
                record.actual_final_path = Some(source.clone());
                self.registry.evict(id);
                self.notice(
                    Some(id),
                    NoticeLevel::Error,
                    format!("{}. The file stays at {}", err, source.display()),
                );
            }
        }
        Ok(())
    }
}
