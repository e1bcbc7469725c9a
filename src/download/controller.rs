// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download lifecycle controller.
//!
//! A single worker task owns every [`PendingDownload`]. Browser events, UI
//! commands, timer fires, store changes and finished helper calls all arrive
//! as [`Event`]s on its channels and are handled one at a time, so no record
//! is ever touched by two handlers at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::registry::PendingRegistry;
use super::timer::ConfirmationTimer;
use super::types::{PendingDownload, PendingView, Phase, PostMove};
use crate::bridge::{
    CloseReason, CompletionEvent, ConfirmationUi, DownloadHost, FilenameSuggestion, FinalState, HelperStatus,
    InterceptRequest, MoveOutcome, NativeHelper, NoticeLevel, UiCommand, UiEvent,
};
use crate::error::{BrowserError, HelperError, Result, RoutingError};
use crate::paths;
use crate::planner::plan_route;
use crate::rules::RuleSet;
use crate::store::{RuleStore, StoreChange};
use crate::types::{DownloadId, DownloadInfo, MatchedRule, Rule, Settings, DEFAULT_FOLDER};

/// Default wait for the UI's editor-visibility answer.
pub const DEFAULT_EDITOR_QUERY_TIMEOUT: Duration = Duration::from_millis(250);

/// How long start-up waits for the helper to report its status.
const HELPER_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// External collaborators the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RuleStore>,
    pub ui: Arc<dyn ConfirmationUi>,
    pub host: Arc<dyn DownloadHost>,
    pub helper: Arc<dyn NativeHelper>,
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The browser's download root, used when a download has to be moved
    /// because its suggest callback was gone
    pub download_root: PathBuf,
    pub editor_query_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            download_root: dirs::download_dir().unwrap_or_else(|| PathBuf::from(DEFAULT_FOLDER)),
            editor_query_timeout: DEFAULT_EDITOR_QUERY_TIMEOUT,
        }
    }
}

/// Everything the worker reacts to.
#[derive(Debug)]
pub(crate) enum Event {
    Intercept(InterceptRequest),
    Completed(CompletionEvent),
    Ui(UiCommand),
    TimerFired {
        id: DownloadId,
        generation: u64,
    },
    StoreChanged(StoreChange),
    /// Store notifications were dropped, reload everything
    StoreLagged,
    FolderPicked {
        id: DownloadId,
        result: std::result::Result<Option<PathBuf>, HelperError>,
    },
    SaveAsChosen {
        id: DownloadId,
        result: std::result::Result<Option<PathBuf>, HelperError>,
    },
    MoveFinished {
        id: DownloadId,
        source: PathBuf,
        destination: PathBuf,
        result: std::result::Result<MoveOutcome, HelperError>,
    },
    Snapshot {
        id: DownloadId,
        reply: oneshot::Sender<Option<PendingView>>,
    },
    PendingIds {
        reply: oneshot::Sender<Vec<DownloadId>>,
    },
    Shutdown,
}

/// Cloneable handle used to feed the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl ControllerHandle {
    fn send(&self, event: Event) -> Result<()> {
        self.tx.send(event).map_err(|_| RoutingError::ControllerStopped)
    }

    /// The browser wants a filename for a new download.
    pub fn intercept(&self, request: InterceptRequest) -> Result<()> {
        self.send(Event::Intercept(request))
    }

    /// The browser finished (or interrupted) a download.
    pub fn completed(&self, event: CompletionEvent) -> Result<()> {
        self.send(Event::Completed(event))
    }

    /// A command from the confirmation UI.
    pub fn command(&self, command: UiCommand) -> Result<()> {
        self.send(Event::Ui(command))
    }

    /// Current state of one download, `None` if it is not pending.
    pub async fn snapshot(&self, id: DownloadId) -> Result<Option<PendingView>> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::Snapshot { id, reply })?;
        rx.await.map_err(|_| RoutingError::ControllerStopped)
    }

    /// Ids of every pending download, ascending.
    pub async fn pending_ids(&self) -> Result<Vec<DownloadId>> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::PendingIds { reply })?;
        rx.await.map_err(|_| RoutingError::ControllerStopped)
    }

    /// Stop the worker. Armed timers are disarmed, pending records dropped.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Event::Shutdown)
    }
}

/// The lifecycle controller's worker state.
pub struct Controller {
    pub(super) store: Arc<dyn RuleStore>,
    pub(super) ui: Arc<dyn ConfirmationUi>,
    pub(super) host: Arc<dyn DownloadHost>,
    pub(super) helper: Arc<dyn NativeHelper>,
    pub(super) config: ControllerConfig,
    pub(super) registry: PendingRegistry,
    pub(super) rules: RuleSet,
    pub(super) settings: Settings,
    pub(super) helper_status: HelperStatus,
    /// Sender for timers and spawned helper calls
    pub(super) internal: mpsc::UnboundedSender<Event>,
    next_generation: u64,
}

impl Controller {
    /// Load rules and settings, probe the helper and spawn the worker.
    pub async fn start(collaborators: Collaborators, config: ControllerConfig) -> Result<ControllerHandle> {
        let Collaborators {
            store,
            ui,
            host,
            helper,
        } = collaborators;

        // Subscribe before loading so no write slips between the two
        let changes = store.subscribe();
        let rules = store.snapshot().await?;
        let settings = store.get_settings().await?;

        let helper_status = match tokio::time::timeout(HELPER_CHECK_TIMEOUT, helper.check_available()).await {
            Ok(status) => status,
            Err(_) => HelperStatus::Unresponsive,
        };
        if !helper_status.is_available() {
            let err = RoutingError::HelperUnavailable(format!("{:?}", helper_status));
            tracing::warn!(error = %err, "Absolute destinations cannot be moved");
        }
        ui.publish(UiEvent::Capabilities {
            helper: helper_status.clone(),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_store_changes(changes, internal_tx.clone()));

        tracing::info!(
            rules = rules.rules.len(),
            groups = rules.groups.len(),
            confirmation = settings.confirmation_enabled,
            timeout_ms = settings.confirmation_timeout_ms,
            "Download controller started"
        );

        let controller = Controller {
            store,
            ui,
            host,
            helper,
            config,
            registry: PendingRegistry::new(),
            rules,
            settings,
            helper_status,
            internal: internal_tx,
            next_generation: 0,
        };
        tokio::spawn(controller.run(command_rx, internal_rx, forwarder));

        Ok(ControllerHandle { tx: command_tx })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Event>,
        mut internal: mpsc::UnboundedReceiver<Event>,
        forwarder: JoinHandle<()>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                Some(event) = internal.recv() => event,
                command = commands.recv() => match command {
                    Some(event) => event,
                    // Every handle dropped
                    None => break,
                },
            };
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.handle(event).await;
        }

        forwarder.abort();
        tracing::info!(pending = self.registry.len(), "Download controller stopped");
    }

    async fn handle(&mut self, event: Event) {
        let result = match event {
            Event::Intercept(request) => self.on_intercept(request),
            Event::Completed(completion) => self.on_completed(completion),
            Event::Ui(command) => self.on_command(command).await,
            Event::TimerFired { id, generation } => self.on_timer_fired(id, generation).await,
            Event::StoreChanged(change) => self.on_store_change(Some(change)).await,
            Event::StoreLagged => self.on_store_change(None).await,
            Event::FolderPicked { id, result } => self.on_folder_picked(id, result).await,
            Event::SaveAsChosen { id, result } => self.on_save_as_chosen(id, result),
            Event::MoveFinished {
                id,
                source,
                destination,
                result,
            } => self.on_move_finished(id, source, destination, result),
            Event::Snapshot { id, reply } => {
                let _ = reply.send(self.registry.get(id).ok().map(PendingDownload::view));
                Ok(())
            }
            Event::PendingIds { reply } => {
                let _ = reply.send(self.registry.ids());
                Ok(())
            }
            Event::Shutdown => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(RoutingError::StaleReference(id)) => {
                tracing::debug!(id, "Ignoring event for a download that is not pending");
            }
            Err(err @ RoutingError::TimerRace(_)) => {
                tracing::warn!(error = %err, "Auto-confirm aborted");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Download event failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // helpers shared with the reactor and the mover
    // ------------------------------------------------------------------

    pub(super) fn timeout_ms(&self) -> Option<u64> {
        self.settings
            .confirmation_enabled
            .then_some(self.settings.confirmation_timeout_ms)
    }

    pub(super) fn notice(&self, id: Option<DownloadId>, level: NoticeLevel, message: impl Into<String>) {
        self.ui.publish(UiEvent::Notice {
            id,
            level,
            message: message.into(),
        });
    }

    /// Arm a countdown for `id`, replacing any armed one.
    pub(super) fn arm_timer(&mut self, id: DownloadId, duration: Duration) -> Result<()> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let timer = ConfirmationTimer::arm(
            duration,
            generation,
            self.internal.clone(),
            Event::TimerFired { id, generation },
        );
        self.registry.get_mut(id)?.arm_timer(timer);
        tracing::debug!(id, generation, duration_ms = duration.as_millis() as u64, "Confirmation timer armed");
        Ok(())
    }

    fn publish_path(&self, record: &PendingDownload) {
        self.ui.publish(UiEvent::PathUpdated {
            id: record.id(),
            relative_path: record.relative_path.clone(),
            absolute_destination: record.absolute_destination().map(Path::to_path_buf),
        });
    }

    // ------------------------------------------------------------------
    // browser events
    // ------------------------------------------------------------------

    fn on_intercept(&mut self, request: InterceptRequest) -> Result<()> {
        let InterceptRequest {
            id,
            url,
            referrer,
            suggested_filename,
            responder,
        } = request;
        if self.registry.contains(id) {
            return Err(RoutingError::Duplicate(id));
        }

        let info = DownloadInfo::new(id, url, referrer, suggested_filename);
        let plan = plan_route(&info, &self.rules, &self.settings);
        let record = PendingDownload::new(info, plan, responder);
        tracing::info!(
            id,
            filename = %record.info.filename,
            path = %record.relative_path,
            post_move = record.post_move.is_needed(),
            "Intercepted download"
        );
        self.registry.insert(record)?;

        if !self.settings.confirmation_enabled {
            return self.confirm(id, CloseReason::AutoConfirmed);
        }

        let timeout_ms = self.timeout_ms();
        let helper_available = self.helper_status.is_available();
        let record = self.registry.get_mut(id)?;
        record.transition(Phase::AwaitingConfirmation)?;
        self.ui.publish(UiEvent::Show(record.summary(timeout_ms, helper_available)));
        let timeout = self.settings.confirmation_timeout();
        self.arm_timer(id, timeout)
    }

    fn on_completed(&mut self, completion: CompletionEvent) -> Result<()> {
        let CompletionEvent { id, state, final_path } = completion;
        let record = self.registry.get_mut(id)?;

        match state {
            FinalState::Interrupted => {
                record.take_timer();
                record.transition(Phase::Cancelled)?;
                self.registry.evict(id);
                self.ui.publish(UiEvent::Closed {
                    id,
                    reason: CloseReason::Interrupted,
                });
                tracing::info!(id, "Browser interrupted download");
                Ok(())
            }
            FinalState::Complete => {
                tracing::debug!(id, path = %final_path.display(), phase = %record.phase(), "Browser finished download");
                record.browser_final_path = Some(final_path);
                if !record.phase().is_confirmed() {
                    // The file is already written, a late suggestion would be lost
                    record.drop_responder();
                    return Ok(());
                }
                self.try_finish(id)
            }
        }
    }

    // ------------------------------------------------------------------
    // UI commands
    // ------------------------------------------------------------------

    async fn on_command(&mut self, command: UiCommand) -> Result<()> {
        let id = command.download_id();
        tracing::debug!(id, ?command, "UI command");

        match command {
            UiCommand::ConfirmNow { id } => self.confirm(id, CloseReason::Confirmed),
            UiCommand::Pause { id } => {
                self.pause(id)?;
                self.registry.get_mut(id)?.paused_by_dialog = false;
                Ok(())
            }
            UiCommand::Resume { id } => self.resume(id),
            UiCommand::Cancel { id } => self.cancel(id).await,
            UiCommand::EditRule { id, rule } => self.edit_rule(id, rule).await,
            UiCommand::ChangeLocation { id, folder, filename } => {
                self.change_location(id, &folder, filename).await
            }
            UiCommand::ChooseRule { id, index } => self.choose_rule(id, index),
            UiCommand::BrowseFolder { id } => self.browse_folder(id),
            UiCommand::SaveAs { id } => self.save_as(id),
        }
    }

    /// Returns false (and tells the UI) if the destination is already committed.
    fn ensure_editable(&self, id: DownloadId) -> Result<bool> {
        let phase = self.registry.get(id)?.phase();
        if phase.is_confirmed() {
            tracing::debug!(id, %phase, "Edit after confirmation ignored");
            self.notice(
                Some(id),
                NoticeLevel::Warning,
                "This download is already confirmed, the change was not applied",
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Commit the current destination. Idempotent once confirmed.
    pub(super) fn confirm(&mut self, id: DownloadId, reason: CloseReason) -> Result<()> {
        let download_root = self.config.download_root.clone();
        let record = self.registry.get_mut(id)?;
        if record.phase().is_confirmed() {
            tracing::debug!(id, "Already confirmed");
            return Ok(());
        }

        record.take_timer();
        record.transition(Phase::Confirmed)?;

        let suggestion = FilenameSuggestion::uniquify(record.relative_path.clone());
        let delivered = match record.take_responder() {
            Some(responder) => responder.suggest(suggestion).is_ok(),
            None => false,
        };

        if !delivered {
            // The browser saved under its default name; route by moving afterwards
            if !record.post_move.is_needed() {
                let folder = match Path::new(&record.relative_path).parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => download_root.join(parent),
                    _ => download_root,
                };
                record.post_move = PostMove::Auto { folder };
            }
            tracing::info!(id, path = %record.relative_path, "Suggest callback gone, falling back to a post-download move");
        }

        tracing::info!(id, path = %record.relative_path, ?reason, "Download confirmed");
        self.ui.publish(UiEvent::Closed { id, reason });
        self.try_finish(id)
    }

    fn pause(&mut self, id: DownloadId) -> Result<()> {
        let record = self.registry.get_mut(id)?;
        match record.phase() {
            Phase::AwaitingConfirmation => {
                if let Some(timer) = record.take_timer() {
                    let remaining = timer.cancel();
                    tracing::debug!(id, remaining_ms = remaining.as_millis() as u64, "Countdown paused");
                }
                record.transition(Phase::Paused)
            }
            phase => {
                tracing::debug!(id, %phase, "Pause ignored");
                Ok(())
            }
        }
    }

    fn resume(&mut self, id: DownloadId) -> Result<()> {
        let record = self.registry.get_mut(id)?;
        if record.phase() != Phase::Paused {
            tracing::debug!(id, phase = %record.phase(), "Resume ignored");
            return Ok(());
        }
        if !self.settings.confirmation_enabled {
            return self.confirm(id, CloseReason::AutoConfirmed);
        }
        record.transition(Phase::AwaitingConfirmation)?;
        let timeout = self.settings.confirmation_timeout();
        self.arm_timer(id, timeout)
    }

    /// Pause for a native dialog, remembering whether the dialog stopped the
    /// countdown itself.
    fn pause_for_dialog(&mut self, id: DownloadId) -> Result<()> {
        let counting = self.registry.get(id)?.phase() == Phase::AwaitingConfirmation;
        self.pause(id)?;
        self.registry.get_mut(id)?.paused_by_dialog = counting;
        Ok(())
    }

    /// A dismissed or failed dialog only undoes its own pause.
    fn resume_after_dialog(&mut self, id: DownloadId) -> Result<()> {
        let record = self.registry.get_mut(id)?;
        if std::mem::take(&mut record.paused_by_dialog) {
            self.resume(id)
        } else {
            tracing::debug!(id, phase = %record.phase(), "Dialog closed, countdown left as it was");
            Ok(())
        }
    }

    fn dialog_closed(&mut self, id: DownloadId) {
        if let Ok(record) = self.registry.get_mut(id) {
            record.paused_by_dialog = false;
        }
    }

    async fn cancel(&mut self, id: DownloadId) -> Result<()> {
        let record = self.registry.get_mut(id)?;
        record.take_timer();
        record.transition(Phase::Cancelled)?;
        self.registry.evict(id);

        match self.host.cancel(id).await {
            Ok(()) => {}
            Err(BrowserError::NotInProgress) => {
                tracing::debug!(id, "Browser download already finished, nothing to abort");
            }
            Err(e) => {
                tracing::warn!(id, error = %e, "Browser refused to cancel download");
            }
        }

        self.ui.publish(UiEvent::Closed {
            id,
            reason: CloseReason::Cancelled,
        });
        tracing::info!(id, "Download cancelled");
        Ok(())
    }

    async fn edit_rule(&mut self, id: DownloadId, rule: Rule) -> Result<()> {
        if !self.ensure_editable(id)? {
            return Ok(());
        }
        self.registry.get_mut(id)?.take_timer();

        if let Err(e) = self.store.add_rule(rule.clone()).await {
            tracing::error!(id, error = %e, "Failed to save edited rule");
            self.notice(Some(id), NoticeLevel::Error, format!("Rule not saved: {}", e));
        }

        let record = self.registry.get_mut(id)?;
        let destination = paths::resolve_destination(&rule.folder, &record.info.filename);
        record.commit_rule(MatchedRule::from_rule(&rule), destination);
        self.publish_path(self.registry.get(id)?);
        self.confirm(id, CloseReason::Confirmed)
    }

    async fn change_location(&mut self, id: DownloadId, folder: &str, filename: Option<String>) -> Result<()> {
        if !self.ensure_editable(id)? {
            return Ok(());
        }
        self.registry.get_mut(id)?.take_timer();

        if paths::is_absolute(folder) {
            match self.helper.verify_folder_exists(Path::new(folder.trim())).await {
                Ok(true) => {}
                Ok(false) => self.notice(
                    Some(id),
                    NoticeLevel::Info,
                    format!("{} does not exist yet and will be created", folder),
                ),
                Err(e) => {
                    tracing::warn!(id, error = %e, "Cannot verify destination folder");
                    self.notice(
                        Some(id),
                        NoticeLevel::Warning,
                        format!("Cannot check {}: {}", folder, e),
                    );
                }
            }
        }

        let record = self.registry.get_mut(id)?;
        let filename = filename
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| record.info.filename.clone());
        record.set_destination(paths::resolve_destination(folder, &filename));
        self.publish_path(self.registry.get(id)?);
        self.confirm(id, CloseReason::Confirmed)
    }

    fn choose_rule(&mut self, id: DownloadId, index: usize) -> Result<()> {
        if !self.ensure_editable(id)? {
            return Ok(());
        }
        let record = self.registry.get_mut(id)?;
        let options = record
            .decision
            .conflict_set()
            .unwrap_or(record.decision.ranked.as_slice());
        let Some(chosen) = options.get(index).cloned() else {
            let count = options.len();
            self.notice(
                Some(id),
                NoticeLevel::Warning,
                format!("Rule {} does not exist ({} to choose from)", index, count),
            );
            return Ok(());
        };

        record.take_timer();
        let destination = paths::resolve_destination(&chosen.folder, &record.info.filename);
        tracing::debug!(id, label = %chosen.label, folder = %chosen.folder, "Rule chosen");
        record.commit_rule(chosen, destination);
        self.publish_path(self.registry.get(id)?);
        self.confirm(id, CloseReason::Confirmed)
    }

    fn browse_folder(&mut self, id: DownloadId) -> Result<()> {
        if !self.ensure_editable(id)? {
            return Ok(());
        }
        self.pause_for_dialog(id)?;

        let record = self.registry.get(id)?;
        let start = record
            .absolute_destination()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.download_root.clone());
        let helper = Arc::clone(&self.helper);
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let result = helper.pick_folder(Some(&start)).await;
            let _ = tx.send(Event::FolderPicked { id, result });
        });
        Ok(())
    }

    async fn on_folder_picked(
        &mut self,
        id: DownloadId,
        result: std::result::Result<Option<PathBuf>, HelperError>,
    ) -> Result<()> {
        match result {
            Ok(Some(folder)) => {
                self.dialog_closed(id);
                let folder = folder.to_string_lossy().into_owned();
                self.change_location(id, &folder, None).await
            }
            Ok(None) => {
                tracing::debug!(id, "Folder picker dismissed");
                self.resume_after_dialog(id)
            }
            Err(e) => {
                self.notice(Some(id), NoticeLevel::Error, format!("Folder picker failed: {}", e));
                self.resume_after_dialog(id)
            }
        }
    }

    fn save_as(&mut self, id: DownloadId) -> Result<()> {
        if !self.ensure_editable(id)? {
            return Ok(());
        }
        self.pause_for_dialog(id)?;

        let record = self.registry.get(id)?;
        let suggested_name = paths::sanitize_filename(&record.info.filename);
        let default_dir = record
            .absolute_destination()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.download_root.clone());
        let helper = Arc::clone(&self.helper);
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let result = helper.show_save_as_dialog(&suggested_name, Some(&default_dir)).await;
            let _ = tx.send(Event::SaveAsChosen { id, result });
        });
        Ok(())
    }

    fn on_save_as_chosen(&mut self, id: DownloadId, result: std::result::Result<Option<PathBuf>, HelperError>) -> Result<()> {
        match result {
            Ok(Some(target)) => {
                self.dialog_closed(id);
                if !self.ensure_editable(id)? {
                    return Ok(());
                }
                let record = self.registry.get_mut(id)?;
                tracing::info!(id, target = %target.display(), "Save As chosen, automatic move disabled");
                record.post_move = PostMove::SaveAs { target };
                self.publish_path(self.registry.get(id)?);
                self.confirm(id, CloseReason::Confirmed)
            }
            Ok(None) => {
                tracing::debug!(id, "Save As dismissed");
                self.resume_after_dialog(id)
            }
            Err(e) => {
                self.notice(Some(id), NoticeLevel::Error, format!("Save As failed: {}", e));
                self.resume_after_dialog(id)
            }
        }
    }

    // ------------------------------------------------------------------
    // timer
    // ------------------------------------------------------------------

    async fn on_timer_fired(&mut self, id: DownloadId, generation: u64) -> Result<()> {
        let record = self.registry.get(id)?;
        if record.timer_generation() != Some(generation) || record.phase() != Phase::AwaitingConfirmation {
            tracing::debug!(id, generation, phase = %record.phase(), "Stale timer fire ignored");
            return Ok(());
        }

        // The local phase says nobody is editing; ask the UI before committing
        let editor_open = tokio::time::timeout(self.config.editor_query_timeout, self.ui.editor_open(id))
            .await
            .ok()
            .flatten()
            .unwrap_or(false);

        let record = self.registry.get_mut(id)?;
        if record.timer_generation() != Some(generation) {
            return Ok(());
        }
        if editor_open {
            record.take_timer();
            record.transition(Phase::Paused)?;
            return Err(RoutingError::TimerRace(id));
        }

        record.take_timer();
        self.confirm(id, CloseReason::AutoConfirmed)
    }
}

/// Relay store notifications into the worker.
async fn forward_store_changes(mut changes: broadcast::Receiver<StoreChange>, tx: mpsc::UnboundedSender<Event>) {
    loop {
        let event = match changes.recv().await {
            Ok(change) => Event::StoreChanged(change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed store notifications, reloading");
                Event::StoreLagged
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if tx.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{NoHelper, StdioHost, SuggestResponder, UiHub};
    use crate::store::MemoryStore;

    async fn start() -> (ControllerHandle, mpsc::UnboundedReceiver<crate::bridge::Outbound>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = Controller::start(
            Collaborators {
                store: Arc::new(MemoryStore::new()),
                ui: Arc::new(UiHub::new()),
                host: Arc::new(StdioHost::new(out_tx)),
                helper: Arc::new(NoHelper),
            },
            ControllerConfig::default(),
        )
        .await
        .expect("controller starts");
        (handle, out_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fire_queued_before_pause_is_ignored() {
        let (handle, _out) = start().await;
        let (responder, mut suggestion) = SuggestResponder::channel();
        handle
            .intercept(InterceptRequest::new(1, "https://example.org/a", None, "a.zip", Some(responder)))
            .unwrap();
        let view = handle.snapshot(1).await.unwrap().unwrap();
        assert!(view.timer_armed);

        // The first countdown's fire lands right after the pause disarmed it
        handle.command(UiCommand::Pause { id: 1 }).unwrap();
        handle.send(Event::TimerFired { id: 1, generation: 1 }).unwrap();

        let view = handle.snapshot(1).await.unwrap().unwrap();
        assert_eq!(view.phase, Phase::Paused);
        assert!(!view.timer_armed);
        assert!(matches!(suggestion.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fire_from_replaced_countdown_is_ignored() {
        let (handle, _out) = start().await;
        let (responder, mut suggestion) = SuggestResponder::channel();
        handle
            .intercept(InterceptRequest::new(1, "https://example.org/a", None, "a.zip", Some(responder)))
            .unwrap();

        // Resume arms generation 2; the old generation must not confirm
        handle.command(UiCommand::Pause { id: 1 }).unwrap();
        handle.command(UiCommand::Resume { id: 1 }).unwrap();
        handle.send(Event::TimerFired { id: 1, generation: 1 }).unwrap();

        let view = handle.snapshot(1).await.unwrap().unwrap();
        assert_eq!(view.phase, Phase::AwaitingConfirmation);
        assert!(view.timer_armed);
        assert!(matches!(suggestion.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

        // The live countdown still confirms
        handle.send(Event::TimerFired { id: 1, generation: 2 }).unwrap();
        let view = handle.snapshot(1).await.unwrap().unwrap();
        assert_eq!(view.phase, Phase::Confirmed);
        assert_eq!(suggestion.try_recv().unwrap().relative_path, "a.zip");
    }
}
