// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Confirmation UI protocol.
//!
//! Commands flow UI -> controller as [`UiCommand`], state flows controller ->
//! UI as [`UiEvent`]. Publishing is a best-effort fan-out: having no UI
//! attached is a normal outcome ([`Delivery::NoListener`]), not an error.
//!
//! Editor visibility is tracked on the UI side of the boundary and queried
//! live by the controller before an automatic confirmation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::helper::HelperStatus;
use crate::types::{DownloadId, MatchedRule, Rule};

/// Capacity of the UI event fan-out.
const UI_CHANNEL_CAPACITY: usize = 128;

/// User intents sent from the confirmation UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    /// Confirm the current destination now
    ConfirmNow { id: DownloadId },
    /// Save (or replace) a rule and route this download with it
    EditRule { id: DownloadId, rule: Rule },
    /// Route this download to an explicit folder, optionally renamed
    ChangeLocation {
        id: DownloadId,
        folder: String,
        #[serde(default)]
        filename: Option<String>,
    },
    /// Pick one rule out of a pending conflict set
    ChooseRule { id: DownloadId, index: usize },
    /// Open the native folder picker
    BrowseFolder { id: DownloadId },
    /// Open the native Save-As dialog
    SaveAs { id: DownloadId },
    Cancel { id: DownloadId },
    /// An edit panel opened
    Pause { id: DownloadId },
    /// The edit panel closed
    Resume { id: DownloadId },
}

impl UiCommand {
    pub fn download_id(&self) -> DownloadId {
        match self {
            Self::ConfirmNow { id }
            | Self::EditRule { id, .. }
            | Self::ChangeLocation { id, .. }
            | Self::ChooseRule { id, .. }
            | Self::BrowseFolder { id }
            | Self::SaveAs { id }
            | Self::Cancel { id }
            | Self::Pause { id }
            | Self::Resume { id } => *id,
        }
    }
}

/// What the UI needs to render a pending download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSummary {
    pub id: DownloadId,
    pub filename: String,
    pub domain: String,
    pub relative_path: String,
    pub absolute_destination: Option<PathBuf>,
    pub candidates: Vec<MatchedRule>,
    pub final_rule: Option<MatchedRule>,
    pub conflict_set: Option<Vec<MatchedRule>>,
    /// Countdown length, `None` when confirmation is disabled
    pub timeout_ms: Option<u64>,
    pub helper_available: bool,
}

/// Why the confirmation UI for a download closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The user confirmed or edited
    Confirmed,
    /// The countdown ran out
    AutoConfirmed,
    Cancelled,
    /// The browser reported an interrupted download
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// State pushed from the controller to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Capabilities { helper: HelperStatus },
    Show(PendingSummary),
    PathUpdated {
        id: DownloadId,
        relative_path: String,
        absolute_destination: Option<PathBuf>,
    },
    RulesUpdated {
        id: DownloadId,
        candidates: Vec<MatchedRule>,
        final_rule: Option<MatchedRule>,
        conflict_set: Option<Vec<MatchedRule>>,
    },
    Closed { id: DownloadId, reason: CloseReason },
    Notice {
        id: Option<DownloadId>,
        level: NoticeLevel,
        message: String,
    },
}

impl UiEvent {
    pub fn download_id(&self) -> Option<DownloadId> {
        match self {
            Self::Capabilities { .. } => None,
            Self::Show(summary) => Some(summary.id),
            Self::PathUpdated { id, .. } | Self::RulesUpdated { id, .. } | Self::Closed { id, .. } => Some(*id),
            Self::Notice { id, .. } => *id,
        }
    }
}

/// Outcome of a best-effort publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Number of listeners that received the event
    Delivered(usize),
    NoListener,
}

/// The controller's view of the confirmation UI.
#[async_trait]
pub trait ConfirmationUi: Send + Sync {
    /// Push an event to every attached UI. Never blocks.
    fn publish(&self, event: UiEvent) -> Delivery;

    /// Live "is an editor visible" state. `None` if no UI answers.
    async fn editor_open(&self, id: DownloadId) -> Option<bool>;
}

/// In-process UI fan-out backed by a broadcast channel.
#[derive(Clone)]
pub struct UiHub {
    events: broadcast::Sender<UiEvent>,
    editors: Arc<Mutex<HashSet<DownloadId>>>,
}

impl UiHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(UI_CHANNEL_CAPACITY);
        Self {
            events,
            editors: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Record editor visibility. Called by the UI before it sends `Pause`/`Resume`.
    pub fn set_editor_visible(&self, id: DownloadId, visible: bool) {
        let mut editors = self.editors.lock().unwrap_or_else(PoisonError::into_inner);
        if visible {
            editors.insert(id);
        } else {
            editors.remove(&id);
        }
    }

    pub fn is_editor_visible(&self, id: DownloadId) -> bool {
        self.editors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

impl Default for UiHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationUi for UiHub {
    fn publish(&self, event: UiEvent) -> Delivery {
        if let UiEvent::Closed { id, .. } = &event {
            self.set_editor_visible(*id, false);
        }
        match self.events.send(event) {
            Ok(listeners) => Delivery::Delivered(listeners),
            Err(_) => Delivery::NoListener,
        }
    }

    async fn editor_open(&self, id: DownloadId) -> Option<bool> {
        if self.events.receiver_count() == 0 {
            return None;
        }
        Some(self.is_editor_visible(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_listener_is_not_an_error() {
        let hub = UiHub::new();
        let delivery = hub.publish(UiEvent::Closed {
            id: 1,
            reason: CloseReason::Cancelled,
        });
        assert_eq!(delivery, Delivery::NoListener);
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let hub = UiHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        let delivery = hub.publish(UiEvent::Notice {
            id: None,
            level: NoticeLevel::Info,
            message: "hello".to_string(),
        });

        assert_eq!(delivery, Delivery::Delivered(2));
        assert!(matches!(first.recv().await.unwrap(), UiEvent::Notice { .. }));
        assert!(matches!(second.recv().await.unwrap(), UiEvent::Notice { .. }));
    }

    #[tokio::test]
    async fn test_editor_state_query() {
        let hub = UiHub::new();
        assert_eq!(hub.editor_open(4).await, None);

        let _listener = hub.subscribe();
        assert_eq!(hub.editor_open(4).await, Some(false));
        hub.set_editor_visible(4, true);
        assert_eq!(hub.editor_open(4).await, Some(true));

        hub.publish(UiEvent::Closed {
            id: 4,
            reason: CloseReason::Confirmed,
        });
        assert_eq!(hub.editor_open(4).await, Some(false));
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: UiCommand =
            serde_json::from_str(r#"{"type":"change_location","id":9,"folder":"/tmp/x"}"#).unwrap();
        assert_eq!(
            cmd,
            UiCommand::ChangeLocation {
                id: 9,
                folder: "/tmp/x".to_string(),
                filename: None
            }
        );
        assert_eq!(cmd.download_id(), 9);
    }
}
