// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Browser download hook.
//!
//! The browser hands every new download to the controller together with a
//! one-shot "suggest" callback. The controller answers through that callback
//! once the destination is confirmed. If the browser stops waiting (the
//! receiving half is dropped) the suggestion can no longer be delivered and
//! the download is routed by a post-download move instead.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::BrowserError;
use crate::types::DownloadId;

/// What the browser does if the suggested path already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Append ` (n)` to the filename
    #[default]
    Uniquify,
}

/// Final filename handed back to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenameSuggestion {
    /// Path relative to the browser's download root
    pub relative_path: String,
    pub conflict_action: ConflictAction,
}

impl FilenameSuggestion {
    pub fn uniquify(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            conflict_action: ConflictAction::Uniquify,
        }
    }
}

/// The browser's "proceed with path X" callback for one download.
#[derive(Debug)]
pub struct SuggestResponder {
    inner: oneshot::Sender<FilenameSuggestion>,
}

impl SuggestResponder {
    /// Create a responder and the receiving end the browser side waits on.
    pub fn channel() -> (Self, oneshot::Receiver<FilenameSuggestion>) {
        let (inner, rx) = oneshot::channel();
        (Self { inner }, rx)
    }

    /// Deliver the suggestion. Gives it back if the browser stopped listening.
    pub fn suggest(self, suggestion: FilenameSuggestion) -> Result<(), FilenameSuggestion> {
        self.inner.send(suggestion)
    }

    /// True once the browser side has gone away.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// A download the browser wants a filename for.
#[derive(Debug)]
pub struct InterceptRequest {
    pub id: DownloadId,
    pub url: String,
    pub referrer: Option<String>,
    pub suggested_filename: String,
    /// `None` when the browser does not wait for a suggestion
    pub responder: Option<SuggestResponder>,
}

impl InterceptRequest {
    pub fn new(
        id: DownloadId,
        url: impl Into<String>,
        referrer: Option<String>,
        suggested_filename: impl Into<String>,
        responder: Option<SuggestResponder>,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            referrer,
            suggested_filename: suggested_filename.into(),
            responder,
        }
    }
}

/// How the browser finished a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Complete,
    Interrupted,
}

/// The browser's completion event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub id: DownloadId,
    pub state: FinalState,
    /// Full path the browser actually wrote, after its own renaming
    pub final_path: PathBuf,
}

/// Browser download API calls the controller makes.
#[async_trait]
pub trait DownloadHost: Send + Sync {
    /// Abort a download. `BrowserError::NotInProgress` if it already finished.
    async fn cancel(&self, id: DownloadId) -> Result<(), BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_delivers_suggestion() {
        let (responder, rx) = SuggestResponder::channel();
        responder.suggest(FilenameSuggestion::uniquify("Code/a.png")).unwrap();
        let suggestion = rx.await.unwrap();
        assert_eq!(suggestion.relative_path, "Code/a.png");
        assert_eq!(suggestion.conflict_action, ConflictAction::Uniquify);
    }

    #[test]
    fn test_responder_reports_gone_browser() {
        let (responder, rx) = SuggestResponder::channel();
        drop(rx);
        assert!(responder.is_closed());
        let returned = responder.suggest(FilenameSuggestion::uniquify("a.txt"));
        assert_eq!(returned.unwrap_err().relative_path, "a.txt");
    }
}
