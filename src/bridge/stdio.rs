// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-lines bridge for a browser extension talking over stdio.
//!
//! Each input line is one [`Inbound`] message, each output line one
//! [`Outbound`] message. Malformed lines are answered with an `error`
//! message and otherwise ignored.
//!
//! ```text
//! → {"type":"intercept","id":1,"url":"https://github.com/x","filename":"a.png"}
//! ← {"type":"ui","event":{"type":"show",...}}
//! → {"type":"ui","command":{"type":"confirm_now","id":1}}
//! ← {"type":"suggest","id":1,"relative_path":"Code/a.png","conflict_action":"uniquify"}
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

use super::browser::{CompletionEvent, DownloadHost, FilenameSuggestion, FinalState, InterceptRequest, SuggestResponder};
use super::ui::{UiCommand, UiEvent, UiHub};
use crate::download::ControllerHandle;
use crate::error::BrowserError;
use crate::types::DownloadId;

/// Messages read from the extension.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Intercept {
        id: DownloadId,
        url: String,
        #[serde(default)]
        referrer: Option<String>,
        filename: String,
    },
    Completed {
        id: DownloadId,
        state: FinalState,
        final_path: PathBuf,
    },
    Ui { command: UiCommand },
    /// An editor panel opened or closed
    Editor { id: DownloadId, open: bool },
}

/// Messages written to the extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Suggest {
        id: DownloadId,
        #[serde(flatten)]
        suggestion: FilenameSuggestion,
    },
    Cancel { id: DownloadId },
    Ui { event: UiEvent },
    Error { message: String },
}

/// Browser host that forwards cancel requests as `cancel` lines.
#[derive(Debug, Clone)]
pub struct StdioHost {
    out: mpsc::UnboundedSender<Outbound>,
}

impl StdioHost {
    pub fn new(out: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { out }
    }
}

#[async_trait]
impl DownloadHost for StdioHost {
    async fn cancel(&self, id: DownloadId) -> std::result::Result<(), BrowserError> {
        self.out
            .send(Outbound::Cancel { id })
            .map_err(|_| BrowserError::Api("output closed".to_string()))
    }
}

/// Write every outbound message as one JSON line until all senders are gone.
pub async fn write_outbound<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message).context("Failed to serialize outbound message")?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await.context("Failed to write to stdout")?;
        writer.flush().await.context("Failed to flush stdout")?;
    }
    Ok(())
}

/// Read inbound lines until EOF and feed them to the controller.
pub async fn serve<R>(
    reader: R,
    handle: &ControllerHandle,
    hub: &UiHub,
    out: mpsc::UnboundedSender<Outbound>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let forwarder = tokio::spawn(forward_ui_events(hub.subscribe(), out.clone()));

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<Inbound>(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed bridge message");
                let _ = out.send(Outbound::Error {
                    message: format!("malformed message: {}", e),
                });
                continue;
            }
        };
        if let Err(e) = dispatch(message, handle, hub, &out) {
            let _ = out.send(Outbound::Error { message: e.to_string() });
            break;
        }
    }

    forwarder.abort();
    Ok(())
}

fn dispatch(
    message: Inbound,
    handle: &ControllerHandle,
    hub: &UiHub,
    out: &mpsc::UnboundedSender<Outbound>,
) -> crate::error::Result<()> {
    match message {
        Inbound::Intercept {
            id,
            url,
            referrer,
            filename,
        } => {
            let (responder, suggestion) = SuggestResponder::channel();
            let out = out.clone();
            tokio::spawn(async move {
                // Dropped without a suggestion when the download was cancelled
                if let Ok(suggestion) = suggestion.await {
                    let _ = out.send(Outbound::Suggest { id, suggestion });
                }
            });
            handle.intercept(InterceptRequest::new(id, url, referrer, filename, Some(responder)))
        }
        Inbound::Completed { id, state, final_path } => {
            handle.completed(CompletionEvent { id, state, final_path })
        }
        Inbound::Ui { command } => handle.command(command),
        Inbound::Editor { id, open } => {
            hub.set_editor_visible(id, open);
            if open {
                handle.command(UiCommand::Pause { id })
            } else {
                handle.command(UiCommand::Resume { id })
            }
        }
    }
}

async fn forward_ui_events(mut events: broadcast::Receiver<UiEvent>, out: mpsc::UnboundedSender<Outbound>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if out.send(Outbound::Ui { event }).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "UI bridge fell behind, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
