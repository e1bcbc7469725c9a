// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed boundaries between the controller and the outside world.
//!
//! - [`browser`]: the download interception hook and completion events
//! - [`ui`]: the confirmation UI command/event protocol and [`UiHub`]
//! - [`helper`]: the native move/pick helper and [`LocalHelper`]
//! - [`stdio`]: JSON-lines transport for an extension host

pub mod browser;
pub mod helper;
pub mod stdio;
pub mod ui;

pub use browser::{
    CompletionEvent, ConflictAction, DownloadHost, FilenameSuggestion, FinalState, InterceptRequest,
    SuggestResponder,
};
pub use helper::{HelperStatus, LocalHelper, MoveOutcome, NativeHelper, NoHelper};
pub use stdio::{Inbound, Outbound, StdioHost};
pub use ui::{CloseReason, ConfirmationUi, Delivery, NoticeLevel, PendingSummary, UiCommand, UiEvent, UiHub};
