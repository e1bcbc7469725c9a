// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download Lifecycle for dlrouter
//!
//! Every intercepted browser download becomes a [`PendingDownload`] owned by
//! the [`Controller`] worker until it is routed or cancelled.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  events   ┌─────────────────┐
//! │ ControllerHandle│──────────▶│ Controller      │
//! │ (browser, UI)   │           │ worker (tokio)  │
//! └─────────────────┘           └────────┬────────┘
//!                                        │ owns
//!          ┌──────────────┬──────────────┼──────────────┐
//!          ▼              ▼              ▼              ▼
//!   PendingRegistry  Confirmation    Reactor        Mover
//!                    Timer           (store sub)    (helper)
//! ```
//!
//! Phases: `Determining → AwaitingConfirmation ⇄ Paused → Confirmed →
//! Completed → [Moving] → Done`, with `Cancelled` reachable from every
//! live phase.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dlrouter::bridge::{InterceptRequest, LocalHelper, SuggestResponder, UiHub};
//! use dlrouter::download::{Collaborators, Controller, ControllerConfig};
//! use dlrouter::store::MemoryStore;
//! # use dlrouter::bridge::DownloadHost;
//! # use dlrouter::error::BrowserError;
//! # struct Browser;
//! # #[async_trait::async_trait]
//! # impl DownloadHost for Browser {
//! #     async fn cancel(&self, _id: u64) -> Result<(), BrowserError> { Ok(()) }
//! # }
//!
//! # async fn example() -> dlrouter::error::Result<()> {
//! let handle = Controller::start(
//!     Collaborators {
//!         store: Arc::new(MemoryStore::new()),
//!         ui: Arc::new(UiHub::new()),
//!         host: Arc::new(Browser),
//!         helper: Arc::new(LocalHelper::new()),
//!     },
//!     ControllerConfig::default(),
//! )
//! .await?;
//!
//! let (responder, suggestion) = SuggestResponder::channel();
//! handle.intercept(InterceptRequest::new(1, "https://github.com/x", None, "a.png", Some(responder)))?;
//! let suggestion = suggestion.await;
//! # Ok(())
//! # }
//! ```

pub mod controller;
mod mover;
mod reactor;
pub mod registry;
pub mod timer;
pub mod types;

pub use controller::{Collaborators, Controller, ControllerConfig, ControllerHandle, DEFAULT_EDITOR_QUERY_TIMEOUT};
pub use registry::PendingRegistry;
pub use timer::ConfirmationTimer;
pub use types::{PendingDownload, PendingView, Phase, PostMove};
