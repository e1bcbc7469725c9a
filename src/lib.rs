// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! dlrouter - browser download routing library
//!
//! Every download the browser starts is matched against user rules, the
//! winning folder is turned into a browser-safe path, and the user gets a
//! short confirmation window to change it before it is committed. Folders
//! outside the browser's download root are reached by moving the file once
//! the browser is done.
//!
//! **Matcher** -> **Resolver** -> **Path Resolver** -> **Lifecycle Controller** -> **Mover**
//!
//! # Core Modules
//!
//! - [`matcher`] - Which rules and file-type groups claim a download
//! - [`resolver`] - Priority ranking, tolerance ties, conflict policy
//! - [`paths`] - Sanitized relative paths and absolute destinations
//! - [`download`] - Lifecycle controller, confirmation timer, rule-change reactor, mover
//! - [`store`] - Rule/group/settings persistence with change notifications
//! - [`bridge`] - Browser, confirmation UI and native helper boundaries
//! - [`config`] - Machine-local application config
//! - [`error`] - Error taxonomy and consistent CLI error formatting

pub mod bridge;
pub mod config;
pub mod download;
pub mod error;
pub mod matcher;
pub mod paths;
pub mod planner;
pub mod resolver;
pub mod rules;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use types::{
    ConflictPolicy, DownloadId, DownloadInfo, Group, MatchSource, MatchedRule, Rule, RuleKind, Settings,
};

pub use error::{Result, RoutingError};

pub use download::{Collaborators, Controller, ControllerConfig, ControllerHandle, PendingView, Phase};
pub use planner::{plan_route, RoutePlan};
pub use resolver::{Decision, Resolution};
pub use rules::RuleSet;
pub use store::{JsonFileStore, MemoryStore, RuleStore, StoreChange};
