// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for dlrouter, plus consistent formatting for the CLI.
//!
//! None of the routing errors are fatal to the controller: a malformed URL
//! means "no domain match", a failed move leaves the file where the browser
//! put it, and a command for an unknown download is a logged no-op.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::Phase;
use crate::types::DownloadId;

/// Issue tracker shown at the end of formatted CLI errors.
pub const ISSUES_URL: &str = "https://github.com/morganforge/dlrouter/issues";

/// Routing and lifecycle errors.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// A URL could not be parsed while extracting its domain
    #[error("could not extract a domain from '{url}': {reason}")]
    Match { url: String, reason: String },

    /// The native move/pick helper is missing or not answering
    #[error("native helper unavailable: {0}")]
    HelperUnavailable(String),

    /// Moving a finished download to its destination failed
    #[error("failed to move {source_path} to {destination}: {reason}")]
    MoveFailure {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    /// A command arrived for a download that is not (or no longer) pending
    #[error("no pending download with id {0}")]
    StaleReference(DownloadId),

    /// The UI reported an open editor when the confirmation timer fired
    #[error("editor open for download {0}, auto-confirm aborted")]
    TimerRace(DownloadId),

    #[error("download {id}: invalid transition {from} -> {to}")]
    InvalidTransition { id: DownloadId, from: Phase, to: Phase },

    #[error("download {0} is already being routed")]
    Duplicate(DownloadId),

    #[error("routing controller has stopped")]
    ControllerStopped,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Rule store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failures reported by the native helper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HelperError {
    #[error("helper not available: {0}")]
    Unavailable(String),

    #[error("helper call failed: {0}")]
    Failed(String),
}

/// Failures reported by the browser's download API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrowserError {
    /// The download already finished or was never started
    #[error("download is not in progress")]
    NotInProgress,

    #[error("browser download API error: {0}")]
    Api(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, RoutingError>;

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use dlrouter::error::format_error;
///
/// let error = format_error(
///     "Failed to load the rule store",
///     &["Store file was edited by hand"],
///     &["Check the file: dlrouter rules list"],
/// );
/// println!("{}", error);
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", ISSUES_URL));

    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1", "Cause 2"], &["Fix 1", "Fix 2"]);

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.contains(ISSUES_URL));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_error_builder_display() {
        let builder = ErrorBuilder::new("Display test").cause("Cause").fix("Fix");
        let error = format!("{}", builder);
        assert!(error.contains("[✗] Display test"));
        assert!(error.contains("Cause"));
    }

    #[test]
    fn test_move_failure_mentions_both_paths() {
        let error = RoutingError::MoveFailure {
            source_path: PathBuf::from("/dl/model.bin"),
            destination: PathBuf::from("/home/u/Models/model.bin"),
            reason: "permission denied".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/dl/model.bin"));
        assert!(message.contains("/home/u/Models/model.bin"));
        assert!(message.contains("permission denied"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let error = RoutingError::InvalidTransition {
            id: 3,
            from: Phase::Done,
            to: Phase::Confirmed,
        };
        assert_eq!(error.to_string(), "download 3: invalid transition Done -> Confirmed");
    }
}
