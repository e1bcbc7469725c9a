// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Native move/pick helper.
//!
//! The browser can only write under its own download root, so anything
//! outside it goes through a helper that can touch the real filesystem.
//! [`LocalHelper`] is the in-process implementation used by the CLI;
//! [`NoHelper`] stands in when none is installed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::HelperError;

/// Upper bound on `name (n).ext` attempts before giving up.
const MAX_UNIQUIFY_ATTEMPTS: u32 = 10_000;

/// Result of `check_available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HelperStatus {
    Available { version: String },
    NotInstalled,
    Unresponsive,
}

impl HelperStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Result of a successful move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub moved: bool,
    /// Where the file ended up, after any collision renaming
    pub final_path: PathBuf,
}

#[async_trait]
pub trait NativeHelper: Send + Sync {
    async fn check_available(&self) -> HelperStatus;

    /// Interactive folder picker. `None` when the user dismissed it.
    async fn pick_folder(&self, start: Option<&Path>) -> Result<Option<PathBuf>, HelperError>;

    /// Move `source` to the full path `destination`.
    async fn move_file(&self, source: &Path, destination: &Path) -> Result<MoveOutcome, HelperError>;

    async fn verify_folder_exists(&self, path: &Path) -> Result<bool, HelperError>;

    /// Interactive Save-As dialog. `None` when the user dismissed it.
    async fn show_save_as_dialog(
        &self,
        suggested_name: &str,
        default_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>, HelperError>;
}

/// Placeholder used when no helper is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHelper;

#[async_trait]
impl NativeHelper for NoHelper {
    async fn check_available(&self) -> HelperStatus {
        HelperStatus::NotInstalled
    }

    async fn pick_folder(&self, _start: Option<&Path>) -> Result<Option<PathBuf>, HelperError> {
        Err(HelperError::Unavailable("no native helper installed".to_string()))
    }

    async fn move_file(&self, _source: &Path, _destination: &Path) -> Result<MoveOutcome, HelperError> {
        Err(HelperError::Unavailable("no native helper installed".to_string()))
    }

    async fn verify_folder_exists(&self, _path: &Path) -> Result<bool, HelperError> {
        Err(HelperError::Unavailable("no native helper installed".to_string()))
    }

    async fn show_save_as_dialog(
        &self,
        _suggested_name: &str,
        _default_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>, HelperError> {
        Err(HelperError::Unavailable("no native helper installed".to_string()))
    }
}

/// In-process helper built on `tokio::fs`.
///
/// Moves use `rename` and fall back to copy + remove when source and
/// destination sit on different devices. Pickers are non-interactive.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHelper;

impl LocalHelper {
    pub fn new() -> Self {
        Self
    }
}

/// First free path among `name.ext`, `name (1).ext`, `name (2).ext`, ...
async fn unique_destination(destination: &Path) -> Result<PathBuf, HelperError> {
    if !path_exists(destination).await {
        return Ok(destination.to_path_buf());
    }

    let parent = destination.parent().unwrap_or_else(|| Path::new(""));
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = destination.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1..=MAX_UNIQUIFY_ATTEMPTS {
        let name = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(name);
        if !path_exists(&candidate).await {
            return Ok(candidate);
        }
    }

    Err(HelperError::Failed(format!(
        "no free filename for {}",
        destination.display()
    )))
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn io_failure(action: &str, path: &Path, e: std::io::Error) -> HelperError {
    HelperError::Failed(format!("{} {}: {}", action, path.display(), e))
}

#[async_trait]
impl NativeHelper for LocalHelper {
    async fn check_available(&self) -> HelperStatus {
        HelperStatus::Available {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn pick_folder(&self, _start: Option<&Path>) -> Result<Option<PathBuf>, HelperError> {
        Ok(None)
    }

    async fn move_file(&self, source: &Path, destination: &Path) -> Result<MoveOutcome, HelperError> {
        if !path_exists(source).await {
            return Err(HelperError::Failed(format!(
                "source file {} does not exist",
                source.display()
            )));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("cannot create", parent, e))?;
        }

        let target = unique_destination(destination).await?;

        if let Err(e) = tokio::fs::rename(source, &target).await {
            // Typically a cross-device move
            tracing::debug!(source = %source.display(), error = %e, "Rename failed, copying instead");
            tokio::fs::copy(source, &target)
                .await
                .map_err(|e| io_failure("cannot copy to", &target, e))?;
            tokio::fs::remove_file(source)
                .await
                .map_err(|e| io_failure("cannot remove", source, e))?;
        }

        Ok(MoveOutcome {
            moved: true,
            final_path: target,
        })
    }

    async fn verify_folder_exists(&self, path: &Path) -> Result<bool, HelperError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_failure("cannot inspect", path, e)),
        }
    }

    async fn show_save_as_dialog(
        &self,
        _suggested_name: &str,
        _default_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>, HelperError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_creates_missing_folders() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("model.bin");
        std::fs::write(&source, b"weights").unwrap();
        let destination = dir.path().join("Models").join("llm").join("model.bin");

        let outcome = LocalHelper.move_file(&source, &destination).await.unwrap();

        assert!(outcome.moved);
        assert_eq!(outcome.final_path, destination);
        assert!(!source.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"weights");
    }

    #[tokio::test]
    async fn test_move_uniquifies_on_collision() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"new").unwrap();
        let target_dir = dir.path().join("out");
        std::fs::create_dir_all(&target_dir).unwrap();
        std::fs::write(target_dir.join("a.txt"), b"old").unwrap();
        std::fs::write(target_dir.join("a (1).txt"), b"older").unwrap();

        let outcome = LocalHelper.move_file(&source, &target_dir.join("a.txt")).await.unwrap();

        assert_eq!(outcome.final_path, target_dir.join("a (2).txt"));
        assert_eq!(std::fs::read(target_dir.join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let result = LocalHelper
            .move_file(&dir.path().join("gone.zip"), &dir.path().join("x/gone.zip"))
            .await;
        assert!(matches!(result, Err(HelperError::Failed(_))));
    }

    #[tokio::test]
    async fn test_verify_folder_exists() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();

        assert!(LocalHelper.verify_folder_exists(dir.path()).await.unwrap());
        assert!(!LocalHelper.verify_folder_exists(&file).await.unwrap());
        assert!(!LocalHelper.verify_folder_exists(&dir.path().join("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_helper_reports_not_installed() {
        assert_eq!(NoHelper.check_available().await, HelperStatus::NotInstalled);
        assert!(!NoHelper.check_available().await.is_available());
        assert!(NoHelper.pick_folder(None).await.is_err());
    }
}
