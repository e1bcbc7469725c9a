// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application config (`~/.dlrouter/config.json`).
//!
//! Routing settings (countdown, default folder, conflict policy) live in the
//! rule store. This file only says where things are on this machine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::download::{ControllerConfig, DEFAULT_EDITOR_QUERY_TIMEOUT};
use crate::types::DEFAULT_FOLDER;

/// Directory under the home directory holding config and store.
pub const CONFIG_DIR_NAME: &str = ".dlrouter";

/// Default tracing filter when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info";

fn default_editor_query_timeout_ms() -> u64 {
    DEFAULT_EDITOR_QUERY_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Rule store file (default: `~/.dlrouter/store.json`)
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// The browser's download root (default: the platform download folder)
    #[serde(default)]
    pub download_root: Option<PathBuf>,
    /// tracing-subscriber filter, e.g. `dlrouter=debug`
    #[serde(default)]
    pub log_filter: Option<String>,
    /// How long a timer fire waits for the UI's editor state
    #[serde(default = "default_editor_query_timeout_ms")]
    pub editor_query_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            download_root: None,
            log_filter: None,
            editor_query_timeout_ms: default_editor_query_timeout_ms(),
        }
    }
}

impl AppConfig {
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_dir()?.join("store.json")),
        }
    }

    pub fn download_root(&self) -> PathBuf {
        self.download_root
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FOLDER))
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            download_root: self.download_root(),
            editor_query_timeout: Duration::from_millis(self.editor_query_timeout_ms),
        }
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let config_dir = home.join(CONFIG_DIR_NAME);
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;
    }
    Ok(config_dir)
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

/// Load the config from the default location.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_file_path()?)
}

/// Load a config file, falling back to defaults when it does not exist.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid config file {:?}", path))
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &config_file_path()?)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))?;
    Ok(())
}
