// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule Store - async persistence for rules, groups and settings.
//!
//! The controller only talks to the [`RuleStore`] trait. Every successful
//! write publishes a [`StoreChange`] to subscribers; the rule-change reactor
//! is the main consumer.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`] for tests and embedding
//! - [`JsonFileStore`] for the CLI, written atomically under a file lock

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::rules::{self, RuleSet};
use crate::types::{Group, Rule, RuleKind, Settings};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Capacity of the change notification channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Which part of the store was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreChange {
    Rules,
    Groups,
    Settings,
}

/// Everything the store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub groups: IndexMap<String, Group>,
    #[serde(default)]
    pub settings: Settings,
    /// When the data was last saved
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
    /// Version for future migrations
    #[serde(default = "StoreData::current_version")]
    pub version: u32,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            groups: IndexMap::new(),
            settings: Settings::default(),
            last_saved: None,
            version: Self::current_version(),
        }
    }
}

impl StoreData {
    fn current_version() -> u32 {
        1
    }
}

/// Async key-value persistence consumed by the controller.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_rules(&self) -> Result<Vec<Rule>, StoreError>;

    async fn set_rules(&self, rules: Vec<Rule>) -> Result<(), StoreError>;

    async fn get_groups(&self) -> Result<IndexMap<String, Group>, StoreError>;

    async fn set_groups(&self, groups: IndexMap<String, Group>) -> Result<(), StoreError>;

    async fn get_settings(&self) -> Result<Settings, StoreError>;

    async fn set_settings(&self, settings: Settings) -> Result<(), StoreError>;

    /// Receive a notification after every successful write.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    /// Rules and groups in one snapshot.
    async fn snapshot(&self) -> Result<RuleSet, StoreError> {
        Ok(RuleSet::new(self.get_rules().await?, self.get_groups().await?))
    }

    /// Add a rule, replacing the one with the same `(kind, value)`.
    async fn add_rule(&self, rule: Rule) -> Result<Option<Rule>, StoreError> {
        let mut current = self.get_rules().await?;
        let replaced = rules::upsert_rule(&mut current, rule);
        self.set_rules(current).await?;
        Ok(replaced)
    }

    async fn remove_rule(&self, kind: RuleKind, value: &str) -> Result<Option<Rule>, StoreError> {
        let mut current = self.get_rules().await?;
        let removed = rules::remove_rule(&mut current, kind, value);
        if removed.is_some() {
            self.set_rules(current).await?;
        }
        Ok(removed)
    }

    async fn add_group(&self, group: Group) -> Result<Option<Group>, StoreError> {
        let mut current = self.get_groups().await?;
        let replaced = rules::upsert_group(&mut current, group);
        self.set_groups(current).await?;
        Ok(replaced)
    }

    async fn remove_group(&self, name: &str) -> Result<Option<Group>, StoreError> {
        let mut current = self.get_groups().await?;
        let removed = rules::remove_group(&mut current, name);
        if removed.is_some() {
            self.set_groups(current).await?;
        }
        Ok(removed)
    }
}
