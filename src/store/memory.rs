// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory rule store.

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::{broadcast, RwLock};

use super::{RuleStore, StoreChange, StoreData, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;
use crate::rules;
use crate::types::{Group, Rule, Settings};

/// Rule store that lives only as long as the process.
pub struct MemoryStore {
    data: RwLock<StoreData>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_data(StoreData::default())
    }

    pub fn with_data(data: StoreData) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: RwLock::new(data),
            changes,
        }
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with_data(StoreData {
            settings,
            ..StoreData::default()
        })
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self.data.read().await.rules.clone())
    }

    async fn set_rules(&self, new_rules: Vec<Rule>) -> Result<(), StoreError> {
        self.data.write().await.rules = rules::dedupe_rules(new_rules);
        self.notify(StoreChange::Rules);
        Ok(())
    }

    async fn get_groups(&self) -> Result<IndexMap<String, Group>, StoreError> {
        Ok(self.data.read().await.groups.clone())
    }

    async fn set_groups(&self, groups: IndexMap<String, Group>) -> Result<(), StoreError> {
        self.data.write().await.groups = groups;
        self.notify(StoreChange::Groups);
        Ok(())
    }

    async fn get_settings(&self) -> Result<Settings, StoreError> {
        Ok(self.data.read().await.settings.clone())
    }

    async fn set_settings(&self, settings: Settings) -> Result<(), StoreError> {
        self.data.write().await.settings = settings;
        self.notify(StoreChange::Settings);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_same_rule_twice_keeps_second_folder() {
        let store = MemoryStore::new();
        store.add_rule(Rule::domain("github.com", "Code")).await.unwrap();
        store.add_rule(Rule::domain("github.com", "Repos")).await.unwrap();

        let rules = store.get_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].folder, "Repos");
    }

    #[tokio::test]
    async fn test_writes_notify_subscribers() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();

        store.add_group(Group::new("images", ["png"], "Pics")).await.unwrap();
        store.set_settings(Settings::default()).await.unwrap();

        assert_eq!(changes.recv().await.unwrap(), StoreChange::Groups);
        assert_eq!(changes.recv().await.unwrap(), StoreChange::Settings);
    }

    #[tokio::test]
    async fn test_removing_missing_rule_does_not_notify() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();

        let removed = store
            .remove_rule(crate::types::RuleKind::Domain, "nothing.com")
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(changes.try_recv().is_err());
    }
}
