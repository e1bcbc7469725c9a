// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Controller-owned map of pending downloads.

use std::collections::HashMap;

use super::types::PendingDownload;
use crate::error::{Result, RoutingError};
use crate::types::DownloadId;

/// At most one record per download id; records leave only through `evict`.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: HashMap<DownloadId, PendingDownload>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: PendingDownload) -> Result<()> {
        let id = record.id();
        if self.entries.contains_key(&id) {
            return Err(RoutingError::Duplicate(id));
        }
        self.entries.insert(id, record);
        Ok(())
    }

    pub fn contains(&self, id: DownloadId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: DownloadId) -> Result<&PendingDownload> {
        self.entries.get(&id).ok_or(RoutingError::StaleReference(id))
    }

    pub fn get_mut(&mut self, id: DownloadId) -> Result<&mut PendingDownload> {
        self.entries.get_mut(&id).ok_or(RoutingError::StaleReference(id))
    }

    /// Remove a record. Dropping it disarms its timer.
    pub fn evict(&mut self, id: DownloadId) -> Option<PendingDownload> {
        let record = self.entries.remove(&id);
        if record.is_some() {
            tracing::debug!(id, remaining = self.entries.len(), "Evicted pending download");
        }
        record
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<DownloadId> {
        let mut ids: Vec<DownloadId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
