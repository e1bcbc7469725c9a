// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON file rule store.
//!
//! Every write re-reads the file under an exclusive lock on a sibling `.lock`
//! file, applies the change to what is on disk and replaces the file with a
//! temp file + atomic rename. Reads check the file stamp first, so edits made
//! by another dlrouter process (for example `dlrouter rules add` while
//! `dlrouter watch` runs) are picked up and published as [`StoreChange`]s.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use indexmap::IndexMap;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::{RuleStore, StoreChange, StoreData, CHANGE_CHANNEL_CAPACITY};
use crate::error::StoreError;
use crate::rules;
use crate::types::{Group, Rule, RuleKind, Settings};

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Modification time and length of the store file as last read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let metadata = fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: metadata.modified().ok()?,
        len: metadata.len(),
    })
}

#[derive(Debug)]
struct Cached {
    data: StoreData,
    stamp: Option<FileStamp>,
}

/// Sections that differ between two versions of the store.
fn changed_sections(old: &StoreData, new: &StoreData) -> Vec<StoreChange> {
    let mut changed = Vec::new();
    if old.rules != new.rules {
        changed.push(StoreChange::Rules);
    }
    if old.groups != new.groups {
        changed.push(StoreChange::Groups);
    }
    if old.settings != new.settings {
        changed.push(StoreChange::Settings);
    }
    changed
}

/// Rule store persisted as pretty-printed JSON.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<Cached>,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let (data, stamp) = load(&path, LOCK_TIMEOUT)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        tracing::debug!(path = %path.display(), rules = data.rules.len(), groups = data.groups.len(), "Opened rule store");
        Ok(Self {
            path,
            cache: Mutex::new(Cached { data, stamp }),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if another process replaced it since the last read
    /// or write, and publish a change for every section that differs.
    pub async fn refresh(&self) -> Result<Vec<StoreChange>, StoreError> {
        let mut guard = self.cache.lock().await;
        if file_stamp(&self.path) == guard.stamp {
            return Ok(Vec::new());
        }

        let path = self.path.clone();
        let (data, stamp) = tokio::task::spawn_blocking(move || load(&path, LOCK_TIMEOUT))
            .await
            .context("Store load task panicked")??;
        let changed = changed_sections(&guard.data, &data);
        *guard = Cached { data, stamp };
        drop(guard);

        if !changed.is_empty() {
            tracing::info!(path = %self.path.display(), ?changed, "Rule store changed on disk");
        }
        self.publish(&changed);
        Ok(changed)
    }

    /// Poll the file every `interval` so subscribers hear about external edits
    /// even when nobody reads from the store.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                if let Err(e) = store.refresh().await {
                    tracing::warn!(error = %e, "Failed to refresh rule store");
                }
            }
        })
    }

    async fn read<T>(&self, select: impl FnOnce(&StoreData) -> T) -> Result<T, StoreError> {
        self.refresh().await?;
        Ok(select(&self.cache.lock().await.data))
    }

    /// Apply a change to the current file contents and persist the result
    /// before publishing it.
    async fn write_with<F, R>(&self, apply: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut StoreData) -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut guard = self.cache.lock().await;
        let path = self.path.clone();
        let (data, stamp, result) = tokio::task::spawn_blocking(move || update(&path, apply, LOCK_TIMEOUT))
            .await
            .context("Store save task panicked")??;

        let changed = changed_sections(&guard.data, &data);
        *guard = Cached { data, stamp };
        drop(guard);

        self.publish(&changed);
        Ok(result)
    }

    fn publish(&self, changed: &[StoreChange]) {
        for change in changed {
            let _ = self.changes.send(*change);
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

/// Acquire an exclusive lock with timeout.
fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
    }

    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {:?}", path))?;

    let start = Instant::now();
    loop {
        match FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => return Ok(lock_file),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    bail!(
                        "Timed out waiting for exclusive lock on {:?} after {:?}. \
                         Another dlrouter process may be writing the store.",
                        path,
                        timeout
                    );
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to acquire exclusive lock on {:?}", path));
            }
        }
    }
}

/// Acquire a shared lock with timeout.
fn acquire_shared_lock_with_timeout(file: &File, timeout: Duration) -> anyhow::Result<()> {
    let start = Instant::now();
    loop {
        match FileExt::try_lock_shared(file) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    bail!(
                        "Timed out waiting for shared lock after {:?}. \
                         Another dlrouter process may be writing the store.",
                        timeout
                    );
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e).with_context(|| "Failed to acquire shared lock on store file");
            }
        }
    }
}

fn load(path: &Path, timeout: Duration) -> Result<(StoreData, Option<FileStamp>), StoreError> {
    if !path.exists() {
        return Ok((StoreData::default(), None));
    }

    let lock_path = lock_path(path);
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;
    acquire_shared_lock_with_timeout(&lock_file, timeout)?;

    read_locked(path)
}

/// Read the store file. The caller holds a lock on the sibling lock file.
fn read_locked(path: &Path) -> Result<(StoreData, Option<FileStamp>), StoreError> {
    if !path.exists() {
        return Ok((StoreData::default(), None));
    }

    let stamp = file_stamp(path);
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read store file {:?}", path))?;
    let mut data: StoreData = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    data.rules = rules::dedupe_rules(std::mem::take(&mut data.rules));
    Ok((data, stamp))
}

/// Read-modify-write under one exclusive lock so concurrent writers never
/// drop each other's changes.
fn update<F, R>(path: &Path, apply: F, timeout: Duration) -> Result<(StoreData, Option<FileStamp>, R), StoreError>
where
    F: FnOnce(&mut StoreData) -> R,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let _lock_guard = acquire_exclusive_lock_with_timeout(&lock_path(path), timeout)?;

    let (mut data, _) = read_locked(path)?;
    let result = apply(&mut data);
    data.last_saved = Some(Utc::now());

    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(&data).context("Failed to serialize store to JSON")?;

    {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
        temp_file
            .write_all(content.as_bytes())
            .context("Failed to write to temp file")?;
        temp_file.sync_all().context("Failed to sync temp file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to store file: {:?} -> {:?}", temp_path, path))?;

    Ok((data, file_stamp(path), result))
}

#[async_trait]
impl RuleStore for JsonFileStore {
    async fn get_rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.read(|data| data.rules.clone()).await
    }

    async fn set_rules(&self, new_rules: Vec<Rule>) -> Result<(), StoreError> {
        let new_rules = rules::dedupe_rules(new_rules);
        self.write_with(move |data| data.rules = new_rules).await
    }

    async fn get_groups(&self) -> Result<IndexMap<String, Group>, StoreError> {
        self.read(|data| data.groups.clone()).await
    }

    async fn set_groups(&self, groups: IndexMap<String, Group>) -> Result<(), StoreError> {
        self.write_with(move |data| data.groups = groups).await
    }

    async fn get_settings(&self) -> Result<Settings, StoreError> {
        self.read(|data| data.settings.clone()).await
    }

    async fn set_settings(&self, settings: Settings) -> Result<(), StoreError> {
        self.write_with(move |data| data.settings = settings).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    async fn add_rule(&self, rule: Rule) -> Result<Option<Rule>, StoreError> {
        self.write_with(move |data| rules::upsert_rule(&mut data.rules, rule)).await
    }

    async fn remove_rule(&self, kind: RuleKind, value: &str) -> Result<Option<Rule>, StoreError> {
        let value = value.to_string();
        self.write_with(move |data| rules::remove_rule(&mut data.rules, kind, &value)).await
    }

    async fn add_group(&self, group: Group) -> Result<Option<Group>, StoreError> {
        self.write_with(move |data| rules::upsert_group(&mut data.groups, group)).await
    }

    async fn remove_group(&self, name: &str) -> Result<Option<Group>, StoreError> {
        let name = name.to_string();
        self.write_with(move |data| rules::remove_group(&mut data.groups, &name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConflictPolicy;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();
        assert!(store.get_rules().await.unwrap().is_empty());
        assert_eq!(store.get_settings().await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("store.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.add_rule(Rule::domain("github.com", "Code")).await.unwrap();
            store.add_group(Group::new("images", ["png"], "Pics")).await.unwrap();
            let mut settings = Settings::default();
            settings.conflict_policy = ConflictPolicy::Ask;
            store.set_settings(settings).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_rules().await.unwrap().len(), 1);
        assert!(reopened.get_groups().await.unwrap().contains_key("images"));
        assert_eq!(reopened.get_settings().await.unwrap().conflict_policy, ConflictPolicy::Ask);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();

        let result = JsonFileStore::open(&path);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_two_stores_on_one_file_keep_both_writes() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("store.json");
        let cli = JsonFileStore::open(&path).unwrap();
        let watcher = JsonFileStore::open(&path).unwrap();

        cli.add_rule(Rule::domain("github.com", "Code")).await.unwrap();
        watcher.add_rule(Rule::domain("example.com", "Example")).await.unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let values: Vec<String> = reopened
            .get_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|rule| rule.value)
            .collect();
        assert_eq!(values, vec!["github.com", "example.com"]);
        assert_eq!(cli.get_rules().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_external_edit_is_published() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("store.json");
        let cli = JsonFileStore::open(&path).unwrap();
        let watcher = JsonFileStore::open(&path).unwrap();
        let mut changes = watcher.subscribe();

        assert!(watcher.refresh().await.unwrap().is_empty());

        cli.add_rule(Rule::domain("github.com", "Code")).await.unwrap();
        assert_eq!(watcher.refresh().await.unwrap(), vec![StoreChange::Rules]);
        assert_eq!(changes.try_recv().unwrap(), StoreChange::Rules);
        assert_eq!(watcher.get_rules().await.unwrap()[0].folder, "Code");

        // Nothing new on disk, nothing published
        assert!(watcher.refresh().await.unwrap().is_empty());
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_removing_missing_rule_publishes_nothing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();
        let mut changes = store.subscribe();

        let removed = store.remove_rule(RuleKind::Domain, "nowhere.org").await.unwrap();
        assert!(removed.is_none());
        assert!(changes.try_recv().is_err());

        store.add_rule(Rule::domain("github.com", "Code")).await.unwrap();
        assert_eq!(changes.try_recv().unwrap(), StoreChange::Rules);
    }

    #[test]
    fn test_lock_acquisition_exclusive() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let lock = dir.path().join("store.lock");

        let first = acquire_exclusive_lock_with_timeout(&lock, Duration::from_secs(1));
        assert!(first.is_ok(), "First exclusive lock should succeed");

        let second = acquire_exclusive_lock_with_timeout(&lock, Duration::from_millis(100));
        assert!(second.is_err(), "Second exclusive lock should fail while first is held");

        drop(first);
        let third = acquire_exclusive_lock_with_timeout(&lock, Duration::from_secs(1));
        assert!(third.is_ok(), "Lock should succeed after previous lock released");
    }
}
