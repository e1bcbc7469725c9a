// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Race Detection Tests for dlrouter
//!
//! These tests hammer one controller from many tasks on a multi-threaded
//! runtime. They are designed to surface ordering bugs and data races when
//! run with ThreadSanitizer (TSAN).
//!
//! # Running with ThreadSanitizer
//!
//! ```bash
//! RUSTFLAGS="-Z sanitizer=thread" cargo +nightly test --target x86_64-unknown-linux-gnu --test race_detection_test
//! ```
//!
//! # Test Categories
//!
//! - Concurrent intercepts while rules change underneath
//! - Pause/resume storms against a single download
//! - Concurrent UI hub editor state

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use dlrouter::bridge::{
    CompletionEvent, DownloadHost, FinalState, InterceptRequest, NoHelper, SuggestResponder, UiCommand, UiHub,
};
use dlrouter::error::BrowserError;
use dlrouter::{
    Collaborators, Controller, ControllerConfig, ControllerHandle, DownloadId, MemoryStore, Phase, Rule, RuleStore,
};

// Test configuration
const CONCURRENCY_LEVEL: usize = 50;
const ITERATIONS_PER_TASK: usize = 50;
const TEST_TIMEOUT_SECS: u64 = 30;

/// Browser fake counting cancel calls
#[derive(Default)]
struct CountingHost {
    cancels: AtomicU64,
}

#[async_trait]
impl DownloadHost for CountingHost {
    async fn cancel(&self, _id: DownloadId) -> Result<(), BrowserError> {
        self.cancels.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

async fn start(store: Arc<MemoryStore>, host: Arc<CountingHost>, hub: UiHub) -> ControllerHandle {
    Controller::start(
        Collaborators {
            store,
            ui: Arc::new(hub),
            host,
            helper: Arc::new(NoHelper),
        },
        ControllerConfig {
            download_root: PathBuf::from("/dl"),
            ..ControllerConfig::default()
        },
    )
    .await
    .expect("controller starts")
}

async fn wait_until_idle(handle: &ControllerHandle) {
    loop {
        if handle.pending_ids().await.unwrap().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// INTERCEPTS UNDER RULE CHURN
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_intercepts_during_rule_changes() {
    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(CountingHost::default());
    let handle = start(store.clone(), host.clone(), UiHub::new()).await;
    let mut handles = vec![];

    for i in 0..CONCURRENCY_LEVEL {
        let handle = handle.clone();
        handles.push(tokio::spawn(async move {
            let id = i as DownloadId;
            let (responder, suggestion) = SuggestResponder::channel();
            handle
                .intercept(InterceptRequest::new(
                    id,
                    format!("https://site{}.example/file", i % 5),
                    None,
                    format!("file-{}.bin", i),
                    Some(responder),
                ))
                .unwrap();
            handle.command(UiCommand::ConfirmNow { id }).unwrap();

            let suggestion = suggestion.await.expect("every download gets one suggestion");
            assert!(suggestion.relative_path.ends_with(&format!("file-{}.bin", i)));

            handle
                .completed(CompletionEvent {
                    id,
                    state: FinalState::Complete,
                    final_path: PathBuf::from(format!("/dl/{}", suggestion.relative_path)),
                })
                .unwrap();
        }));
    }

    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let rule = Rule::domain(format!("site{}.example", i % 5), format!("Site{}", i));
            store.add_rule(rule).await.unwrap();
        }));
    }

    let result = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        for task in handles {
            task.await.expect("Task panicked");
        }
        wait_until_idle(&handle).await;
    })
    .await;

    assert!(result.is_ok(), "Test timed out");
    assert_eq!(host.cancels.load(Ordering::Relaxed), 0);
    assert_eq!(store.get_rules().await.unwrap().len(), 5);
}

// =============================================================================
// PAUSE / RESUME STORMS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_resume_storm_confirms_once() {
    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(CountingHost::default());
    let handle = start(store, host, UiHub::new()).await;

    let (responder, suggestion) = SuggestResponder::channel();
    handle
        .intercept(InterceptRequest::new(1, "https://example.org/a", None, "a.zip", Some(responder)))
        .unwrap();

    let mut handles = vec![];
    for i in 0..10 {
        let handle = handle.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..ITERATIONS_PER_TASK {
                let command = if (i + j) % 2 == 0 {
                    UiCommand::Pause { id: 1 }
                } else {
                    UiCommand::Resume { id: 1 }
                };
                handle.command(command).unwrap();
            }
        }));
    }

    let result = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        for task in handles {
            task.await.expect("Task panicked");
        }
    })
    .await;
    assert!(result.is_ok(), "Test timed out");

    let view = handle.snapshot(1).await.unwrap().expect("still pending");
    match view.phase {
        Phase::Paused => assert!(!view.timer_armed),
        Phase::AwaitingConfirmation => assert!(view.timer_armed),
        other => panic!("unexpected phase {}", other),
    }

    handle.command(UiCommand::ConfirmNow { id: 1 }).unwrap();
    handle.command(UiCommand::ConfirmNow { id: 1 }).unwrap();
    let suggestion = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), suggestion)
        .await
        .expect("Test timed out")
        .expect("suggestion delivered");
    assert_eq!(suggestion.relative_path, "a.zip");

    let view = handle.snapshot(1).await.unwrap().unwrap();
    assert_eq!(view.phase, Phase::Confirmed);
    assert!(!view.timer_armed);
}

// =============================================================================
// UI HUB EDITOR STATE
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hub_editor_state_concurrent_updates() {
    let hub = UiHub::new();
    let mut handles = vec![];

    for i in 0..CONCURRENCY_LEVEL {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move {
            let id = i as DownloadId;
            for j in 0..ITERATIONS_PER_TASK {
                hub.set_editor_visible(id, j % 2 == 0);
            }
            hub.set_editor_visible(id, true);
        }));
    }

    let result = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        for task in handles {
            task.await.expect("Task panicked");
        }
    })
    .await;
    assert!(result.is_ok(), "Test timed out");

    for i in 0..CONCURRENCY_LEVEL {
        assert!(hub.is_editor_visible(i as DownloadId));
    }
}
