//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 刷新合并集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::{Duration, Utc};
use common::{row, setup_logging, Harness, ScriptedFetch};
use oxsync::{
    CachePolicy, MemoryStore, MergeStrategy, QueryDefinition, QueryRegistry, QuerySource,
    RefreshAction, RefreshCoordinator,
};
use std::sync::Arc;
use tokio::sync::Barrier;

const TASKS: usize = 16;

fn swr() -> CachePolicy {
    CachePolicy::StaleWhileRevalidate {
        stale_after: Duration::minutes(5),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_schedule_issues_one_fetch() {
    setup_logging();
    let harness = Arc::new(Harness::new(
        swr(),
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "a")], Utc::now())
            .with_delay(std::time::Duration::from_millis(100)),
    ));

    let barrier = Arc::new(Barrier::new(TASKS));
    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let harness = harness.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            harness
                .coordinator
                .schedule_refresh_if_needed(&harness.source)
                .await
        }));
    }

    let mut actions = Vec::with_capacity(TASKS);
    for handle in handles {
        actions.push(handle.await.unwrap().unwrap());
    }
    let snapshot = harness.settle().await;

    // 只有一个调用方发起了后台刷新，其余看到刷新进行中而跳过
    let started = actions
        .iter()
        .filter(|a| **a == RefreshAction::Background)
        .count();
    assert_eq!(started, 1);
    assert_eq!(harness.fetch.calls(), 1);
    assert_eq!(harness.store.commit_count(), 1);
    assert_eq!(snapshot.refresh_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_awaiting_callers_share_outcome() {
    setup_logging();
    let harness = Arc::new(Harness::new(
        CachePolicy::NetworkFirst,
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "a"), row("2", "b")], Utc::now())
            .with_delay(std::time::Duration::from_millis(100)),
    ));

    let barrier = Arc::new(Barrier::new(TASKS));
    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let harness = harness.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            harness.coordinator.execute_refresh(&harness.source).await
        }));
    }

    let mut outcomes = Vec::with_capacity(TASKS);
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(harness.fetch.calls(), 1);
    assert_eq!(harness.store.commit_count(), 1);
    assert!(outcomes.iter().all(|o| o == &outcomes[0]));
    assert_eq!(outcomes[0].report.inserted, 2);
}

#[tokio::test]
async fn test_force_refresh_joins_in_flight_refresh() {
    setup_logging();
    let harness = Harness::new(
        swr(),
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "a")], Utc::now()),
    );
    harness.fetch.hold();

    let action = harness
        .coordinator
        .schedule_refresh_if_needed(&harness.source)
        .await
        .unwrap();
    assert_eq!(action, RefreshAction::Background);
    assert!(harness.snapshot().is_refreshing);

    let forced = {
        let coordinator = harness.coordinator.clone();
        let source = harness.source.clone();
        tokio::spawn(async move { coordinator.force_refresh(&source).await })
    };
    tokio::task::yield_now().await;
    harness.fetch.release();

    let outcome = forced.await.unwrap().unwrap();
    assert_eq!(outcome.report.inserted, 1);
    assert_eq!(harness.fetch.calls(), 1);
    assert_eq!(harness.snapshot().refresh_count, 1);
}

#[tokio::test]
async fn test_dropped_waiter_does_not_cancel_refresh() {
    setup_logging();
    let harness = Harness::new(
        CachePolicy::NetworkFirst,
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "a")], Utc::now()),
    );
    harness.fetch.hold();

    let waiter = {
        let coordinator = harness.coordinator.clone();
        let source = harness.source.clone();
        tokio::spawn(async move { coordinator.execute_refresh(&source).await })
    };
    while !harness.snapshot().is_refreshing {
        tokio::task::yield_now().await;
    }
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    harness.fetch.release();
    let snapshot = harness.settle().await;
    assert!(snapshot.last_synced_at.is_some());
    assert!(snapshot.last_error.is_none());
    assert_eq!(harness.read_pairs().await, vec![("1".into(), "a".into())]);
}

#[tokio::test]
async fn test_different_keys_refresh_in_parallel() {
    setup_logging();
    let registry = Arc::new(QueryRegistry::new());
    let alice = Arc::new(ScriptedFetch::new(vec![row("a1", "x")], Utc::now()));
    let bob = Arc::new(ScriptedFetch::new(vec![row("b1", "y")], Utc::now()));
    alice.hold();
    bob.hold();

    let mut sources = Vec::new();
    for (owner, fetch) in [("alice", alice.clone()), ("bob", bob.clone())] {
        let definition = QueryDefinition::new("todo").filter("owner", owner);
        let source = QuerySource::builder(owner, definition)
            .fetch(fetch)
            .policy(CachePolicy::NetworkFirst)
            .build()
            .unwrap();
        registry.register(source.clone());
        sources.push(source);
    }
    let coordinator = RefreshCoordinator::new(Arc::new(MemoryStore::new()), registry);
    let observer = coordinator.observer();

    let mut handles = Vec::new();
    for source in &sources {
        let coordinator = coordinator.clone();
        let source = source.clone();
        handles.push(tokio::spawn(async move {
            coordinator.execute_refresh(&source).await
        }));
    }
    while alice.calls() + bob.calls() < 2 {
        tokio::task::yield_now().await;
    }

    // 两个查询键同时处于刷新中，互不阻塞
    assert!(sources.iter().all(|s| observer.is_refreshing(s.key())));
    assert_eq!(alice.calls(), 1);
    assert_eq!(bob.calls(), 1);

    alice.release();
    bob.release();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(sources.iter().all(|s| !observer.is_refreshing(s.key())));
}
