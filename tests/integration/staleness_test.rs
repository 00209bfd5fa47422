//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 过期检测与后台刷新的端到端测试

#[path = "../common/mod.rs"]
mod common;

use chrono::Duration;
use common::{row, setup_logging, wait_idle, Harness, ScriptedFetch};
use oxsync::{CachePolicy, MergeStrategy, RefreshAction};

fn swr() -> CachePolicy {
    CachePolicy::StaleWhileRevalidate {
        stale_after: Duration::minutes(5),
    }
}

#[tokio::test]
async fn test_stale_data_triggers_background_refresh() {
    setup_logging();
    let harness = Harness::new(
        swr(),
        MergeStrategy::Upsert,
        ScriptedFetch::new(Vec::new(), chrono::Utc::now()),
    );
    let now = harness.now();
    let key = harness.source.key();
    let observer = harness.coordinator.observer();

    // 上次同步在十分钟前
    harness
        .fetch
        .respond(vec![row("1", "old")], now - Duration::minutes(10));
    harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap();
    assert!(observer.is_stale(key, harness.source.policy()));

    let mut rx = observer.subscribe(key);
    rx.borrow_and_update();
    harness.fetch.respond(vec![row("1", "new")], now);
    harness.fetch.hold();

    let action = harness
        .coordinator
        .schedule_refresh_if_needed(&harness.source)
        .await
        .unwrap();
    assert_eq!(action, RefreshAction::Background);

    // true -> false
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_refreshing);
    assert!(observer.is_refreshing(key));

    harness.fetch.release();
    let snapshot = wait_idle(&mut rx).await;
    assert!(!snapshot.is_refreshing);
    assert_eq!(snapshot.last_synced_at, Some(now));
    assert_eq!(observer.last_synced_at(key), Some(now));
    assert!(!observer.is_stale(key, harness.source.policy()));
}

#[tokio::test]
async fn test_read_during_background_refresh_returns_previous_data() {
    setup_logging();
    let harness = Harness::new(
        swr(),
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "new")], chrono::Utc::now()),
    );
    harness
        .store
        .seed("todo", vec![row("1", "old")])
        .await
        .unwrap();
    harness.fetch.hold();

    let action = harness
        .coordinator
        .refresh(harness.source.key())
        .await
        .unwrap();
    assert_eq!(action, RefreshAction::Background);
    assert!(harness.snapshot().is_refreshing);

    // 刷新进行中，本地读取立即返回旧数据
    assert_eq!(
        harness.read_pairs().await,
        vec![("1".to_string(), "old".to_string())]
    );

    harness.fetch.release();
    harness.settle().await;
    assert_eq!(
        harness.read_pairs().await,
        vec![("1".to_string(), "new".to_string())]
    );
}

#[tokio::test]
async fn test_clock_advance_makes_data_stale() {
    setup_logging();
    let harness = Harness::new(
        swr(),
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "a")], chrono::Utc::now()),
    );
    harness.fetch.respond(vec![row("1", "a")], harness.now());
    harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap();

    let observer = harness.coordinator.observer();
    let key = harness.source.key();
    assert!(!observer.is_stale(key, harness.source.policy()));

    harness.clock.advance(Duration::minutes(5));
    assert!(!observer.is_stale(key, harness.source.policy()));
    harness.clock.advance(Duration::seconds(1));
    assert!(observer.is_stale(key, harness.source.policy()));
}
