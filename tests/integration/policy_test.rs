//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 缓存策略集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::Duration;
use common::{row, setup_logging, Harness, ScriptedFetch};
use oxsync::{CachePolicy, MergeStrategy, RefreshAction};

fn cache_first(secs: i64) -> CachePolicy {
    CachePolicy::CacheFirst {
        ttl: Duration::seconds(secs),
    }
}

/// 将上次同步时间设置为 `now - ago`
async fn synced_ago(harness: &Harness, ago: Duration) {
    harness
        .fetch
        .respond(vec![row("1", "a")], harness.now() - ago);
    harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cache_first_within_ttl_makes_no_remote_call() {
    setup_logging();
    let harness = Harness::new(
        cache_first(60),
        MergeStrategy::Upsert,
        ScriptedFetch::new(Vec::new(), chrono::Utc::now()),
    );
    synced_ago(&harness, Duration::seconds(10)).await;
    let before = harness.fetch.calls();

    for _ in 0..3 {
        let action = harness
            .coordinator
            .schedule_refresh_if_needed(&harness.source)
            .await
            .unwrap();
        assert_eq!(action, RefreshAction::Skip);
    }
    assert_eq!(harness.fetch.calls(), before);
}

#[tokio::test]
async fn test_cache_first_after_ttl_blocks_until_merged() {
    setup_logging();
    let harness = Harness::new(
        cache_first(60),
        MergeStrategy::Upsert,
        ScriptedFetch::new(Vec::new(), chrono::Utc::now()),
    );
    synced_ago(&harness, Duration::seconds(10)).await;

    harness.clock.advance(Duration::seconds(61));
    harness.fetch.respond(vec![row("1", "fresh")], harness.now());

    let action = harness
        .coordinator
        .schedule_refresh_if_needed(&harness.source)
        .await
        .unwrap();
    assert_eq!(action, RefreshAction::Await);
    // 返回时数据已经合并完成
    assert_eq!(harness.read_pairs().await, vec![("1".into(), "fresh".into())]);
    assert_eq!(harness.snapshot().last_synced_at, Some(harness.now()));
}

#[tokio::test]
async fn test_network_first_fetches_every_time() {
    setup_logging();
    let harness = Harness::new(
        CachePolicy::NetworkFirst,
        MergeStrategy::Upsert,
        ScriptedFetch::new(vec![row("1", "a")], chrono::Utc::now()),
    );

    for expected in 1..=3 {
        let action = harness
            .coordinator
            .schedule_refresh_if_needed(&harness.source)
            .await
            .unwrap();
        assert_eq!(action, RefreshAction::Await);
        assert_eq!(harness.fetch.calls(), expected);
    }
    assert!(harness
        .coordinator
        .observer()
        .is_stale(harness.source.key(), harness.source.policy()));
}

#[tokio::test]
async fn test_stale_while_revalidate_fresh_data_skips() {
    setup_logging();
    let policy = CachePolicy::StaleWhileRevalidate {
        stale_after: Duration::minutes(5),
    };
    let harness = Harness::new(
        policy,
        MergeStrategy::Upsert,
        ScriptedFetch::new(Vec::new(), chrono::Utc::now()),
    );
    synced_ago(&harness, Duration::minutes(1)).await;
    let before = harness.fetch.calls();

    let action = harness
        .coordinator
        .refresh(harness.source.key())
        .await
        .unwrap();
    assert_eq!(action, RefreshAction::Skip);
    assert_eq!(harness.fetch.calls(), before);
    assert!(!harness
        .coordinator
        .observer()
        .is_stale(harness.source.key(), &policy));
}

#[tokio::test]
async fn test_non_positive_threshold_always_refreshes() {
    setup_logging();
    for secs in [0, -30] {
        let harness = Harness::new(
            cache_first(secs),
            MergeStrategy::Upsert,
            ScriptedFetch::new(vec![row("1", "a")], chrono::Utc::now()),
        );
        synced_ago(&harness, Duration::zero()).await;
        let before = harness.fetch.calls();

        let action = harness
            .coordinator
            .schedule_refresh_if_needed(&harness.source)
            .await
            .unwrap();
        assert_eq!(action, RefreshAction::Await);
        assert_eq!(harness.fetch.calls(), before + 1);
    }
}
