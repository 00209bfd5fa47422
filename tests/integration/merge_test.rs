//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 合并策略集成测试

#[path = "../common/mod.rs"]
mod common;

use chrono::Utc;
use common::{pairs, row, setup_logging, Harness, ScriptedFetch};
use oxsync::merge::MergeEngine;
use oxsync::store::LocalStore;
use oxsync::{CachePolicy, MemoryStore, MergeStrategy, QueryDefinition, Record, SyncError};
use serde_json::json;

fn pair(id: &str, v: &str) -> (String, String) {
    (id.to_string(), v.to_string())
}

/// 依次用两批数据刷新，返回最终的本地数据
async fn refresh_twice(
    strategy: MergeStrategy,
    first: Vec<Record>,
    second: Vec<Record>,
) -> Vec<(String, String)> {
    setup_logging();
    let harness = Harness::new(
        CachePolicy::NetworkFirst,
        strategy,
        ScriptedFetch::new(first, Utc::now()),
    );
    harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap();

    harness.fetch.respond(second, Utc::now());
    harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap();
    harness.read_pairs().await
}

#[tokio::test]
async fn test_upsert_updates_and_inserts() {
    let result = refresh_twice(
        MergeStrategy::Upsert,
        vec![row("1", "a")],
        vec![row("1", "b"), row("2", "c")],
    )
    .await;
    assert_eq!(result, vec![pair("1", "b"), pair("2", "c")]);
}

#[tokio::test]
async fn test_upsert_keeps_rows_missing_from_fetch() {
    let result = refresh_twice(
        MergeStrategy::Upsert,
        vec![row("1", "a"), row("2", "b")],
        vec![row("2", "z")],
    )
    .await;
    assert_eq!(result, vec![pair("1", "a"), pair("2", "z")]);
}

#[tokio::test]
async fn test_replace_swaps_scope() {
    let result = refresh_twice(
        MergeStrategy::Replace,
        vec![row("1", "a")],
        vec![row("2", "b")],
    )
    .await;
    assert_eq!(result, vec![pair("2", "b")]);
}

#[tokio::test]
async fn test_append_new_ignores_updates() {
    let result = refresh_twice(
        MergeStrategy::AppendNew,
        vec![row("1", "a")],
        vec![row("1", "z"), row("2", "c")],
    )
    .await;
    assert_eq!(result, vec![pair("1", "a"), pair("2", "c")]);
}

#[tokio::test]
async fn test_replace_with_duplicate_keys_rolls_back() {
    setup_logging();
    let harness = Harness::new(
        CachePolicy::NetworkFirst,
        MergeStrategy::Replace,
        ScriptedFetch::new(vec![row("1", "a")], Utc::now()),
    );
    let first = harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap();

    harness
        .fetch
        .respond(vec![row("2", "b"), row("2", "c")], Utc::now());
    let err = harness
        .coordinator
        .force_refresh(&harness.source)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Merge(_)));
    // 整个事务回滚，旧数据和同步时间都保持不变
    assert_eq!(harness.read_pairs().await, vec![pair("1", "a")]);
    assert_eq!(harness.snapshot().last_synced_at, Some(first.fetched_at));
    assert_eq!(harness.store.commit_count(), 1);
}

#[tokio::test]
async fn test_replace_leaves_other_scopes_untouched() {
    setup_logging();
    let store = MemoryStore::new();
    store
        .seed(
            "todo",
            vec![
                Record::new("1", json!({"owner": "alice", "v": "a"})),
                Record::new("2", json!({"owner": "bob", "v": "b"})),
            ],
        )
        .await
        .unwrap();

    let alice = QueryDefinition::new("todo").filter("owner", "alice");
    let report = MergeEngine::merge(
        &store,
        MergeStrategy::Replace,
        &alice,
        vec![Record::new("3", json!({"owner": "alice", "v": "c"}))],
        false,
    )
    .await
    .unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.inserted, 1);

    let everything = store.read(&QueryDefinition::new("todo")).await.unwrap();
    assert_eq!(pairs(&everything), vec![pair("2", "b"), pair("3", "c")]);
}

#[tokio::test]
async fn test_replace_rejects_id_owned_by_other_scope() {
    setup_logging();
    let store = MemoryStore::new();
    store
        .seed(
            "todo",
            vec![
                Record::new("1", json!({"owner": "alice", "v": "a"})),
                Record::new("2", json!({"owner": "bob", "v": "b"})),
            ],
        )
        .await
        .unwrap();

    // "2" 属于 bob 的范围，不会被删除，再插入就违反主键约束
    let alice = QueryDefinition::new("todo").filter("owner", "alice");
    let err = MergeEngine::merge(
        &store,
        MergeStrategy::Replace,
        &alice,
        vec![Record::new("2", json!({"owner": "alice", "v": "moved"}))],
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Merge(msg) if msg.contains("constraint violation")));

    let everything = store.read(&QueryDefinition::new("todo")).await.unwrap();
    assert_eq!(pairs(&everything), vec![pair("1", "a"), pair("2", "b")]);
    assert_eq!(store.commit_count(), 1);
}
