//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数和设置。

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxsync::fetch::{FetchResult, RemoteFetch};
use oxsync::{
    CachePolicy, Clock, ManualClock, MemoryStore, MergeStrategy, QueryDefinition, QueryRegistry,
    QuerySource, Record, RefreshCoordinator, RefreshSnapshot, SyncError,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .try_init()
            .ok();
    });
}

/// 构造 `{ "v": v }` 记录
pub fn row(id: &str, v: &str) -> Record {
    Record::new(id, json!({ "v": v }))
}

/// 把记录列表转成 (id, v) 列表，便于断言
pub fn pairs(records: &[Record]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| {
            let v = r
                .field("v")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            (r.id.clone(), v)
        })
        .collect()
}

/// 可编排的拉取动作
///
/// 记录调用次数；响应可以随时替换；`hold` 之后的拉取会停在闸门上直到 `release`。
pub struct ScriptedFetch {
    calls: AtomicUsize,
    response: Mutex<Result<FetchResult, SyncError>>,
    delay: Duration,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedFetch {
    pub fn new(records: Vec<Record>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            response: Mutex::new(Ok(FetchResult::new(records, fetched_at))),
            delay: Duration::ZERO,
            gate: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn respond(&self, records: Vec<Record>, fetched_at: DateTime<Utc>) {
        *self.response.lock().unwrap() = Ok(FetchResult::new(records, fetched_at));
    }

    pub fn fail(&self, error: SyncError) {
        *self.response.lock().unwrap() = Err(error);
    }

    /// 之后的拉取在闸门上等待
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// 放行所有等待中的拉取
    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }
}

#[async_trait]
impl RemoteFetch for ScriptedFetch {
    async fn fetch(&self) -> oxsync::Result<FetchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.lock().unwrap().clone()
    }
}

/// 协调器测试环境
pub struct Harness {
    pub coordinator: RefreshCoordinator,
    pub source: Arc<QuerySource>,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub fetch: Arc<ScriptedFetch>,
}

impl Harness {
    /// 单个 `todo` 查询，使用手动时钟
    pub fn new(policy: CachePolicy, merge: MergeStrategy, fetch: ScriptedFetch) -> Self {
        Self::with_definition(QueryDefinition::new("todo"), policy, merge, fetch)
    }

    pub fn with_definition(
        definition: QueryDefinition,
        policy: CachePolicy,
        merge: MergeStrategy,
        fetch: ScriptedFetch,
    ) -> Self {
        let fetch = Arc::new(fetch);
        let source = QuerySource::builder("todos", definition)
            .fetch(fetch.clone())
            .policy(policy)
            .merge(merge)
            .build()
            .expect("valid source");

        let registry = Arc::new(QueryRegistry::new());
        registry.register(source.clone());
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let coordinator = RefreshCoordinator::with_clock(
            Arc::new(store.clone()),
            registry,
            clock.clone() as Arc<dyn Clock>,
        );

        Self {
            coordinator,
            source,
            store,
            clock,
            fetch,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        self.coordinator.observer().snapshot(self.source.key())
    }

    pub async fn read_pairs(&self) -> Vec<(String, String)> {
        let records = self
            .coordinator
            .read(self.source.key())
            .await
            .expect("local read");
        pairs(&records)
    }

    /// 等待当前刷新结束
    pub async fn settle(&self) -> RefreshSnapshot {
        let mut rx = self.coordinator.observer().subscribe(self.source.key());
        wait_idle(&mut rx).await
    }
}

/// 等待快照进入空闲状态
pub async fn wait_idle(rx: &mut watch::Receiver<RefreshSnapshot>) -> RefreshSnapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_refreshing))
        .await
        .expect("refresh did not settle in time")
        .expect("state dropped while waiting")
        .clone()
}
