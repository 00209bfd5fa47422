//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了刷新协调器，负责按查询键合并并发刷新请求。
//!
//! 每个查询键同一时刻最多只有一个进行中的刷新（拉取加合并）。刷新体在 tokio 上独立运行并
//! 包装成可共享的 future，所有等待者观察同一个结果；单个等待者被丢弃不会取消刷新，
//! 只有 [`RefreshCoordinator::reset`] 会丢弃进行中的刷新。

use crate::error::{Result, SyncError};
use crate::fetch::FetchExecutor;
use crate::key::QueryKey;
use crate::merge::{MergeEngine, MergeReport};
use crate::metrics::{event, GLOBAL_METRICS};
use crate::observer::ObserverBus;
use crate::policy::{self, Clock, RefreshAction, SystemClock};
use crate::registry::{KeyState, QueryRegistry, RefreshState, SharedRefresh};
use crate::source::QuerySource;
use crate::store::{LocalStore, Record, RecordStream};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 一次刷新的结果，所有等待者得到相同的值
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    /// 刷新标识，合并进同一次刷新的等待者得到同一个标识
    pub refresh_id: Uuid,
    pub key: QueryKey,
    /// 合并进本地存储的远端时间戳
    pub fetched_at: DateTime<Utc>,
    pub report: MergeReport,
}

struct Inner {
    registry: Arc<QueryRegistry>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    cancel: Mutex<CancellationToken>,
}

/// 刷新协调器
///
/// 可以廉价克隆，所有克隆共享同一份状态。
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// 创建使用系统时钟的协调器
    ///
    /// # 参数
    ///
    /// * `store` - 本地存储
    /// * `registry` - 查询键注册表
    pub fn new(store: Arc<dyn LocalStore>, registry: Arc<QueryRegistry>) -> Self {
        Self::with_clock(store, registry, Arc::new(SystemClock))
    }

    /// 创建使用指定时钟的协调器
    pub fn with_clock(
        store: Arc<dyn LocalStore>,
        registry: Arc<QueryRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                clock,
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.inner.store
    }

    /// 观察者通知总线
    pub fn observer(&self) -> ObserverBus {
        ObserverBus::new(self.inner.registry.clone(), self.inner.clock.clone())
    }

    /// 按策略决定是否刷新
    ///
    /// `Skip` 立即返回；`Background` 发起（或发现已有）刷新但不等待，失败只记录在状态里；
    /// `Await` 等待新建或加入的刷新完成，失败会返回给调用方。
    ///
    /// 策略求值和发起刷新在同一次加锁内完成，并发调用最多只会发起一次拉取。
    #[instrument(skip(self, source), level = "debug", fields(query = %source.key()))]
    pub async fn schedule_refresh_if_needed(
        &self,
        source: &Arc<QuerySource>,
    ) -> Result<RefreshAction> {
        let key_label = source.key().to_string();
        let now = self.inner.clock.now();

        let (state, (action, pending)) = self.claim(source, |s, state, token| {
            let action = policy::decide(source.policy(), s, now);
            match action {
                RefreshAction::Skip => (action, None),
                _ => (action, Some(self.join_or_start(s, state, source, token))),
            }
        });

        let shared = match pending {
            None => {
                GLOBAL_METRICS.record_refresh(&key_label, event::SKIPPED);
                debug!("Refresh skipped for {} ({})", source.key(), source.policy());
                return Ok(action);
            }
            Some(pending) => pending?,
        };
        state.publish();

        if action == RefreshAction::Await {
            shared.await?;
        }
        Ok(action)
    }

    /// 执行刷新，已有进行中的刷新时直接加入
    #[instrument(skip(self, source), level = "debug", fields(query = %source.key()))]
    pub async fn execute_refresh(&self, source: &Arc<QuerySource>) -> Result<RefreshOutcome> {
        let (state, shared) =
            self.claim(source, |s, state, token| self.join_or_start(s, state, source, token));
        let shared = shared?;
        state.publish();
        shared.await
    }

    /// 忽略策略强制刷新
    ///
    /// 仍然会加入已有的刷新，不会发起第二次拉取。
    pub async fn force_refresh(&self, source: &Arc<QuerySource>) -> Result<RefreshOutcome> {
        info!("Forced refresh requested for {}", source.key());
        self.execute_refresh(source).await
    }

    /// 按查询键调度刷新
    pub async fn refresh(&self, key: &QueryKey) -> Result<RefreshAction> {
        let source = self.lookup(key)?;
        self.schedule_refresh_if_needed(&source).await
    }

    /// 按查询键强制刷新
    pub async fn force_refresh_key(&self, key: &QueryKey) -> Result<RefreshOutcome> {
        let source = self.lookup(key)?;
        self.force_refresh(&source).await
    }

    /// 重新订阅本地数据，不经过网络
    pub fn refresh_local_only(&self, key: &QueryKey) -> Result<RecordStream> {
        let source = self.lookup(key)?;
        debug!("Restarting local subscription for {}", key);
        Ok(self.inner.store.subscribe(source.definition()))
    }

    /// 只读本地数据，从不等待刷新
    pub async fn read(&self, key: &QueryKey) -> Result<Vec<Record>> {
        let source = self.lookup(key)?;
        self.inner.store.read(source.definition()).await
    }

    /// 调度刷新后读取本地数据
    ///
    /// 刷新失败时只要本地有数据就返回本地数据，本地为空时才返回错误。
    pub async fn load(&self, key: &QueryKey) -> Result<Vec<Record>> {
        let source = self.lookup(key)?;
        match self.schedule_refresh_if_needed(&source).await {
            Ok(_) => self.inner.store.read(source.definition()).await,
            Err(e) => {
                let local = self.inner.store.read(source.definition()).await?;
                if local.is_empty() {
                    Err(e)
                } else {
                    warn!(
                        "Serving {} local records for {} after refresh error: {}",
                        local.len(),
                        key,
                        e
                    );
                    Ok(local)
                }
            }
        }
    }

    /// 驱逐查询键状态，下次访问时重新创建
    ///
    /// 有进行中的刷新时不驱逐并返回 `false`，之后的调用方仍会加入这次刷新。
    pub fn evict(&self, key: &QueryKey) -> bool {
        let evicted = self.inner.registry.evict(key).is_some();
        if evicted {
            debug!("Evicted refresh state for {}", key);
        } else if self.inner.registry.existing_state(key).is_some() {
            debug!("Refresh in flight for {}, state kept", key);
        }
        evicted
    }

    /// 重置协调器
    ///
    /// 取消所有进行中的刷新（不等待），丢弃所有查询键状态。已有的订阅者不再收到更新。
    ///
    /// 整个过程持有令牌锁：先取消旧令牌再清空状态，最后换上新令牌。
    /// 拿着旧令牌的调用方在状态锁内会看到它已取消，从而重新获取令牌和状态。
    pub fn reset(&self) {
        let mut token = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        let dropped = self.inner.registry.clear_states();
        *token = CancellationToken::new();
        drop(token);
        info!("Coordinator reset, dropped {} query states", dropped);
    }

    fn lookup(&self, key: &QueryKey) -> Result<Arc<QuerySource>> {
        self.inner
            .registry
            .source(key)
            .ok_or_else(|| SyncError::UnknownQuery(key.to_string()))
    }

    fn current_token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 在仍然有效的查询键状态上执行 `f`
    ///
    /// 状态已退役（被驱逐或重置）或令牌已取消时重新获取两者，
    /// 因此 `f` 看到的状态和令牌总是属于同一代。
    fn claim<R>(
        &self,
        source: &Arc<QuerySource>,
        mut f: impl FnMut(&mut RefreshState, &Arc<KeyState>, &CancellationToken) -> R,
    ) -> (Arc<KeyState>, R) {
        loop {
            let token = self.current_token();
            let state = self.inner.registry.state(source.key());
            let claimed = state.with_state(|s| {
                if s.retired || token.is_cancelled() {
                    None
                } else {
                    Some(f(s, &state, &token))
                }
            });
            if let Some(result) = claimed {
                return (state, result);
            }
        }
    }

    /// 在状态锁内加入已有刷新或发起新刷新
    fn join_or_start(
        &self,
        s: &mut RefreshState,
        state: &Arc<KeyState>,
        source: &Arc<QuerySource>,
        token: &CancellationToken,
    ) -> Result<SharedRefresh> {
        let key_label = source.key().to_string();
        if let Some(existing) = &s.in_flight {
            GLOBAL_METRICS.record_refresh(&key_label, event::COALESCED);
            debug!("Joining in-flight refresh for {}", source.key());
            return Ok(existing.clone());
        }

        if source.fetch().is_none() {
            return Err(SyncError::PolicyMisconfiguration(format!(
                "query '{}' has no remote fetch",
                source.name()
            )));
        }

        let refresh_id = Uuid::new_v4();
        let handle = tokio::spawn(run_refresh(
            refresh_id,
            self.inner.clone(),
            state.clone(),
            source.clone(),
            token.clone(),
        ));
        let shared = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SyncError::Cancelled(e.to_string())))
        }
        .boxed()
        .shared();

        s.in_flight = Some(shared.clone());
        s.is_refreshing = true;
        s.refresh_count += 1;
        GLOBAL_METRICS.record_refresh(&key_label, event::STARTED);
        debug!(
            "Started refresh #{} ({}) for {}",
            s.refresh_count,
            refresh_id,
            source.key()
        );
        Ok(shared)
    }
}

/// 刷新体：拉取、合并、更新状态、发布
#[instrument(skip(inner, state, source, token), fields(query = %source.key()))]
async fn run_refresh(
    refresh_id: Uuid,
    inner: Arc<Inner>,
    state: Arc<KeyState>,
    source: Arc<QuerySource>,
    token: CancellationToken,
) -> Result<RefreshOutcome> {
    let key = source.key().clone();
    let key_label = key.to_string();
    let start = Instant::now();

    let work = async {
        let action = source.fetch().ok_or_else(|| {
            SyncError::PolicyMisconfiguration(format!(
                "query '{}' has no remote fetch",
                source.name()
            ))
        })?;
        let fetched = FetchExecutor::execute(&key, action.as_ref()).await?;
        let fetched_at = fetched.fetched_at;
        let report = MergeEngine::merge(
            inner.store.as_ref(),
            source.merge(),
            source.definition(),
            fetched.records,
            source.prune_missing(),
        )
        .await?;
        Ok::<_, SyncError>(RefreshOutcome {
            refresh_id,
            key: key.clone(),
            fetched_at,
            report,
        })
    };
    // 拉取动作由调用方提供，panic 也要走完状态收尾
    let work = AssertUnwindSafe(work).catch_unwind().map(|result| {
        result.unwrap_or_else(|_| {
            Err(SyncError::PermanentNetwork(
                "refresh task panicked".to_string(),
            ))
        })
    });

    let (result, cancelled) = tokio::select! {
        biased;
        _ = token.cancelled() => (
            Err(SyncError::Cancelled(format!("refresh of {} cancelled by reset", key))),
            true,
        ),
        result = work => (result, false),
    };

    state.with_state(|s| {
        match &result {
            Ok(outcome) => {
                s.last_synced_at = Some(outcome.fetched_at);
                s.last_error = None;
            }
            Err(e) => s.last_error = Some(e.clone()),
        }
        s.in_flight = None;
        s.is_refreshing = false;
    });

    let elapsed = start.elapsed().as_secs_f64();
    GLOBAL_METRICS.record_duration(&key_label, "refresh", elapsed);
    match &result {
        Ok(outcome) => {
            GLOBAL_METRICS.record_refresh(&key_label, event::SUCCEEDED);
            GLOBAL_METRICS.record_rows(&key_label, outcome.report.rows_written());
            info!(
                "Refreshed {} in {:.3}s: inserted={}, updated={}, deleted={}, skipped={}",
                key,
                elapsed,
                outcome.report.inserted,
                outcome.report.updated,
                outcome.report.deleted,
                outcome.report.skipped
            );
        }
        Err(e) if cancelled => {
            GLOBAL_METRICS.record_refresh(&key_label, event::CANCELLED);
            debug!("{}", e);
        }
        Err(e) => {
            GLOBAL_METRICS.record_refresh(&key_label, event::FAILED);
            error!("Refresh of {} failed: {}", key, e);
        }
    }

    // 被驱逐或重置后的状态不再发布
    let current = inner
        .registry
        .existing_state(&key)
        .is_some_and(|registered| Arc::ptr_eq(&registered, &state));
    if current {
        state.publish();
    }
    result
}
