//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了查询键注册表：查询键到查询源、查询键到刷新状态的映射。

use crate::config::Config;
use crate::coordinator::RefreshOutcome;
use crate::error::{Result, SyncError};
use crate::fetch::RemoteFetch;
use crate::key::QueryKey;
use crate::observer::RefreshSnapshot;
use crate::source::QuerySource;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 共享的刷新结果，所有等待者得到同一个结果
pub(crate) type SharedRefresh = Shared<BoxFuture<'static, Result<RefreshOutcome>>>;

/// 单个查询键的刷新状态
///
/// 首次访问时创建，除非被显式驱逐或协调器重置，否则一直存在；本地写入不会清除它。
#[derive(Default)]
pub struct RefreshState {
    /// 上次成功合并的远端时间戳
    pub last_synced_at: Option<DateTime<Utc>>,
    /// 是否有未完成的刷新
    pub is_refreshing: bool,
    /// 上次刷新的错误
    pub last_error: Option<SyncError>,
    /// 发起的刷新次数（不含合并进已有刷新的请求）
    pub refresh_count: u64,
    pub(crate) in_flight: Option<SharedRefresh>,
    /// 已从注册表移除，不能再发起刷新
    pub(crate) retired: bool,
}

impl std::fmt::Debug for RefreshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshState")
            .field("last_synced_at", &self.last_synced_at)
            .field("is_refreshing", &self.is_refreshing)
            .field("last_error", &self.last_error)
            .field("refresh_count", &self.refresh_count)
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}

/// 查询键状态
///
/// 刷新状态由一把短锁保护，锁从不跨越 `.await`；每次状态变化都会通过 watch 通道发布快照。
pub struct KeyState {
    key: QueryKey,
    state: Mutex<RefreshState>,
    updates: watch::Sender<RefreshSnapshot>,
}

impl KeyState {
    fn new(key: QueryKey) -> Self {
        let (updates, _) = watch::channel(RefreshSnapshot::empty(key.clone()));
        Self {
            key,
            state: Mutex::new(RefreshState::default()),
            updates,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// 在锁内访问刷新状态
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut RefreshState) -> R) -> R {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn snapshot_of(&self, s: &RefreshState) -> RefreshSnapshot {
        RefreshSnapshot {
            key: self.key.clone(),
            last_synced_at: s.last_synced_at,
            is_refreshing: s.is_refreshing,
            last_error: s.last_error.clone(),
            refresh_count: s.refresh_count,
        }
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> RefreshSnapshot {
        self.with_state(|s| self.snapshot_of(s))
    }

    /// 发布当前状态
    ///
    /// 在锁内发送，保证订阅者看到的顺序与状态变化顺序一致。
    pub(crate) fn publish(&self) {
        self.with_state(|s| {
            self.updates.send_replace(self.snapshot_of(s));
        });
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<RefreshSnapshot> {
        self.updates.subscribe()
    }

    /// 没有进行中的刷新时标记为退役
    fn try_retire(&self) -> bool {
        self.with_state(|s| {
            if s.in_flight.is_some() {
                false
            } else {
                s.retired = true;
                true
            }
        })
    }

    fn retire(&self) {
        self.with_state(|s| s.retired = true);
    }
}

/// 查询键注册表
///
/// 相同的查询键总是得到同一个状态对象。
#[derive(Default)]
pub struct QueryRegistry {
    sources: DashMap<QueryKey, Arc<QuerySource>>,
    names: DashMap<String, QueryKey>,
    states: DashMap<QueryKey, Arc<KeyState>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册查询源
    ///
    /// 同一查询键的第一次注册生效；之后策略或合并方式不同的注册只会记录警告，
    /// 合并策略应当是查询键的属性而不是调用点的属性。
    pub fn register(&self, source: Arc<QuerySource>) -> QueryKey {
        let key = source.key().clone();
        self.names.insert(source.name().to_string(), key.clone());

        match self.sources.entry(key.clone()) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.merge() != source.merge() || existing.policy() != source.policy() {
                    warn!(
                        "Query {} registered twice with different settings ({} vs {}); keeping the first",
                        key,
                        existing.name(),
                        source.name()
                    );
                }
            }
            Entry::Vacant(slot) => {
                debug!("Registered query {} as {}", source.name(), key);
                slot.insert(source);
            }
        }
        key
    }

    /// 根据配置注册所有查询
    ///
    /// # 参数
    ///
    /// * `config` - 配置
    /// * `fetchers` - 查询名称到拉取动作的映射
    ///
    /// # 返回值
    ///
    /// 按查询名称排序的查询键列表
    pub fn register_config(
        &self,
        config: &Config,
        mut fetchers: HashMap<String, Arc<dyn RemoteFetch>>,
    ) -> Result<Vec<QueryKey>> {
        config.validate()?;
        let default_policy = config.global.default_policy.to_policy()?;
        let default_retry = config.global.retry.to_retry_policy();

        let mut names: Vec<_> = config.queries.keys().cloned().collect();
        names.sort();

        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            let query = &config.queries[&name];
            let fetch = fetchers.remove(&name);
            let source = QuerySource::from_config(
                &name,
                query,
                default_policy,
                default_retry.clone(),
                fetch,
            )?;
            keys.push(self.register(source));
        }

        for name in fetchers.keys() {
            warn!("Fetch action '{}' does not match any configured query", name);
        }
        info!("Registered {} queries from configuration", keys.len());
        Ok(keys)
    }

    /// 按查询键查找查询源
    pub fn source(&self, key: &QueryKey) -> Option<Arc<QuerySource>> {
        self.sources.get(key).map(|r| r.value().clone())
    }

    /// 按名称查找查询源
    pub fn source_by_name(&self, name: &str) -> Option<Arc<QuerySource>> {
        let key = self.key_for(name)?;
        self.source(&key)
    }

    /// 名称对应的查询键
    pub fn key_for(&self, name: &str) -> Option<QueryKey> {
        self.names.get(name).map(|r| r.value().clone())
    }

    /// 所有已注册的查询键（有序）
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<_> = self.sources.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// 获取查询键状态，不存在时创建
    pub fn state(&self, key: &QueryKey) -> Arc<KeyState> {
        if let Some(state) = self.states.get(key) {
            return state.value().clone();
        }
        self.states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyState::new(key.clone())))
            .value()
            .clone()
    }

    /// 获取已存在的查询键状态
    pub fn existing_state(&self, key: &QueryKey) -> Option<Arc<KeyState>> {
        self.states.get(key).map(|r| r.value().clone())
    }

    /// 驱逐查询键状态
    ///
    /// 有进行中的刷新时不驱逐，返回 `None`；同一查询键的拉取和合并不能重叠。
    /// 被驱逐的状态在锁内标记为退役，之前拿到它的调用方会重新获取状态。
    pub fn evict(&self, key: &QueryKey) -> Option<Arc<KeyState>> {
        self.states
            .remove_if(key, |_, state| state.try_retire())
            .map(|(_, state)| state)
    }

    /// 清空所有查询键状态，返回被丢弃的数量
    ///
    /// 进行中的刷新应当已被取消。
    pub(crate) fn clear_states(&self) -> usize {
        let mut count = 0;
        self.states.retain(|_, state| {
            state.retire();
            count += 1;
            false
        });
        count
    }

    /// 已注册的查询源数量
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
