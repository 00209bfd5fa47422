//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了观察者通知总线：刷新状态的只读投影。

use crate::error::SyncError;
use crate::key::QueryKey;
use crate::policy::{self, CachePolicy, Clock};
use crate::registry::QueryRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// 刷新状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSnapshot {
    pub key: QueryKey,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_refreshing: bool,
    pub last_error: Option<SyncError>,
    pub refresh_count: u64,
}

impl RefreshSnapshot {
    /// 尚未发生任何刷新时的快照
    pub fn empty(key: QueryKey) -> Self {
        Self {
            key,
            last_synced_at: None,
            is_refreshing: false,
            last_error: None,
            refresh_count: 0,
        }
    }
}

/// 观察者通知总线
///
/// 不做任何修改；读取方法只在持锁读取字段期间短暂加锁，从不挂起。
#[derive(Clone)]
pub struct ObserverBus {
    registry: Arc<QueryRegistry>,
    clock: Arc<dyn Clock>,
}

impl ObserverBus {
    pub fn new(registry: Arc<QueryRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// 当前快照；从未访问过的查询键返回空快照
    pub fn snapshot(&self, key: &QueryKey) -> RefreshSnapshot {
        self.registry
            .existing_state(key)
            .map(|state| state.snapshot())
            .unwrap_or_else(|| RefreshSnapshot::empty(key.clone()))
    }

    /// 按需根据上次同步时间、当前时间和策略计算是否过期
    pub fn is_stale(&self, key: &QueryKey, policy: &CachePolicy) -> bool {
        policy::is_stale(policy, self.last_synced_at(key), self.clock.now())
    }

    pub fn is_refreshing(&self, key: &QueryKey) -> bool {
        self.registry
            .existing_state(key)
            .map(|state| state.with_state(|s| s.is_refreshing))
            .unwrap_or(false)
    }

    pub fn last_synced_at(&self, key: &QueryKey) -> Option<DateTime<Utc>> {
        self.registry
            .existing_state(key)
            .and_then(|state| state.with_state(|s| s.last_synced_at))
    }

    pub fn last_error(&self, key: &QueryKey) -> Option<SyncError> {
        self.registry
            .existing_state(key)
            .and_then(|state| state.with_state(|s| s.last_error.clone()))
    }

    /// 订阅查询键的状态变化
    ///
    /// 协调器重置后旧的接收端不再收到更新。
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<RefreshSnapshot> {
        self.registry.state(key).subscribe()
    }
}
