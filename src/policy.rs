//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存策略以及策略求值函数。
//!
//! 求值是纯函数：给定策略、刷新状态和当前时间，决定跳过、后台刷新还是等待刷新。

use crate::registry::RefreshState;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Mutex;

/// 缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// 从不刷新
    LocalOnly,
    /// 立即返回本地数据，超过阈值后在后台刷新
    StaleWhileRevalidate { stale_after: Duration },
    /// ttl 内直接使用本地数据，否则等待刷新完成
    CacheFirst { ttl: Duration },
    /// 总是尝试拉取，失败时回退到本地数据
    NetworkFirst,
}

impl CachePolicy {
    /// 策略是否可能发起远程拉取
    pub fn refreshes(&self) -> bool {
        !matches!(self, CachePolicy::LocalOnly)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::LocalOnly => write!(f, "local_only"),
            CachePolicy::StaleWhileRevalidate { stale_after } => {
                write!(f, "stale_while_revalidate({}s)", stale_after.num_seconds())
            }
            CachePolicy::CacheFirst { ttl } => write!(f, "cache_first({}s)", ttl.num_seconds()),
            CachePolicy::NetworkFirst => write!(f, "network_first"),
        }
    }
}

/// 策略求值结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshAction {
    /// 不刷新
    Skip,
    /// 后台刷新，调用方不等待
    Background,
    /// 等待刷新（新建或加入已有刷新）完成
    Await,
}

impl fmt::Display for RefreshAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshAction::Skip => write!(f, "skip"),
            RefreshAction::Background => write!(f, "background"),
            RefreshAction::Await => write!(f, "await"),
        }
    }
}

/// 上次同步距今是否超过阈值
///
/// 从未同步视为超过；零或负阈值退化为总是超过。
fn exceeds(last_synced_at: Option<DateTime<Utc>>, threshold: Duration, now: DateTime<Utc>) -> bool {
    match last_synced_at {
        None => true,
        Some(_) if threshold <= Duration::zero() => true,
        Some(at) => now - at > threshold,
    }
}

/// 根据策略决定刷新动作
///
/// # 参数
///
/// * `policy` - 缓存策略
/// * `state` - 查询键当前的刷新状态
/// * `now` - 当前时间
pub fn decide(policy: &CachePolicy, state: &RefreshState, now: DateTime<Utc>) -> RefreshAction {
    match policy {
        CachePolicy::LocalOnly => RefreshAction::Skip,
        CachePolicy::StaleWhileRevalidate { stale_after } => {
            if !state.is_refreshing && exceeds(state.last_synced_at, *stale_after, now) {
                RefreshAction::Background
            } else {
                RefreshAction::Skip
            }
        }
        CachePolicy::CacheFirst { ttl } => {
            if exceeds(state.last_synced_at, *ttl, now) {
                RefreshAction::Await
            } else {
                RefreshAction::Skip
            }
        }
        // 已有刷新时由协调器负责加入
        CachePolicy::NetworkFirst => RefreshAction::Await,
    }
}

/// 数据是否已过期
///
/// `LocalOnly` 永不过期，`NetworkFirst` 总是视为过期。
pub fn is_stale(
    policy: &CachePolicy,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match policy {
        CachePolicy::LocalOnly => false,
        CachePolicy::StaleWhileRevalidate { stale_after } => {
            exceeds(last_synced_at, *stale_after, now)
        }
        CachePolicy::CacheFirst { ttl } => exceeds(last_synced_at, *ttl, now),
        CachePolicy::NetworkFirst => true,
    }
}

/// 时间源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟，用于测试时间推进
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// 设置当前时间
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    /// 推进时间
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|guard| *guard).unwrap_or_else(|_| Utc::now())
    }
}
