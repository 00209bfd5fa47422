//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了远程拉取接口和拉取执行器。
//!
//! 拉取动作自带重试策略（见 [`retry`]），执行器只负责调用一次并返回分类后的结果，
//! 不做任何缓存或合并。

pub mod retry;

use crate::error::{Result, SyncError};
use crate::key::QueryKey;
use crate::metrics::GLOBAL_METRICS;
use crate::store::{Entity, Record};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

pub use retry::{RetryPolicy, RetryingFetch};

/// 拉取结果
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// 拉取到的记录
    pub records: Vec<Record>,
    /// 远端数据的时间戳
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn new(records: Vec<Record>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            records,
            fetched_at,
        }
    }
}

/// 远程拉取动作
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    /// 拉取查询对应的远程数据
    async fn fetch(&self) -> Result<FetchResult>;
}

#[async_trait]
impl<T: RemoteFetch + ?Sized> RemoteFetch for Arc<T> {
    async fn fetch(&self) -> Result<FetchResult> {
        (**self).fetch().await
    }
}

/// 基于闭包的记录拉取动作
pub struct FnFetch<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> RemoteFetch for FnFetch<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<FetchResult>> + Send + 'static,
{
    async fn fetch(&self) -> Result<FetchResult> {
        (self.f)().await
    }
}

/// 基于闭包的类型化拉取动作，实体会被转换为记录
pub struct TypedFetch<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> RemoteFetch for TypedFetch<T, F>
where
    T: Entity,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(Vec<T>, DateTime<Utc>)>> + Send + 'static,
{
    async fn fetch(&self) -> Result<FetchResult> {
        let (items, fetched_at) = (self.f)().await?;
        let records = items
            .iter()
            .map(Record::from_entity)
            .collect::<Result<Vec<_>>>()
            // 远端返回的数据无法编码，重试也无济于事
            .map_err(|e| SyncError::PermanentNetwork(e.to_string()))?;
        Ok(FetchResult::new(records, fetched_at))
    }
}

/// 由返回记录的闭包创建拉取动作
pub fn record_fetch_fn<F, Fut>(f: F) -> Arc<dyn RemoteFetch>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FetchResult>> + Send + 'static,
{
    Arc::new(FnFetch { f })
}

/// 由返回类型化实体的闭包创建拉取动作
pub fn fetch_fn<T, F, Fut>(f: F) -> Arc<dyn RemoteFetch>
where
    T: Entity,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(Vec<T>, DateTime<Utc>)>> + Send + 'static,
{
    Arc::new(TypedFetch {
        f,
        _marker: PhantomData,
    })
}

/// 拉取执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchExecutor;

impl FetchExecutor {
    /// 执行一次拉取动作并返回分类后的结果
    ///
    /// 非网络类错误（例如解码失败）一律归为不可重试错误；取消保持原样。
    #[instrument(skip(action), level = "debug", fields(query = %key))]
    pub async fn execute(key: &QueryKey, action: &dyn RemoteFetch) -> Result<FetchResult> {
        let start = Instant::now();
        let result = action.fetch().await.map_err(classify);
        let elapsed = start.elapsed().as_secs_f64();
        GLOBAL_METRICS.record_duration(&key.to_string(), "fetch", elapsed);

        match &result {
            Ok(fetched) => debug!(
                "Fetched {} records for {} (fetched_at={})",
                fetched.records.len(),
                key,
                fetched.fetched_at
            ),
            Err(e) if e.is_transient() => warn!("Fetch for {} failed after retries: {}", key, e),
            Err(e) => error!("Fetch for {} failed: {}", key, e),
        }
        result
    }
}

fn classify(error: SyncError) -> SyncError {
    match error {
        e @ (SyncError::TransientNetwork(_)
        | SyncError::PermanentNetwork(_)
        | SyncError::Cancelled(_)) => e,
        other => SyncError::PermanentNetwork(other.to_string()),
    }
}
