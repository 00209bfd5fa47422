//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了拉取动作的重试策略：有界次数、指数退避和随机抖动。

use super::{FetchResult, RemoteFetch};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

type RetryPredicate = Arc<dyn Fn(&SyncError) -> bool + Send + Sync>;

/// 重试策略
#[derive(Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 第一次重试前的等待时间
    pub base_delay: Duration,
    /// 单次等待上限
    pub max_delay: Duration,
    /// 是否启用全抖动
    pub jitter: bool,
    retry_if: RetryPredicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
            retry_if: Arc::new(SyncError::is_transient),
        }
    }
}

impl RetryPolicy {
    /// 创建指定最大尝试次数的策略
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// 不重试
    pub fn none() -> Self {
        Self::new(1)
    }

    /// 设置退避参数
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// 开关抖动
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// 自定义可重试判定，默认只重试 `TransientNetwork`
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&SyncError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }

    /// 错误是否值得重试
    pub fn should_retry(&self, error: &SyncError) -> bool {
        (self.retry_if)(error)
    }

    /// 第 `attempt` 次失败之后的等待时间（从 1 开始）
    ///
    /// `base * 2^(attempt-1)`，不超过 `max_delay`；启用抖动时在 `[0, delay]` 内均匀取值。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            let millis = delay.as_millis().min(u64::MAX as u128) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            delay
        }
    }
}

/// 给任意拉取动作嵌入重试策略
pub struct RetryingFetch<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: RemoteFetch> RetryingFetch<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<A: RemoteFetch> RemoteFetch for RetryingFetch<A> {
    async fn fetch(&self) -> Result<FetchResult> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.fetch().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Fetch succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) if !self.policy.should_retry(&e) => {
                    debug!("Fetch failed with non-retryable error: {}", e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    error!("All {} fetch attempts failed: {}", max_attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "Fetch attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
