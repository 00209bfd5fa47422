//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了查询源：查询定义、远程拉取动作、缓存策略和合并策略的绑定。

use crate::config::QueryConfig;
use crate::error::{Result, SyncError};
use crate::fetch::{RemoteFetch, RetryPolicy, RetryingFetch};
use crate::key::{QueryDefinition, QueryKey};
use crate::merge::MergeStrategy;
use crate::policy::CachePolicy;
use chrono::Duration;
use std::sync::Arc;

/// 查询源
///
/// 每个逻辑查询创建一次（通常在启动时），之后不可变，通过 `Arc` 共享。
pub struct QuerySource {
    name: String,
    definition: QueryDefinition,
    key: QueryKey,
    fetch: Option<Arc<dyn RemoteFetch>>,
    policy: CachePolicy,
    merge: MergeStrategy,
    prune_missing: bool,
}

impl std::fmt::Debug for QuerySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySource")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("policy", &self.policy)
            .field("merge", &self.merge)
            .field("prune_missing", &self.prune_missing)
            .field("has_fetch", &self.fetch.is_some())
            .finish()
    }
}

impl QuerySource {
    /// 创建构建器
    pub fn builder(name: impl Into<String>, definition: QueryDefinition) -> QuerySourceBuilder {
        QuerySourceBuilder {
            name: name.into(),
            definition,
            fetch: None,
            retry: None,
            policy: CachePolicy::StaleWhileRevalidate {
                stale_after: Duration::minutes(5),
            },
            merge: MergeStrategy::default(),
            prune_missing: false,
        }
    }

    /// 由配置创建查询源
    ///
    /// # 参数
    ///
    /// * `name` - 配置中的查询名称
    /// * `config` - 查询配置
    /// * `default_policy` - 查询未指定策略时使用的全局策略
    /// * `default_retry` - 查询未指定重试时使用的全局重试策略
    /// * `fetch` - 远程拉取动作
    pub fn from_config(
        name: &str,
        config: &QueryConfig,
        default_policy: CachePolicy,
        default_retry: RetryPolicy,
        fetch: Option<Arc<dyn RemoteFetch>>,
    ) -> Result<Arc<Self>> {
        let policy = match &config.policy {
            Some(p) => p.to_policy()?,
            None => default_policy,
        };
        let retry = match &config.retry {
            Some(r) => r.to_retry_policy(),
            None => default_retry,
        };

        let mut builder = Self::builder(name, config.definition())
            .policy(policy)
            .merge(config.merge)
            .prune_missing(config.prune_missing)
            .retry(retry);
        if let Some(fetch) = fetch {
            builder = builder.fetch(fetch);
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn fetch(&self) -> Option<&Arc<dyn RemoteFetch>> {
        self.fetch.as_ref()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn merge(&self) -> MergeStrategy {
        self.merge
    }

    pub fn prune_missing(&self) -> bool {
        self.prune_missing
    }
}

/// 查询源构建器
pub struct QuerySourceBuilder {
    name: String,
    definition: QueryDefinition,
    fetch: Option<Arc<dyn RemoteFetch>>,
    retry: Option<RetryPolicy>,
    policy: CachePolicy,
    merge: MergeStrategy,
    prune_missing: bool,
}

impl QuerySourceBuilder {
    /// 设置远程拉取动作
    pub fn fetch(mut self, fetch: Arc<dyn RemoteFetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// 给拉取动作嵌入重试策略
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    /// `Upsert` 时删除本次未拉取到的记录，默认关闭
    pub fn prune_missing(mut self, prune_missing: bool) -> Self {
        self.prune_missing = prune_missing;
        self
    }

    /// 校验并创建查询源
    ///
    /// 会刷新的策略必须带拉取动作；剪枝只对 `Upsert` 有意义。
    pub fn build(self) -> Result<Arc<QuerySource>> {
        if self.definition.entity.is_empty() {
            return Err(SyncError::PolicyMisconfiguration(format!(
                "query '{}' has an empty entity name",
                self.name
            )));
        }
        if self.policy.refreshes() && self.fetch.is_none() {
            return Err(SyncError::PolicyMisconfiguration(format!(
                "query '{}' uses {} but has no remote fetch",
                self.name, self.policy
            )));
        }
        if self.prune_missing && self.merge != MergeStrategy::Upsert {
            return Err(SyncError::PolicyMisconfiguration(format!(
                "query '{}': prune_missing requires the upsert strategy, got {:?}",
                self.name, self.merge
            )));
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(SyncError::PolicyMisconfiguration(format!(
                    "query '{}': retry max_attempts must be at least 1",
                    self.name
                )));
            }
        }

        let fetch = match (self.fetch, self.retry) {
            (Some(fetch), Some(retry)) => {
                Some(Arc::new(RetryingFetch::new(fetch, retry)) as Arc<dyn RemoteFetch>)
            }
            (fetch, _) => fetch,
        };

        let key = self.definition.key();
        Ok(Arc::new(QuerySource {
            name: self.name,
            definition: self.definition,
            key,
            fetch,
            policy: self.policy,
            merge: self.merge,
            prune_missing: self.prune_missing,
        }))
    }
}
