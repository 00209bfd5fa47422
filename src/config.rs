//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步引擎的配置结构和解析逻辑。

use crate::error::{Result, SyncError};
use crate::fetch::RetryPolicy;
use crate::key::{QueryDefinition, SortField};
use crate::merge::MergeStrategy;
use crate::policy::CachePolicy;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;

/// 策略时长的绝对值上限（一年）
const MAX_POLICY_SECS: i64 = 86400 * 365;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub queries: HashMap<String, QueryConfig>,
}

/// 全局配置
///
/// 定义适用于所有查询的默认配置
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 查询未指定策略时使用的缓存策略
    pub default_policy: PolicyConfig,
    /// 查询未指定重试时使用的重试策略
    pub retry: RetryConfig,
    /// 日志过滤表达式，`RUST_LOG` 优先
    pub log_filter: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_policy: PolicyConfig::StaleWhileRevalidate {
                stale_after_secs: 300,
            },
            retry: RetryConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

/// 查询配置
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct QueryConfig {
    /// 实体名称
    pub entity: String,
    /// 字段等值过滤
    #[serde(default)]
    pub filter: BTreeMap<String, Value>,
    /// 排序字段
    #[serde(default)]
    pub sort: Vec<SortField>,
    /// 缓存策略，可覆盖全局配置
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
    /// 合并策略
    #[serde(default)]
    pub merge: MergeStrategy,
    /// `Upsert` 时删除未拉取到的记录
    #[serde(default)]
    pub prune_missing: bool,
    /// 重试策略，可覆盖全局配置
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl QueryConfig {
    /// 对应的查询定义
    pub fn definition(&self) -> QueryDefinition {
        QueryDefinition {
            entity: self.entity.clone(),
            filter: self.filter.clone(),
            sort: self.sort.clone(),
        }
    }
}

/// 缓存策略配置
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    LocalOnly,
    StaleWhileRevalidate { stale_after_secs: i64 },
    CacheFirst { ttl_secs: i64 },
    NetworkFirst,
}

impl PolicyConfig {
    /// 转换为缓存策略
    ///
    /// 零或负数是合法输入（总是刷新）；绝对值超过一年视为配置错误。
    pub fn to_policy(&self) -> Result<CachePolicy> {
        let checked = |name: &str, secs: i64| {
            if !(-MAX_POLICY_SECS..=MAX_POLICY_SECS).contains(&secs) {
                Err(SyncError::PolicyMisconfiguration(format!(
                    "{} of {} seconds is outside one year",
                    name, secs
                )))
            } else {
                Ok(Duration::seconds(secs))
            }
        };

        Ok(match *self {
            PolicyConfig::LocalOnly => CachePolicy::LocalOnly,
            PolicyConfig::StaleWhileRevalidate { stale_after_secs } => {
                CachePolicy::StaleWhileRevalidate {
                    stale_after: checked("stale_after_secs", stale_after_secs)?,
                }
            }
            PolicyConfig::CacheFirst { ttl_secs } => CachePolicy::CacheFirst {
                ttl: checked("ttl_secs", ttl_secs)?,
            },
            PolicyConfig::NetworkFirst => CachePolicy::NetworkFirst,
        })
    }
}

/// 重试配置
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 基础退避时间（毫秒）
    pub base_delay_ms: u64,
    /// 退避上限（毫秒）
    pub max_delay_ms: u64,
    /// 是否启用抖动
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_backoff(
                std::time::Duration::from_millis(self.base_delay_ms),
                std::time::Duration::from_millis(self.max_delay_ms),
            )
            .with_jitter(self.jitter)
    }

    fn validate(&self, scope: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::Config(format!(
                "{} retry max_attempts cannot be zero",
                scope
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(SyncError::Config(format!(
                "{} retry base_delay_ms ({}) cannot exceed max_delay_ms ({})",
                scope, self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

impl Config {
    /// 解析 TOML 配置
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// 从文件加载 TOML 配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> Result<()> {
        // 验证配置版本
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(SyncError::Config(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                )));
            }
        }

        // 验证全局配置
        self.global.default_policy.to_policy()?;
        self.global.retry.validate("Global")?;

        for (name, query) in &self.queries {
            if name.trim().is_empty() {
                return Err(SyncError::Config("Query name cannot be empty".to_string()));
            }
            if query.entity.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "Query '{}' entity cannot be empty",
                    name
                )));
            }
            if let Some(policy) = &query.policy {
                policy.to_policy()?;
            }
            if let Some(retry) = &query.retry {
                retry.validate(&format!("Query '{}'", name))?;
            }
            if query.prune_missing && query.merge != MergeStrategy::Upsert {
                return Err(SyncError::PolicyMisconfiguration(format!(
                    "Query '{}': prune_missing requires the upsert strategy",
                    name
                )));
            }
        }

        Ok(())
    }
}
