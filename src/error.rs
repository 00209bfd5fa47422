//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步引擎的错误类型和分类。

use thiserror::Error;

/// 同步引擎错误类型枚举
///
/// 所有变体都只携带字符串，从而可以 `Clone`：同一次刷新的结果会被
/// 分发给所有等待者，错误也需要被复制到每个等待者以及观察者。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// 可重试的网络错误（连接失败、超时等）
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// 不可重试的网络错误（鉴权、校验失败等）
    #[error("Permanent network error: {0}")]
    PermanentNetwork(String),

    /// 合并事务失败，事务已回滚
    #[error("Merge error: {0}")]
    Merge(String),

    /// 策略配置错误（调用方编程错误）
    #[error("Policy misconfiguration: {0}")]
    PolicyMisconfiguration(String),

    /// 本地存储错误
    #[error("Store error: {0}")]
    Store(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 未注册的查询
    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    /// 刷新被协调器重置取消
    #[error("Refresh cancelled: {0}")]
    Cancelled(String),

    /// IO错误
    #[error("IO error: {0}")]
    Io(String),
}

/// 面向观察者的扁平错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientNetwork,
    PermanentNetwork,
    Merge,
    PolicyMisconfiguration,
    Store,
    Serialization,
    Config,
    UnknownQuery,
    Cancelled,
    Io,
}

impl SyncError {
    /// 返回错误的分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            SyncError::PermanentNetwork(_) => ErrorKind::PermanentNetwork,
            SyncError::Merge(_) => ErrorKind::Merge,
            SyncError::PolicyMisconfiguration(_) => ErrorKind::PolicyMisconfiguration,
            SyncError::Store(_) => ErrorKind::Store,
            SyncError::Serialization(_) => ErrorKind::Serialization,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::UnknownQuery(_) => ErrorKind::UnknownQuery,
            SyncError::Cancelled(_) => ErrorKind::Cancelled,
            SyncError::Io(_) => ErrorKind::Io,
        }
    }

    /// 是否为可重试错误
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(e: toml::de::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

/// 同步操作结果类型别名
pub type Result<T> = std::result::Result<T, SyncError>;
