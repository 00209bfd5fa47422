//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了本地存储适配器的接口。
//!
//! 协调器从不检查记录内容，只把读、订阅和事务委托给存储。

pub mod memory;

use crate::error::{Result, SyncError};
use crate::key::QueryDefinition;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

pub use memory::MemoryStore;

/// 本地记录
///
/// 主键 + JSON 文档。类型化的实体通过 [`Entity`] 与记录互相转换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 主键
    pub id: String,
    /// 记录内容
    pub body: Value,
}

impl Record {
    /// 创建记录
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }

    /// 读取顶层字段
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// 由类型化实体生成记录
    pub fn from_entity<T: Entity>(entity: &T) -> Result<Self> {
        Ok(Self {
            id: entity.primary_key(),
            body: serde_json::to_value(entity)?,
        })
    }

    /// 反序列化为类型化实体
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(SyncError::from)
    }
}

/// 可以写入本地存储的实体类型
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 主键
    fn primary_key(&self) -> String;
}

/// 记录批次流
///
/// 第一个批次是订阅时刻的快照，之后每次相关事务提交都会推送一个新批次。
pub type RecordStream = BoxStream<'static, Vec<Record>>;

/// 事务写句柄
///
/// 所有写入在事务体返回 `Ok` 之后才对读者可见。
pub trait WriteHandle {
    /// 主键是否存在
    fn contains(&self, entity: &str, id: &str) -> bool;

    /// 读取单条记录（包含本事务内尚未提交的写入）
    fn get(&self, entity: &str, id: &str) -> Option<Record>;

    /// 查询范围内所有记录的主键
    fn ids_in_scope(&self, query: &QueryDefinition) -> Vec<String>;

    /// 插入记录，主键已存在时违反约束
    fn insert(&mut self, entity: &str, record: Record) -> Result<()>;

    /// 更新记录，主键不存在时失败
    fn update(&mut self, entity: &str, record: Record) -> Result<()>;

    /// 删除记录，返回记录是否存在
    fn delete(&mut self, entity: &str, id: &str) -> Result<bool>;
}

/// 事务体
pub type TxnBody<'a> = Box<dyn FnOnce(&mut dyn WriteHandle) -> Result<()> + Send + 'a>;

/// 本地存储适配器
///
/// 事务要么全部生效，要么全部回滚；存储自身的变更通知负责把新数据推给读者。
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// 读取查询结果（有序）
    ///
    /// 不得等待任何远程刷新。
    async fn read(&self, query: &QueryDefinition) -> Result<Vec<Record>>;

    /// 订阅查询结果
    fn subscribe(&self, query: &QueryDefinition) -> RecordStream;

    /// 在单个原子事务中执行事务体
    async fn transaction(&self, body: TxnBody<'_>) -> Result<()>;
}
