//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了合并引擎，负责把拉取到的远程记录在单个事务中合并进本地存储。

use crate::error::{Result, SyncError};
use crate::key::QueryDefinition;
use crate::store::{LocalStore, Record, WriteHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

/// 合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// 删除查询范围内的所有本地记录，再插入拉取到的记录
    Replace,
    /// 按主键插入或更新，不删除本次未拉取到的记录
    #[default]
    Upsert,
    /// 只插入本地不存在的主键，从不更新或删除
    AppendNew,
}

/// 合并统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl MergeReport {
    /// 实际写入的行数
    pub fn rows_written(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// 合并引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    /// 在一个事务中合并记录
    ///
    /// # 参数
    ///
    /// * `store` - 本地存储
    /// * `strategy` - 合并策略
    /// * `definition` - 查询定义，决定实体和 `Replace`/剪枝的范围
    /// * `fetched` - 拉取到的记录
    /// * `prune_missing` - 仅对 `Upsert` 生效：删除范围内未被拉取到的记录
    ///
    /// # 返回值
    ///
    /// 成功返回合并统计；任何失败都会回滚整个事务并返回 `SyncError::Merge`
    #[instrument(
        skip(store, definition, fetched),
        level = "debug",
        fields(entity = %definition.entity, rows = fetched.len())
    )]
    pub async fn merge(
        store: &dyn LocalStore,
        strategy: MergeStrategy,
        definition: &QueryDefinition,
        fetched: Vec<Record>,
        prune_missing: bool,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        let entity = definition.entity.as_str();

        let result = store
            .transaction(Box::new(|tx| {
                report = match strategy {
                    MergeStrategy::Replace => replace(tx, entity, definition, fetched)?,
                    MergeStrategy::Upsert => upsert(tx, entity, definition, fetched, prune_missing)?,
                    MergeStrategy::AppendNew => append_new(tx, entity, fetched)?,
                };
                Ok(())
            }))
            .await;

        match result {
            Ok(()) => {
                debug!(
                    "Merge committed: strategy={:?}, inserted={}, updated={}, deleted={}, skipped={}",
                    strategy, report.inserted, report.updated, report.deleted, report.skipped
                );
                Ok(report)
            }
            Err(SyncError::Merge(msg)) => Err(SyncError::Merge(msg)),
            Err(e) => {
                warn!("Merge rolled back: {}", e);
                Err(SyncError::Merge(e.to_string()))
            }
        }
    }
}

/// 删除查询范围内的全部记录后插入拉取结果；范围外已存在的主键会违反约束
fn replace(
    tx: &mut dyn WriteHandle,
    entity: &str,
    definition: &QueryDefinition,
    fetched: Vec<Record>,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    for id in tx.ids_in_scope(definition) {
        if tx.delete(entity, &id)? {
            report.deleted += 1;
        }
    }
    for record in fetched {
        tx.insert(entity, record)?;
        report.inserted += 1;
    }
    Ok(report)
}

fn upsert(
    tx: &mut dyn WriteHandle,
    entity: &str,
    definition: &QueryDefinition,
    fetched: Vec<Record>,
    prune_missing: bool,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let mut seen = HashSet::with_capacity(fetched.len());
    for record in fetched {
        seen.insert(record.id.clone());
        if tx.contains(entity, &record.id) {
            tx.update(entity, record)?;
            report.updated += 1;
        } else {
            tx.insert(entity, record)?;
            report.inserted += 1;
        }
    }
    if prune_missing {
        for id in tx.ids_in_scope(definition) {
            if !seen.contains(&id) && tx.delete(entity, &id)? {
                report.deleted += 1;
            }
        }
    }
    Ok(report)
}

fn append_new(tx: &mut dyn WriteHandle, entity: &str, fetched: Vec<Record>) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    for record in fetched {
        if tx.contains(entity, &record.id) {
            report.skipped += 1;
        } else {
            tx.insert(entity, record)?;
            report.inserted += 1;
        }
    }
    Ok(report)
}
