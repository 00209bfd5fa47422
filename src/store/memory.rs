//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于内存的事务型本地存储实现。

use super::{LocalStore, Record, RecordStream, TxnBody, WriteHandle};
use crate::error::{Result, SyncError};
use crate::key::QueryDefinition;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// 实体名 -> (主键 -> 内容)
type Collections = HashMap<String, BTreeMap<String, Value>>;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    data: RwLock<Collections>,
    /// 每次提交后广播被修改的实体名
    changes: broadcast::Sender<String>,
    commits: AtomicU64,
    /// 下一次提交时注入的失败
    injected_failure: Mutex<Option<String>>,
}

impl Inner {
    async fn snapshot(&self, query: &QueryDefinition) -> Vec<Record> {
        let data = self.data.read().await;
        let mut records: Vec<Record> = data
            .get(&query.entity)
            .map(|rows| {
                rows.iter()
                    .map(|(id, body)| Record::new(id.clone(), body.clone()))
                    .filter(|r| query.matches(r))
                    .collect()
            })
            .unwrap_or_default();
        query.order(&mut records);
        records
    }
}

/// 内存存储
///
/// 事务在数据副本上执行，成功后整体替换，失败则丢弃副本。
/// 克隆得到的是同一个存储的另一个句柄。
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("commits", &self.commit_count())
            .finish()
    }
}

impl MemoryStore {
    /// 创建空的内存存储
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(HashMap::new()),
                changes,
                commits: AtomicU64::new(0),
                injected_failure: Mutex::new(None),
            }),
        }
    }

    /// 已提交的事务数量
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// 让下一次事务在提交时失败
    ///
    /// 事务体照常执行，但所有写入都会被丢弃。
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.inner.injected_failure.lock() {
            *slot = Some(reason.into());
        }
    }

    /// 在一个事务中写入（插入或覆盖）一批记录
    pub async fn seed(&self, entity: &str, records: Vec<Record>) -> Result<()> {
        let entity = entity.to_string();
        self.transaction(Box::new(move |tx| {
            for record in records {
                if tx.contains(&entity, &record.id) {
                    tx.update(&entity, record)?;
                } else {
                    tx.insert(&entity, record)?;
                }
            }
            Ok(())
        }))
        .await
    }

    fn take_injected_failure(&self) -> Option<String> {
        self.inner
            .injected_failure
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }
}

struct MemoryWriteHandle<'a> {
    data: &'a mut Collections,
    touched: BTreeSet<String>,
}

impl WriteHandle for MemoryWriteHandle<'_> {
    fn contains(&self, entity: &str, id: &str) -> bool {
        self.data
            .get(entity)
            .map(|rows| rows.contains_key(id))
            .unwrap_or(false)
    }

    fn get(&self, entity: &str, id: &str) -> Option<Record> {
        self.data
            .get(entity)
            .and_then(|rows| rows.get(id))
            .map(|body| Record::new(id, body.clone()))
    }

    fn ids_in_scope(&self, query: &QueryDefinition) -> Vec<String> {
        self.data
            .get(&query.entity)
            .map(|rows| {
                rows.iter()
                    .filter(|(id, body)| query.matches(&Record::new(id.as_str(), (*body).clone())))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert(&mut self, entity: &str, record: Record) -> Result<()> {
        let rows = self.data.entry(entity.to_string()).or_default();
        if rows.contains_key(&record.id) {
            return Err(SyncError::Store(format!(
                "constraint violation: duplicate primary key {}/{}",
                entity, record.id
            )));
        }
        rows.insert(record.id, record.body);
        self.touched.insert(entity.to_string());
        Ok(())
    }

    fn update(&mut self, entity: &str, record: Record) -> Result<()> {
        match self.data.get_mut(entity).and_then(|rows| rows.get_mut(&record.id)) {
            Some(body) => {
                *body = record.body;
                self.touched.insert(entity.to_string());
                Ok(())
            }
            None => Err(SyncError::Store(format!(
                "update of missing row {}/{}",
                entity, record.id
            ))),
        }
    }

    fn delete(&mut self, entity: &str, id: &str) -> Result<bool> {
        let removed = self
            .data
            .get_mut(entity)
            .map(|rows| rows.remove(id).is_some())
            .unwrap_or(false);
        if removed {
            self.touched.insert(entity.to_string());
        }
        Ok(removed)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    #[instrument(skip(self), level = "debug", fields(entity = %query.entity))]
    async fn read(&self, query: &QueryDefinition) -> Result<Vec<Record>> {
        let records = self.inner.snapshot(query).await;
        debug!("MemoryStore read: {} rows", records.len());
        Ok(records)
    }

    fn subscribe(&self, query: &QueryDefinition) -> RecordStream {
        let rx = self.inner.changes.subscribe();
        let state = (self.inner.clone(), query.clone(), rx, true);
        stream::unfold(state, |(inner, query, mut rx, first)| async move {
            if !first {
                loop {
                    match rx.recv().await {
                        Ok(entity) if entity == query.entity => break,
                        Ok(_) => continue,
                        // 丢失了通知，直接重新读取一次
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("MemoryStore subscriber lagged by {} commits", skipped);
                            break;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
            let batch = inner.snapshot(&query).await;
            Some((batch, (inner, query, rx, false)))
        })
        .boxed()
    }

    #[instrument(skip(self, body), level = "debug")]
    async fn transaction(&self, body: TxnBody<'_>) -> Result<()> {
        let mut guard = self.inner.data.write().await;
        let mut staging = guard.clone();
        let mut handle = MemoryWriteHandle {
            data: &mut staging,
            touched: BTreeSet::new(),
        };

        if let Err(e) = body(&mut handle) {
            debug!("MemoryStore transaction rolled back: {}", e);
            return Err(e);
        }
        if let Some(reason) = self.take_injected_failure() {
            debug!("MemoryStore transaction failed at commit: {}", reason);
            return Err(SyncError::Store(format!("commit failed: {}", reason)));
        }

        let touched = std::mem::take(&mut handle.touched);
        *guard = staging;
        drop(guard);

        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        for entity in touched {
            // 没有订阅者时发送失败是正常的
            let _ = self.inner.changes.send(entity);
        }
        debug!("MemoryStore transaction committed");
        Ok(())
    }
}
