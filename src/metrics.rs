//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了刷新协调器的指标收集功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 刷新事件
pub mod event {
    pub const STARTED: &str = "started";
    pub const COALESCED: &str = "coalesced";
    pub const SKIPPED: &str = "skipped";
    pub const SUCCEEDED: &str = "succeeded";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";
}

/// 指标收集器
///
/// 以 (查询, 事件/操作) 为键，查询键本身可能包含冒号，所以不拼接成字符串。
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 刷新事件计数
    pub refreshes_total: Arc<Mutex<HashMap<(String, String), u64>>>,
    /// 操作耗时：(累计秒数, 次数)
    pub operation_duration: Arc<Mutex<HashMap<(String, String), (f64, u64)>>>,
    /// 合并写入的行数
    pub rows_merged: Arc<Mutex<HashMap<String, u64>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

// 指标不影响正确性，锁中毒时继续使用内部数据
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// 记录刷新事件
    ///
    /// # 参数
    ///
    /// * `query` - 查询键
    /// * `event` - 事件名（见 [`event`]）
    pub fn record_refresh(&self, query: &str, event: &str) {
        let span = span!(Level::TRACE, "refresh_event", query, event);
        let _enter = span.enter();
        let mut map = lock(&self.refreshes_total);
        *map.entry((query.to_string(), event.to_string())).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, query: &str, op: &str, duration_secs: f64) {
        let mut map = lock(&self.operation_duration);
        let entry = map
            .entry((query.to_string(), op.to_string()))
            .or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 记录合并写入行数
    pub fn record_rows(&self, query: &str, rows: usize) {
        let mut map = lock(&self.rows_merged);
        *map.entry(query.to_string()).or_insert(0) += rows as u64;
    }

    /// 读取事件计数
    pub fn refresh_count(&self, query: &str, event: &str) -> u64 {
        lock(&self.refreshes_total)
            .get(&(query.to_string(), event.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// 读取操作的平均耗时（秒）
    pub fn average_duration(&self, query: &str, op: &str) -> Option<f64> {
        lock(&self.operation_duration)
            .get(&(query.to_string(), op.to_string()))
            .filter(|(_, count)| *count > 0)
            .map(|(total, count)| total / *count as f64)
    }
}

/// 获取指标字符串
///
/// 以 Prometheus 文本格式输出所有指标，按标签排序保证输出稳定
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    let mut refreshes: Vec<_> = lock(&metrics.refreshes_total)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    refreshes.sort();
    for ((query, event), v) in refreshes {
        output.push_str(&format!(
            "sync_refresh_events_total{{query=\"{}\", event=\"{}\"}} {}\n",
            query, event, v
        ));
    }

    let mut durations: Vec<_> = lock(&metrics.operation_duration)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    durations.sort_by(|a, b| a.0.cmp(&b.0));
    for ((query, op), (total, count)) in durations {
        output.push_str(&format!(
            "sync_operation_duration_seconds_sum{{query=\"{}\", operation=\"{}\"}} {}\n",
            query, op, total
        ));
        output.push_str(&format!(
            "sync_operation_duration_seconds_count{{query=\"{}\", operation=\"{}\"}} {}\n",
            query, op, count
        ));
    }

    let mut rows: Vec<_> = lock(&metrics.rows_merged)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    rows.sort();
    for (query, v) in rows {
        output.push_str(&format!(
            "sync_rows_merged_total{{query=\"{}\"}} {}\n",
            query, v
        ));
    }
    output
}
