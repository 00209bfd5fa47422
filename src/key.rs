//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了查询定义和查询键。

use crate::store::Record;
use ahash::RandomState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// 固定种子，保证同一进程内相同查询的指纹稳定
const FINGERPRINT_SEEDS: (u64, u64, u64, u64) = (
    0x6f78_7379_6e63_0001,
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
);

/// 排序字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// 字段名
    pub field: String,
    /// 是否降序
    #[serde(default)]
    pub descending: bool,
}

/// 查询定义
///
/// 描述一个逻辑查询：实体类型 + 过滤条件 + 排序规则。
/// 协调器本身不解释它，只用它生成查询键并交给本地存储。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// 实体类型名称
    pub entity: String,
    /// 等值过滤条件（字段名 -> 值）
    #[serde(default)]
    pub filter: BTreeMap<String, Value>,
    /// 排序规则
    #[serde(default)]
    pub sort: Vec<SortField>,
}

impl QueryDefinition {
    /// 创建针对某个实体类型的查询定义
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: BTreeMap::new(),
            sort: Vec::new(),
        }
    }

    /// 添加等值过滤条件
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    /// 添加排序字段
    pub fn sort_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            descending,
        });
        self
    }

    /// 判断记录是否落在该查询的范围内
    pub fn matches(&self, record: &Record) -> bool {
        self.filter
            .iter()
            .all(|(field, expected)| record.field(field) == Some(expected))
    }

    /// 按排序规则排列记录，未指定排序或相等时按主键排列
    pub fn order(&self, records: &mut [Record]) {
        records.sort_by(|a, b| {
            for sort in &self.sort {
                let ord = compare_values(a.field(&sort.field), b.field(&sort.field));
                let ord = if sort.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });
    }

    /// 过滤与排序的规范化表示
    ///
    /// 形如 `[{"done":false},[["due",true]]]` 的 JSON 文本。字段名和值都按 JSON 转义，
    /// 不同的查询不会得到相同的文本；BTreeMap 保证字段顺序稳定。
    pub fn canonical(&self) -> String {
        let filter: Map<String, Value> = self
            .filter
            .iter()
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        let sort = self
            .sort
            .iter()
            .map(|s| {
                Value::Array(vec![
                    Value::String(s.field.clone()),
                    Value::Bool(s.descending),
                ])
            })
            .collect();
        Value::Array(vec![Value::Object(filter), Value::Array(sort)]).to_string()
    }

    /// 生成查询键
    pub fn key(&self) -> QueryKey {
        QueryKey::new(&self.entity, self.canonical())
    }
}

fn value_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x @ Value::Array(_)), Some(y @ Value::Array(_)))
        | (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}

struct KeyInner {
    entity: String,
    canonical: String,
    fingerprint: u64,
}

/// 查询键
///
/// 不可变、可哈希、可比较，克隆只增加引用计数，可以在线程间自由共享。
/// 哈希直接使用预先计算好的指纹，相等性比较实体名和规范化文本。
#[derive(Clone)]
pub struct QueryKey {
    inner: Arc<KeyInner>,
}

impl QueryKey {
    /// 由实体类型和规范化参数创建查询键
    pub fn new(entity: impl Into<String>, canonical: impl Into<String>) -> Self {
        let entity = entity.into();
        let canonical = canonical.into();
        let (k0, k1, k2, k3) = FINGERPRINT_SEEDS;
        let state = RandomState::with_seeds(k0, k1, k2, k3);
        let fingerprint = state.hash_one((entity.as_str(), canonical.as_str()));
        Self {
            inner: Arc::new(KeyInner {
                entity,
                canonical,
                fingerprint,
            }),
        }
    }

    /// 实体类型
    pub fn entity(&self) -> &str {
        &self.inner.entity
    }

    /// 规范化参数
    pub fn canonical(&self) -> &str {
        &self.inner.canonical
    }

    /// 预计算指纹
    pub fn fingerprint(&self) -> u64 {
        self.inner.fingerprint
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.fingerprint == other.inner.fingerprint
                && self.inner.entity == other.inner.entity
                && self.inner.canonical == other.inner.canonical)
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.fingerprint);
    }
}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity()
            .cmp(other.entity())
            .then_with(|| self.canonical().cmp(other.canonical()))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.entity, self.inner.canonical)
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryKey")
            .field("entity", &self.inner.entity)
            .field("canonical", &self.inner.canonical)
            .field("fingerprint", &format_args!("{:016x}", self.inner.fingerprint))
            .finish()
    }
}
