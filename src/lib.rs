//! oxsync - 响应式缓存一致性引擎
//!
//! 让本地可查询存储按可配置的新鲜度策略与远端数据源保持同步，
//! 并保证每个逻辑查询同一时刻最多只有一个进行中的远程拉取。

#![doc(html_root_url = "https://docs.rs/oxsync/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod key;
pub mod merge;
pub mod metrics;
pub mod observer;
pub mod policy;
pub mod registry;
pub mod source;
pub mod store;
pub mod telemetry;

// Re-export commonly used items
pub use config::Config;
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use error::{ErrorKind, Result, SyncError};
pub use fetch::{fetch_fn, record_fetch_fn, FetchResult, RemoteFetch, RetryPolicy};
pub use key::{QueryDefinition, QueryKey};
pub use merge::{MergeReport, MergeStrategy};
pub use observer::{ObserverBus, RefreshSnapshot};
pub use policy::{CachePolicy, Clock, ManualClock, RefreshAction, SystemClock};
pub use registry::QueryRegistry;
pub use source::QuerySource;
pub use store::{Entity, LocalStore, MemoryStore, Record};

/// oxsync 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
