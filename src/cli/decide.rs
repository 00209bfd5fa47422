//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了策略求值命令的实现。

use crate::cli::{DecideArgs, PolicyKind};
use crate::config::PolicyConfig;
use crate::policy::{decide, is_stale};
use crate::registry::RefreshState;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};

pub async fn execute(args: &DecideArgs) -> Result<()> {
    let policy = match args.policy {
        PolicyKind::LocalOnly => PolicyConfig::LocalOnly,
        PolicyKind::StaleWhileRevalidate => PolicyConfig::StaleWhileRevalidate {
            stale_after_secs: args.threshold_secs,
        },
        PolicyKind::CacheFirst => PolicyConfig::CacheFirst {
            ttl_secs: args.threshold_secs,
        },
        PolicyKind::NetworkFirst => PolicyConfig::NetworkFirst,
    }
    .to_policy()?;

    let now = Utc::now();
    let state = RefreshState {
        last_synced_at: synced_at(now, args.age_secs)?,
        is_refreshing: args.in_flight,
        ..Default::default()
    };

    println!("Policy:  {}", policy);
    match args.age_secs {
        Some(age) => println!("Age:     {}s", age),
        None => println!("Age:     never synced"),
    }
    println!("Stale:   {}", is_stale(&policy, state.last_synced_at, now));
    println!("Action:  {}", decide(&policy, &state, now));
    Ok(())
}

/// 由数据年龄推算上次同步时间，超出时间范围时报错
fn synced_at(now: DateTime<Utc>, age_secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    let Some(age) = age_secs else {
        return Ok(None);
    };
    Duration::try_seconds(age)
        .and_then(|age| now.checked_sub_signed(age))
        .map(Some)
        .ok_or_else(|| anyhow!("--age-secs {} is outside the representable time range", age))
}
