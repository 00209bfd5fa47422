//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了配置校验命令的实现。

use crate::cli::CheckArgs;
use crate::config::Config;
use anyhow::{Context, Result};

pub async fn execute(args: &CheckArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load '{}'", args.config.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration '{}'", args.config.display()))?;

    let default_policy = config.global.default_policy.to_policy()?;
    let mut names: Vec<_> = config.queries.keys().collect();
    names.sort();

    let mut refreshing = 0;
    for name in &names {
        let query = &config.queries[*name];
        let policy = match &query.policy {
            Some(p) => p.to_policy()?,
            None => default_policy,
        };
        if policy.refreshes() {
            refreshing += 1;
        }
    }

    println!(
        "✅ Configuration valid: {} queries ({} need a remote fetch action)",
        names.len(),
        refreshing
    );
    Ok(())
}
