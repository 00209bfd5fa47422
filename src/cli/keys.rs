//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了查询键列表命令的实现。

use crate::cli::KeysArgs;
use crate::config::Config;
use anyhow::{Context, Result};
use serde_json::json;

pub async fn execute(args: &KeysArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load '{}'", args.config.display()))?;
    config.validate()?;
    let default_policy = config.global.default_policy.to_policy()?;

    let mut names: Vec<_> = config.queries.keys().collect();
    names.sort();

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let query = &config.queries[name];
        let policy = match &query.policy {
            Some(p) => p.to_policy()?,
            None => default_policy,
        };
        let key = query.definition().key();
        rows.push((name.clone(), key, policy, query.merge));
    }

    if args.json {
        let output: Vec<_> = rows
            .iter()
            .map(|(name, key, policy, merge)| {
                json!({
                    "name": name,
                    "key": key.to_string(),
                    "fingerprint": format!("{:016x}", key.fingerprint()),
                    "policy": policy.to_string(),
                    "merge": merge,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("=== Configured Queries ===\n");
    if rows.is_empty() {
        println!("No queries configured.");
        return Ok(());
    }
    for (name, key, policy, merge) in rows {
        println!("{}", name);
        println!("  Key:         {}", key);
        println!("  Fingerprint: {:016x}", key.fingerprint());
        println!("  Policy:      {}", policy);
        println!("  Merge:       {:?}", merge);
    }
    Ok(())
}
