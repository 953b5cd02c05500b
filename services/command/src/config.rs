use anyhow::{Context, Result};
use iam_id::InstanceId;

use crate::commands::DEFAULT_MAX_INCLUDE_DEPTH;
use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub max_include_depth: usize,
    /// Instance whose web keys `iam-setup` initializes.
    pub instance_id: Option<InstanceId>,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("IAM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("IAM_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let max_include_depth = match std::env::var("IAM_MAX_INCLUDE_DEPTH") {
            Ok(raw) => parse_depth(&raw)?,
            Err(_) => DEFAULT_MAX_INCLUDE_DEPTH,
        };

        let instance_id = std::env::var("IAM_INSTANCE_ID")
            .ok()
            .map(|raw| raw.parse::<InstanceId>())
            .transpose()
            .context("IAM_INSTANCE_ID is not a valid instance id")?;

        let database = DbConfig::from_env().context("invalid database configuration")?;

        Ok(Self {
            log_level,
            dev_mode,
            max_include_depth,
            instance_id,
            database,
        })
    }
}

fn parse_depth(raw: &str) -> Result<usize> {
    let depth: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("IAM_MAX_INCLUDE_DEPTH must be a number, got {raw:?}"))?;
    anyhow::ensure!(depth >= 1, "IAM_MAX_INCLUDE_DEPTH must be at least 1");
    Ok(depth)
}
