//! iam-setup
//!
//! Prepares an IAM deployment: connects to the event store, runs migrations
//! in dev mode, and makes sure the configured instance has signing keys.

use std::sync::Arc;

use anyhow::{Context, Result};
use iam_command::{
    config::Config, crypto::AesGcmEncryption, db::Database, CommandContext, Commands,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to IAM_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        max_include_depth = config.max_include_depth,
        dev_mode = config.dev_mode,
        "Starting iam-setup"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let Some(instance_id) = config.instance_id else {
        warn!("IAM_INSTANCE_ID not set, skipping web key initialization");
        return Ok(());
    };

    let encryption =
        AesGcmEncryption::from_env().context("failed to load key encryption key")?;
    info!(key_id = %encryption.key_id(), "Key encryption key loaded");

    let commands = Commands::builder(Arc::new(db.event_log()), Arc::new(encryption))
        .max_include_depth(config.max_include_depth)
        .build()?;

    let ctx = CommandContext::system(instance_id);
    let created = commands.generate_initial_web_keys(&ctx).await?;
    if created.is_empty() {
        info!(instance_id = %instance_id, "Web keys already present");
    } else {
        info!(instance_id = %instance_id, keys = ?created, "Initial web keys created");
    }

    Ok(())
}
