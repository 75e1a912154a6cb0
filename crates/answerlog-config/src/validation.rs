// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_storage_config(&config.storage)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_server_config(&config.server)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.dsn.trim().is_empty() {
        bail!("storage.dsn must not be empty");
    }

    if config.max_connections == 0 {
        bail!("storage.max_connections must be greater than 0");
    }

    if config.acquire_timeout_secs == 0 {
        bail!("storage.acquire_timeout_secs must be greater than 0");
    }

    if config.dialect == Dialect::Postgres
        && !(config.dsn.starts_with("postgres://") || config.dsn.starts_with("postgresql://"))
    {
        bail!("storage.dsn must be a postgres:// URL for the postgres dialect");
    }

    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<()> {
    if config.queue_capacity == 0 {
        bail!("pipeline.queue_capacity must be greater than 0");
    }

    if config.queue_capacity > 1_000_000 {
        warn!(
            queue_capacity = config.queue_capacity,
            "pipeline.queue_capacity is very large; may cause memory issues"
        );
    }

    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    config
        .listen_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("server.listen_addr '{}' is not host:port", config.listen_addr))?;

    config
        .upstream
        .parse::<SocketAddr>()
        .with_context(|| format!("server.upstream '{}' is not ip:port", config.upstream))?;

    if config.upstream_timeout_ms == 0 {
        bail!("server.upstream_timeout_ms must be greater than 0");
    }

    Ok(())
}
