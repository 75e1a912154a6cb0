use super::{Dialect, LogFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "ANSWERLOG_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    /// Look up `key` with the ANSWERLOG_ prefix applied.
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Storage
    if let Some(dialect) = env.get("DIALECT") {
        config.storage.dialect = dialect
            .parse::<Dialect>()
            .context("Invalid ANSWERLOG_DIALECT value")?;
    }
    if let Some(dsn) = env.get("DSN") {
        config.storage.dsn = dsn;
    }
    if let Some(val) = get_env_u32(env, "MAX_CONNECTIONS")? {
        config.storage.max_connections = val;
    }
    if let Some(val) = get_env_u64(env, "ACQUIRE_TIMEOUT_SECS")? {
        config.storage.acquire_timeout_secs = val;
    }

    // Pipeline
    if let Some(val) = get_env_usize(env, "QUEUE_CAPACITY")? {
        config.pipeline.queue_capacity = val;
    }

    // Server configuration (listen addr, upstream, log level/format)
    if let Some(addr) = env.get("LISTEN_ADDR") {
        config.server.listen_addr = addr;
    }
    if let Some(upstream) = env.get("UPSTREAM") {
        config.server.upstream = upstream;
    }
    if let Some(val) = get_env_u64(env, "UPSTREAM_TIMEOUT_MS")? {
        config.server.upstream_timeout_ms = val;
    }
    if let Some(level) = env.get("LOG_LEVEL") {
        config.server.log_level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.server.log_format = format
            .parse::<LogFormat>()
            .context("Invalid ANSWERLOG_LOG_FORMAT value")?;
    }

    Ok(())
}

fn parse_env<E: EnvSource, T>(env: &E, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    parse_env(env, key)
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    parse_env(env, key)
}

fn get_env_u32<E: EnvSource>(env: &E, key: &str) -> Result<Option<u32>> {
    parse_env(env, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    fn env(pairs: &[(&'static str, &'static str)]) -> MapEnv {
        MapEnv(pairs.iter().copied().collect())
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = RuntimeConfig::default();
        let source = env(&[
            ("DIALECT", "postgres"),
            ("DSN", "postgres://dns:secret@db/answers"),
            ("QUEUE_CAPACITY", "64"),
            ("UPSTREAM", "9.9.9.9:53"),
            ("LOG_FORMAT", "JSON"),
        ]);

        apply_env_overrides(&mut config, &source).unwrap();

        assert_eq!(config.storage.dialect, Dialect::Postgres);
        assert_eq!(config.storage.dsn, "postgres://dns:secret@db/answers");
        assert_eq!(config.pipeline.queue_capacity, 64);
        assert_eq!(config.server.upstream, "9.9.9.9:53");
        assert_eq!(config.server.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let mut config = RuntimeConfig::default();
        let source = env(&[("QUEUE_CAPACITY", "lots")]);

        let err = apply_env_overrides(&mut config, &source).unwrap_err();
        assert!(err.to_string().contains("ANSWERLOG_QUEUE_CAPACITY"));
    }

    #[test]
    fn test_invalid_dialect_is_rejected() {
        let mut config = RuntimeConfig::default();
        let source = env(&[("DIALECT", "mysql")]);

        assert!(apply_env_overrides(&mut config, &source).is_err());
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        let mut config = RuntimeConfig::default();
        let source = env(&[("LOG_FORMAT", "yaml")]);

        let err = apply_env_overrides(&mut config, &source).unwrap_err();
        assert!(err.to_string().contains("ANSWERLOG_LOG_FORMAT"));
        assert_eq!(config.server.log_format, LogFormat::Text);
    }
}
