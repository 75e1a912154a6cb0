use anyhow::{Context, Result};
use answerlog_config::{Dialect, RuntimeConfig};
use clap::Parser;
use std::path::PathBuf;

/// DNS forwarder recording answered domain names in SQL
#[derive(Parser)]
#[command(name = "answerlog")]
#[command(version)]
#[command(about = "DNS forwarder recording answered domain names in SQL", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// UDP listen address, e.g. 127.0.0.1:5353 (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Upstream resolver, e.g. 1.1.1.1:53 (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    upstream: Option<String>,

    /// Storage dialect: sqlite or postgres
    #[arg(short, long, value_name = "DIALECT")]
    dialect: Option<Dialect>,

    /// Database DSN: sqlite file path / ":memory:" or postgres:// URL
    #[arg(long, value_name = "DSN")]
    dsn: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    apply_cli_overrides(&mut config, cli);
    config.validate().context("Invalid configuration")?;

    answerlog::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: Cli) {
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = cli.upstream {
        config.server.upstream = upstream;
    }
    if let Some(dialect) = cli.dialect {
        config.storage.dialect = dialect;
    }
    if let Some(dsn) = cli.dsn {
        config.storage.dsn = dsn;
    }
    if let Some(level) = cli.log_level {
        config.server.log_level = level;
    }
}
