use anyhow::Context;
use relay_rs::api::ApiServer;
use relay_rs::config::Config;
use relay_rs::context::RelayContext;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RELAY_CONFIG, else ./config.toml when present
    let config_path = std::env::var_os("RELAY_CONFIG")
        .map(PathBuf::from)
        .or_else(|| {
            let default = PathBuf::from("config.toml");
            default.exists().then_some(default)
        });

    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config);

    info!("Starting relay-rs API server");
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    info!("  Postfix directory: {}", config.paths.postfix_dir.display());
    info!("  Backups: {}", config.backup.backup_dir.display());

    let relay = RelayContext::system(config);
    relay
        .prepare()
        .await
        .context("Failed to prepare state directory")?;

    let server = ApiServer::new(relay);
    if let Err(e) = server.run().await {
        error!("API server error: {}", e);
        return Err(e).context("API server stopped");
    }

    Ok(())
}
