//! Framecast agent entry point.

mod app;
mod config;
mod producer;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting framecast agent"
    );

    // Optional first argument overrides the config location.
    let config = match std::env::args_os().nth(1) {
        Some(path) => config::Config::load_from(&PathBuf::from(path))?,
        None => config::Config::load()?,
    };
    tracing::info!(
        port = config.server_port,
        frames_dir = %config.frames_dir.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
