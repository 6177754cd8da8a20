//! keyglowd — per-key RGB lighting daemon.

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use keyglow::config::{self, Configuration};
use keyglow::device_watcher::DeviceWatcher;
use keyglow::display::{DisplayManager, EvdevDisplay};
use keyglow::effect::EffectRegistry;
use keyglow::service::Service;

mod cli;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keyglow=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(config::default_config_path);
    let configuration = Configuration::load_or_create(&path)
        .with_context(|| format!("loading configuration {}", path.display()))?;
    info!("configuration: {}", path.display());

    let mut service = Service::new(configuration, EffectRegistry::with_builtins());
    service.set_auto_quit(cli.auto_quit);
    service.set_active(!cli.inactive);

    // No display connection means no key routing is possible; that is fatal.
    let display = DisplayManager::connect(Box::new(EvdevDisplay::open()?))
        .context("display initialization failed")?;
    let watcher = DeviceWatcher::new().context("udev monitor initialization failed")?;

    service.run(watcher, display).await
}
