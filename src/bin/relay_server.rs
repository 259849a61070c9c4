use std::{error::Error, net::SocketAddr, path::PathBuf, sync::Arc};

use clap::{Parser, ValueEnum};
use datarelay::{
    IndexStore, MemoryStore, RelayComponent, RelayConfig, RelayServer, config::default_config_path,
};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Component {
    /// Opaque payloads keyed by type and object id
    Memory,
    /// Sorted index caches answering index queries
    Index,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration; defaults apply when it does not exist
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,
    /// Component that handles received messages
    #[arg(long, value_enum, default_value_t = Component::Memory)]
    component: Component,
    /// Listen for new connections at address instead of the configured one
    address: Option<SocketAddr>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        RelayConfig::load(&cli.config)?
    } else {
        info!("no configuration at {}, using defaults", cli.config.display());
        RelayConfig::default()
    };
    let address = cli.address.unwrap_or(config.server.listen_address);

    match cli.component {
        Component::Memory => serve(Arc::new(MemoryStore::default()), &config, address),
        Component::Index => serve(Arc::new(IndexStore::default()), &config, address),
    }
}

fn serve<C: RelayComponent + 'static>(
    component: Arc<C>,
    config: &RelayConfig,
    address: SocketAddr,
) -> Result<(), Box<dyn Error>> {
    component.initialize(config)?;

    let server = RelayServer::bind(address, config, Arc::clone(&component))?;
    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        component.shutdown();
        handle.shutdown();
    })?;

    server.listen()?;
    Ok(())
}
