//! Logos sync server binary.
//!
//! Configuration comes from `LOGOS_SYNC_*` environment variables (see
//! [`ServerConfig::from_vars`]); logging from `RUST_LOG`.

use log::info;
use logos_sync::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting logos-sync on {} (poll timeout {:?}, history {} steps)",
        config.bind_addr, config.poll_timeout, config.max_history_steps
    );
    SyncServer::new(config).run().await
}
