pub mod config;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod rendezvous;
pub mod server;

use std::sync::Arc;

use config::Config;

/// Lets an integration test (or any other embedder) start the server
/// directly instead of going through `main`.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    log::info!(
        "starting yard-server on {}:{}",
        config.server.hostname,
        config.server.port
    );

    server::run(config).await
}
