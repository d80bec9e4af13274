#[cfg(feature = "api")]
pub mod api;

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use service::{Channel, ChannelOptions, EndpointHandler};

use self::config::Config;

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "tchannel-server.",
    env!("CARGO_PKG_VERSION")
);

/// Echoes `arg2`/`arg3` back to the caller. Registered under `ping` so a
/// freshly started node always has one endpoint to exercise over the wire.
struct PingHandler;

#[async_trait::async_trait]
impl EndpointHandler for PingHandler {
    async fn call(&self, arg2: Bytes, arg3: Bytes) -> Result<(Bytes, Bytes), String> {
        Ok((arg2, arg3))
    }
}

/// Builds and starts a channel from `config`, replacing `main` so
/// integration tests can start a node without a separate process.
pub async fn startup(config: Arc<Config>) -> Result<()> {
    log::info!("{SOFTWARE} starting as {}", config.server.host_port);

    let mut options = ChannelOptions::new(config.server.host_port.clone(), config.server.listen);
    options.process_name = SOFTWARE.to_string();
    options.req_timeout_default = config.server.req_timeout_default();
    options.server_timeout_default = config.server.server_timeout_default();
    options.timeout_check_interval = config.server.timeout_check_interval();
    options.timeout_fuzz = config.server.timeout_fuzz();

    let channel = Channel::new(options);
    channel.register("ping", Arc::new(PingHandler));
    channel.listen().await?;

    #[cfg(feature = "api")]
    {
        api::start_server(config.clone(), channel.clone()).await?;
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    channel.quit().await;

    Ok(())
}
