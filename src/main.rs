use clap::Parser;
use mcp_agent::config::{Cli, Config, TransportMode};
use mcp_agent::server::authz::NoAuth;
use mcp_agent::server::core::ServerCore;
use mcp_agent::server::hardened::HardenedServer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug { "debug" } else { "info" };
    #[cfg(feature = "logging")]
    {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
            .init();
    }
    #[cfg(not(feature = "logging"))]
    let _ = filter;

    let mut config = Config::load(None);
    config.apply_cli(&cli);

    let core = ServerCore::new("mcp-agent", env!("CARGO_PKG_VERSION"));
    let auth_provider = Arc::new(NoAuth { default_role: "standard".into() });
    let hardened = HardenedServer::new(core, auth_provider);
    hardened.authorizer.register_role(mcp_agent::types::Role::standard());
    hardened.authorizer.register_role(mcp_agent::types::Role::admin());
    let server = Arc::new(hardened);

    match cli.mode() {
        TransportMode::Stdio => {
            tracing::info!("starting stdio transport");
            mcp_agent::server::transport::stdio::run(server).await?;
        }
        #[cfg(feature = "http")]
        TransportMode::Http => {
            let addr = format!("{}:{}", config.host, config.http_port).parse()?;
            tracing::info!(%addr, "starting http transport");
            let sse_clients = Arc::new(mcp_agent::server::transport::http::SseClients::default());
            mcp_agent::server::transport::http::serve(server, addr, sse_clients).await?;
        }
        #[cfg(not(feature = "http"))]
        TransportMode::Http => {
            anyhow::bail!("http feature not enabled");
        }
        #[cfg(feature = "websocket")]
        TransportMode::WebSocket => {
            let addr = format!("{}:{}", config.host, config.ws_port).parse()?;
            tracing::info!(%addr, "starting websocket transport");
            let peers = Arc::new(mcp_agent::server::transport::websocket::PeerRegistry::default());
            mcp_agent::server::transport::websocket::run(server, addr, peers).await?;
        }
        #[cfg(not(feature = "websocket"))]
        TransportMode::WebSocket => {
            anyhow::bail!("websocket feature not enabled");
        }
    }

    Ok(())
}
