use anyhow::Result;
use duplex_rpc::DEFAULT_LISTEN_ADDR;
use duplex_rpc::duplex::RpcRouterConfig;
use duplex_rpc::example::start_server;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "ExampleService listening");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, shutting down");
        signal.cancel();
    });

    start_server(listener, RpcRouterConfig::default(), shutdown).await?;

    info!("Server stopped");
    Ok(())
}
