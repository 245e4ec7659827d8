use std::net::SocketAddr;

use anyhow::{Context, Result};
use robintrack_service::config::Config;
use robintrack_service::services::SharedServices;

use crate::endpoints;

/// Creates the shared services and serves HTTP on the configured bind address until shutdown.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    robintrack_service::metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("robintrack-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let socket = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address `{}`", config.bind))?;

    runtime.block_on(async move {
        let services = SharedServices::new(config)
            .await
            .context("failed to create shared services")?;

        tracing::info!("Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .serve(
                endpoints::create_app(services)
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("HTTP server failed")
    })?;

    tracing::info!("System shutdown complete");
    Ok(())
}
