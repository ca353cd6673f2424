use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod config;
mod errors;
mod handlers;
mod logging;
mod models;
mod routes;
mod services;

use models::object::EndpointRole;
use services::{
    copy_orchestrator::{CopyOrchestrator, CopySettings},
    copy_service::CopyService,
    storage_service::S3Store,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Environment + config ---
    dotenvy::dotenv().ok();
    let cfg = config::AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    logging::init(&cfg.log_dir)?;
    tracing::info!("Starting prefix-relay with config: {:?}", cfg);

    // --- Storage clients ---
    let source = S3Store::connect(EndpointRole::Source, &cfg.source).await;
    let destination = S3Store::connect(EndpointRole::Destination, &cfg.destination).await;
    tracing::info!(
        "Copying from bucket {} to bucket {}",
        cfg.source.bucket,
        cfg.destination.bucket
    );

    // --- Initialize core service ---
    let orchestrator = CopyOrchestrator::new(
        Arc::new(source),
        Arc::new(destination),
        CopySettings {
            extension: cfg.extension.clone(),
            concurrency: cfg.concurrency,
            deadline: cfg.deadline,
        },
    );
    let service = CopyService::new(orchestrator, CancellationToken::new());

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service.clone());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Drain background runs ---
    tracing::info!(
        "Shutting down, cancelling {} active copy runs",
        service.active_runs()
    );
    service.shutdown(cfg.shutdown_grace).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
