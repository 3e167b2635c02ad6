// SPDX-License-Identifier: MIT
use std::net::SocketAddr;

use anyhow::Result;
use axum::{routing::get, Router};
use service_telemetry::RouterExt;
use tracing::{info, instrument};

#[instrument]
async fn simulated_work() -> &'static str {
    info!(task = "simulated_work", "starting task");
    // Placeholder for actual business logic
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    info!(task = "simulated_work", "completed task");
    "done"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = service_telemetry::init()?;

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/work", get(simulated_work))
        .with_telemetry(telemetry.clone());

    let addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    telemetry.log_info(&format!("listening on {addr}"));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    telemetry.log_info("shutting down");
    telemetry.shutdown()?;
    Ok(())
}
