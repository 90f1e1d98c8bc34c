use anyhow::Result;
use veristore_payments_service::{build_router, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(
        target: "veristore.service",
        addr = %config.bind_addr,
        "payments service listening",
    );

    let router = build_router(config);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
