mod config;

use chat_relay::{
    AppState, build_metrics_layer_and_handle, build_metrics_router, build_router,
    client::create_hyper_client, relay::RelayConfig,
};
use clap::Parser as _;
use config::Config;
use tokio::net::TcpListener;
use tracing::{error, info, instrument, warn};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse().validate()?;
    info!("Starting chat relay against {}", config.upstream);
    if config.api_key.is_none() {
        warn!("No upstream API key configured; proxying endpoints will answer with a 500");
    }

    let relay = RelayConfig::builder()
        .url(config.upstream.clone())
        .maybe_key(config.api_key.clone())
        .default_model(config.default_model.clone())
        .build();

    let http_client = create_hyper_client(
        config.pool_idle_timeout_secs,
        config.pool_max_idle_per_host,
    );
    let app_state = AppState::with_client(relay, http_client);
    let mut router = build_router(app_state);

    if config.metrics {
        let (metrics_layer, handle) = build_metrics_layer_and_handle(config.metrics_prefix.clone());
        router = router.layer(metrics_layer);

        let metrics_router = build_metrics_router(handle);
        let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
        let metrics_listener = TcpListener::bind(&metrics_addr).await?;
        info!("Metrics listening on {}", metrics_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Chat relay listening on {}", bind_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
