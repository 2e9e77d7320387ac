use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cheri_ml_service::{AppConfig, ModelRegistry, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        model = %config.model_id,
        precision = %config.precision,
        device = %config.device,
        profile = %config.profile,
        "loading model"
    );

    let registry = Arc::new(ModelRegistry::initialize(config.as_ref())?);
    let descriptor = registry.descriptor();
    tracing::info!(
        model = %descriptor.model_id,
        precision = %descriptor.precision,
        device = %descriptor.device,
        size_bytes = descriptor.size_bytes,
        estimated_params = descriptor.precision.estimated_params(descriptor.size_bytes),
        eos_token_id = ?registry.eos_token_id(),
        "model loaded"
    );

    let router = build_router(config.clone(), registry);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
