use crate::cli::ServeArgs;
use crate::infra::{build_marketplace, AppState};
use crate::maintenance::spawn_sweep;
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use rental_market::config::AppConfig;
use rental_market::error::AppError;
use rental_market::marketplace::SystemClock;
use rental_market::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(interval) = args.sweep_interval_secs.take() {
        config.marketplace.sweep_interval_secs = interval;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let market = build_marketplace(&config.marketplace, Arc::new(SystemClock))?;
    let _sweep = spawn_sweep(market.clone(), config.marketplace.sweep_interval_secs);

    let app = with_operational_routes(market)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "rental marketplace ready");

    axum::serve(listener, app).await?;
    Ok(())
}
