use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use rental_market::config::MarketplaceConfig;
use rental_market::error::AppError;
use rental_market::marketplace::{Clock, Marketplace, SchemaCatalog};
use rental_market::store::InMemoryStore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type SharedMarketplace = Arc<Marketplace<InMemoryStore>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Build the schema catalog, the store and its indexes, and every manager.
///
/// A malformed schema or an index that cannot be created aborts startup.
pub(crate) fn build_marketplace(
    config: &MarketplaceConfig,
    clock: Arc<dyn Clock>,
) -> Result<SharedMarketplace, AppError> {
    let schemas = Arc::new(SchemaCatalog::build()?);
    let store = Arc::new(InMemoryStore::new());
    let marketplace = Marketplace::new(store, schemas, clock, config);
    marketplace.ensure_indexes()?;
    info!(
        window_days = config.listing_window_days,
        minimum_age = config.minimum_age,
        "marketplace initialised"
    );
    Ok(Arc::new(marketplace))
}

/// Parse `YYYY-MM-DD` or an RFC 3339 instant; a bare date means midnight UTC.
pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("failed to parse '{raw}' as YYYY-MM-DD or RFC 3339"))
}
