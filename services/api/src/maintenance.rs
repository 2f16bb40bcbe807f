use crate::infra::SharedMarketplace;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counts from one expiry-and-repair pass, used for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassSummary {
    pub(crate) listings_expired: usize,
    pub(crate) applications_expired: usize,
    pub(crate) listings_closed: usize,
    pub(crate) applications_rejected: usize,
    pub(crate) failures: usize,
}

/// Finish any cascade a crash left half-done, then expire overdue listings.
///
/// A pass that cannot reach the store is logged and skipped; the next tick retries.
pub(crate) fn run_pass(market: &SharedMarketplace) -> PassSummary {
    let mut summary = PassSummary::default();

    match market.reconciler.reconcile() {
        Ok(report) => {
            summary.listings_closed += report.listings_closed.len();
            summary.applications_rejected += report.applications_rejected;
            summary.applications_expired += report.applications_expired;
            summary.failures += report.failures.len();
            for failure in &report.failures {
                warn!(listing_id = %failure.listing_id, kind = ?failure.kind, message = %failure.message, "reconcile incomplete");
            }
        }
        Err(err) => warn!(error = %err, "reconcile pass skipped"),
    }

    match market.listings.expire_overdue() {
        Ok(report) => {
            summary.listings_expired = report.expired.len();
            summary.applications_expired += report.applications_expired;
            summary.listings_closed += report.closed.len();
            summary.applications_rejected += report.applications_rejected;
            summary.failures += report.failures.len();
            for failure in &report.failures {
                warn!(listing_id = %failure.listing_id, kind = ?failure.kind, message = %failure.message, "listing expiry incomplete");
            }
        }
        Err(err) => warn!(error = %err, "expiry sweep skipped"),
    }

    if summary == PassSummary::default() {
        debug!("maintenance pass found nothing to do");
    } else {
        info!(
            listings_expired = summary.listings_expired,
            applications_expired = summary.applications_expired,
            listings_closed = summary.listings_closed,
            applications_rejected = summary.applications_rejected,
            failures = summary.failures,
            "maintenance pass complete"
        );
    }
    summary
}

/// Run [`run_pass`] every `interval_secs`. Zero disables the sweep.
pub(crate) fn spawn_sweep(market: SharedMarketplace, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        info!("periodic expiry sweep disabled");
        return None;
    }

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_pass(&market);
        }
    });
    info!(interval_secs, "periodic expiry sweep scheduled");
    Some(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::build_marketplace;
    use chrono::{TimeZone, Utc};
    use rental_market::config::MarketplaceConfig;
    use rental_market::marketplace::{Clock, FixedClock, ListingStatus};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn document(value: Value) -> rental_market::store::Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn account(oauth_id: &str) -> rental_market::store::Document {
        document(json!({
            "details": {
                "forename": "Ciara",
                "surname": "Walsh",
                "birth_date": "1988-02-14",
                "sex": "female"
            },
            "oauth_id": oauth_id
        }))
    }

    fn listing() -> rental_market::store::Document {
        document(json!({
            "address": {
                "house_number": "12",
                "street": "Main Street",
                "area": "Ranelagh",
                "city": "Dublin",
                "county": "Dublin",
                "eircode": "D06 X2Y3"
            },
            "details": {
                "dwelling": "apartment",
                "description": "Bright two-bed near the Luas",
                "lease_length_months": 12,
                "target_tenant": ["couple"]
            },
            "facilities": {
                "dryer": true,
                "washing_machine": true,
                "central_heating": true,
                "parking": false,
                "pets": false,
                "wifi": true,
                "garden": false
            },
            "bedrooms": ["double", "single"],
            "bathrooms": ["ensuite"],
            "terms": {
                "deposit": 1800,
                "rent": 1800,
                "plan": "medium",
                "owner_occupied": false,
                "furnished": true,
                "ber": "B2"
            }
        }))
    }

    #[test]
    fn pass_expires_overdue_listings_and_their_applications() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 9, 24, 10, 0, 0)
                .single()
                .expect("valid instant"),
        ));
        let shared: Arc<dyn Clock> = clock.clone();
        let market = build_marketplace(&MarketplaceConfig::default(), shared).expect("builds");

        let landlord = market
            .landlords
            .create(&account("landlord-1"))
            .expect("landlord")
            .into_record()
            .id;
        let user = market
            .users
            .create(&account("user-1"))
            .expect("user")
            .into_record()
            .id;
        let listing_id = market.listings.create(&landlord, &listing()).expect("listing").id;
        market
            .applications
            .create(&user, &landlord, &listing_id)
            .expect("application");

        assert_eq!(run_pass(&market), PassSummary::default());

        clock.advance(chrono::Duration::days(22));
        let summary = run_pass(&market);
        assert_eq!(summary.listings_expired, 1);
        assert_eq!(summary.applications_expired, 1);
        assert_eq!(summary.failures, 0);

        let stored = market.listings.get(&listing_id).expect("stored");
        assert_eq!(
            stored.get("terms.status").and_then(Value::as_str),
            Some(ListingStatus::Expired.label())
        );
    }

    #[tokio::test]
    async fn zero_interval_disables_the_sweep() {
        let market = build_marketplace(
            &MarketplaceConfig::default(),
            Arc::new(rental_market::marketplace::SystemClock),
        )
        .expect("builds");
        assert!(spawn_sweep(market, 0).is_none());
    }
}
