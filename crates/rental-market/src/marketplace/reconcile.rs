use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MarketplaceConfig;
use crate::store::{read_with_retry, DocumentStore, Filter, RecordId, StoreError};

use super::applications::{close_listing, settle_pending};
use super::clock::Clock;
use super::domain::{
    ApplicationState, ApplicationStatus, ListingState, ListingStatus, APPLICATIONS, LISTINGS,
};
use super::error::MarketError;
use super::listings::SweepFailure;

/// What one repair pass changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub listings_closed: Vec<RecordId>,
    pub applications_rejected: usize,
    pub applications_expired: usize,
    pub failures: Vec<SweepFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.listings_closed.is_empty()
            && self.applications_rejected == 0
            && self.applications_expired == 0
            && self.failures.is_empty()
    }
}

/// Finishes accept and expiry cascades that stopped part way.
///
/// Every step is a guarded write, so running it concurrently with live traffic
/// or re-running it after a partial pass is harmless.
pub struct Reconciler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    read_retries: u8,
}

impl<S> Reconciler<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &MarketplaceConfig) -> Self {
        Self {
            store,
            clock,
            read_retries: config.read_retries,
        }
    }

    pub fn reconcile(&self) -> Result<ReconcileReport, MarketError> {
        let mut report = ReconcileReport::default();

        let accepted = read_with_retry(self.read_retries, || {
            self.store.find(
                APPLICATIONS,
                &Filter::all().eq("status", ApplicationStatus::Accepted.label()),
            )
        })?;
        let mut visited = BTreeSet::new();
        for record in accepted {
            let application: ApplicationState = match record.decode() {
                Ok(application) => application,
                Err(source) => {
                    let error = MarketError::malformed("application", &record.id, source);
                    warn!(application = %record.id, %error, "skipping application during repair");
                    continue;
                }
            };
            if !visited.insert(application.listing_id.clone()) {
                continue;
            }
            if let Err(error) = self.finish_accept(&application.listing_id, &record.id, &mut report) {
                warn!(listing = %application.listing_id, %error, "accept repair failed");
                report
                    .failures
                    .push(SweepFailure::new(application.listing_id.clone(), &error));
            }
        }

        let expired = read_with_retry(self.read_retries, || {
            self.store.find(
                LISTINGS,
                &Filter::all().eq("terms.status", ListingStatus::Expired.label()),
            )
        })?;
        for record in expired {
            match settle_pending(
                self.store.as_ref(),
                self.read_retries,
                &record.id,
                ApplicationStatus::Expired,
                None,
                self.clock.now(),
            ) {
                Ok(count) => report.applications_expired += count,
                Err(error) => {
                    warn!(listing = %record.id, %error, "expiry repair failed");
                    report.failures.push(SweepFailure::new(record.id.clone(), &error));
                }
            }
        }

        if report.is_clean() {
            debug!("reconciliation found nothing to repair");
        } else {
            info!(
                listings_closed = report.listings_closed.len(),
                rejected = report.applications_rejected,
                expired = report.applications_expired,
                failures = report.failures.len(),
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    /// The listing of an accepted application must be closed with no pending
    /// applications left on it.
    fn finish_accept(
        &self,
        listing_id: &RecordId,
        accepted: &RecordId,
        report: &mut ReconcileReport,
    ) -> Result<(), MarketError> {
        let record = match read_with_retry(self.read_retries, || {
            self.store.get(LISTINGS, listing_id)
        }) {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                debug!(listing = %listing_id, "accepted application points at a deleted listing");
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };
        let listing: ListingState = record
            .decode()
            .map_err(|source| MarketError::malformed("listing", listing_id, source))?;

        match listing.terms.status {
            ListingStatus::Expired => return Ok(()),
            ListingStatus::Closed => {}
            ListingStatus::Open => {
                match close_listing(self.store.as_ref(), self.read_retries, listing_id) {
                    Ok(_) => {
                        info!(listing = %listing_id, application = %accepted, "closed listing left open by an accept");
                        report.listings_closed.push(listing_id.clone());
                    }
                    // Moved on concurrently; the next pass sees its new status.
                    Err(StoreError::GuardMismatch { .. }) => return Ok(()),
                    Err(other) => return Err(MarketError::from_store("listing", listing_id, other)),
                }
            }
        }

        report.applications_rejected += settle_pending(
            self.store.as_ref(),
            self.read_retries,
            listing_id,
            ApplicationStatus::Rejected,
            Some(accepted),
            self.clock.now(),
        )?;
        Ok(())
    }
}
