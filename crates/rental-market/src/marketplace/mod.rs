//! Lifecycle managers for accounts, listings and applications.
//!
//! Each manager validates through the shared [`SchemaCatalog`], consults the
//! store for cross-entity checks and persists through guarded writes. The
//! [`Marketplace`] facade wires them to one store, clock and configuration.

pub mod accounts;
pub mod applications;
pub mod clock;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod listings;
pub mod reconcile;
pub mod router;
pub mod schema;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::info;

use crate::config::MarketplaceConfig;
use crate::store::{DocumentStore, StoreError};

pub use accounts::{AccountOutcome, AccountService};
pub use applications::ApplicationService;
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{AccountKind, ApplicationStatus, ListingStatus};
pub use eligibility::{EligibilityChecker, IdentityConflict};
pub use error::{ErrorKind, MarketError};
pub use listings::{ExpiryReport, ListingService, SweepFailure};
pub use reconcile::{ReconcileReport, Reconciler};
pub use router::marketplace_router;
pub use schema::{SchemaCatalog, SchemaKind, Validation, ValidationError};

/// Unique indexes the managers rely on for race-free uniqueness.
pub const UNIQUE_INDEXES: [(&str, &str); 4] = [
    (domain::USERS, domain::IDENTITY_FIELD),
    (domain::LANDLORDS, domain::IDENTITY_FIELD),
    (domain::APPLICATIONS, domain::ACTIVE_KEY_FIELD),
    (domain::APPLICATIONS, domain::ACCEPTED_KEY_FIELD),
];

/// Every manager bound to the same store, schema catalog and clock.
pub struct Marketplace<S> {
    store: Arc<S>,
    pub users: AccountService<S>,
    pub landlords: AccountService<S>,
    pub listings: ListingService<S>,
    pub applications: ApplicationService<S>,
    pub reconciler: Reconciler<S>,
}

impl<S> Marketplace<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        schemas: Arc<SchemaCatalog>,
        clock: Arc<dyn Clock>,
        config: &MarketplaceConfig,
    ) -> Self {
        let accounts = |kind| {
            AccountService::new(kind, store.clone(), schemas.clone(), clock.clone(), config)
        };
        Self {
            users: accounts(AccountKind::User),
            landlords: accounts(AccountKind::Landlord),
            listings: ListingService::new(store.clone(), schemas.clone(), clock.clone(), config),
            applications: ApplicationService::new(
                store.clone(),
                schemas.clone(),
                clock.clone(),
                config,
            ),
            reconciler: Reconciler::new(store.clone(), clock, config),
            store,
        }
    }

    /// Create the unique indexes; must run before the first write.
    pub fn ensure_indexes(&self) -> Result<(), StoreError> {
        for (collection, field) in UNIQUE_INDEXES {
            self.store.create_unique_index(collection, field)?;
        }
        info!(indexes = UNIQUE_INDEXES.len(), "unique indexes ready");
        Ok(())
    }

    pub fn accounts(&self, kind: AccountKind) -> &AccountService<S> {
        match kind {
            AccountKind::User => &self.users,
            AccountKind::Landlord => &self.landlords,
        }
    }
}
