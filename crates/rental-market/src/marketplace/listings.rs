use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::MarketplaceConfig;
use crate::store::{
    merge, read_with_retry, Document, DocumentStore, Filter, Guard, Record, RecordId, StoreError,
    ID_FIELD,
};

use super::applications::{close_listing, settle_pending};
use super::clock::{stamp, Clock};
use super::domain::{
    ApplicationStatus, ListingState, ListingStatus, ACCEPTED_KEY_FIELD, APPLICATIONS, LISTINGS,
    LISTING_TYPE,
};
use super::error::{ErrorKind, MarketError};
use super::schema::{Problem, SchemaCatalog, SchemaKind, Validation, ValidationError};

const STATUS_PATH: &str = "terms.status";
const GUARDED_WRITE_ATTEMPTS: usize = 2;

/// Listings that moved to `expired` in one sweep, and the listings that could not.
///
/// An overdue listing that already holds an accepted application is closed
/// instead, finishing that accept; it is reported under `closed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpiryReport {
    pub expired: Vec<RecordId>,
    pub applications_expired: usize,
    pub closed: Vec<RecordId>,
    pub applications_rejected: usize,
    pub failures: Vec<SweepFailure>,
}

/// What happened to one overdue listing.
enum Lapse {
    Expired { applications: usize },
    Closed { applications: usize },
}

/// A listing a sweep could not process; the rest of the batch still ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub listing_id: RecordId,
    pub kind: ErrorKind,
    pub message: String,
}

impl SweepFailure {
    pub(crate) fn new(listing_id: RecordId, error: &MarketError) -> Self {
        Self {
            listing_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Creation, status transitions and expiry of rental listings.
pub struct ListingService<S> {
    store: Arc<S>,
    schemas: Arc<SchemaCatalog>,
    clock: Arc<dyn Clock>,
    window_days: i64,
    default_images: Vec<String>,
    read_retries: u8,
}

impl<S> ListingService<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        schemas: Arc<SchemaCatalog>,
        clock: Arc<dyn Clock>,
        config: &MarketplaceConfig,
    ) -> Self {
        Self {
            store,
            schemas,
            clock,
            window_days: config.listing_window_days,
            default_images: config.default_images.clone(),
            read_retries: config.read_retries,
        }
    }

    /// Persist an open listing for `landlord_id` expiring one window from now.
    pub fn create(&self, landlord_id: &RecordId, payload: &Document) -> Result<Record, MarketError> {
        let mut draft = payload.clone();
        draft.insert(
            "landlord_id".to_string(),
            Value::String(landlord_id.to_string()),
        );
        let mut document =
            self.schemas
                .validate(SchemaKind::ListingDraft, &draft, Validation::PERMISSIVE)?;

        if !document.contains_key("images") {
            let images = self
                .default_images
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            document.insert("images".to_string(), Value::Array(images));
        }

        let now = self.clock.now();
        let expires = Duration::try_days(self.window_days)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                ValidationError::single("listing", "terms.expires", Problem::InvalidTimestamp)
            })?;
        document.insert(
            "type".to_string(),
            Value::String(LISTING_TYPE.to_string()),
        );
        if let Some(Value::Object(terms)) = document.get_mut("terms") {
            terms.insert("created".to_string(), stamp(now));
            terms.insert("expires".to_string(), stamp(expires));
            terms.insert(
                "status".to_string(),
                Value::String(ListingStatus::Open.label().to_string()),
            );
        }

        let document = self
            .schemas
            .validate(SchemaKind::Listing, &document, Validation::STRICT)?;
        let record = self.store.insert(LISTINGS, document)?;
        info!(listing = %record.id, landlord = %landlord_id, "listing created");
        Ok(record)
    }

    /// Accepts `landlord_id` and `status`; anything else is rejected.
    pub fn list(&self, query: &Document) -> Result<Vec<Record>, MarketError> {
        let query = self
            .schemas
            .validate(SchemaKind::ListingQuery, query, Validation::STRICT)?;

        let mut filter = Filter::all();
        if let Some(landlord_id) = query.get("landlord_id") {
            filter = filter.eq("landlord_id", landlord_id.clone());
        }
        if let Some(status) = query.get("status") {
            filter = filter.eq(STATUS_PATH, status.clone());
        }

        Ok(read_with_retry(self.read_retries, || {
            self.store.find(LISTINGS, &filter)
        })?)
    }

    pub fn get(&self, id: &RecordId) -> Result<Record, MarketError> {
        read_with_retry(self.read_retries, || self.store.get(LISTINGS, id))
            .map_err(|error| MarketError::from_store("listing", id, error))
    }

    /// Merge descriptive fields; a `terms.status` change is applied as a transition.
    pub fn update(&self, id: &RecordId, payload: &Document) -> Result<Record, MarketError> {
        let mut patch = payload.clone();
        if let Some(claimed) = patch.remove(ID_FIELD) {
            if claimed.as_str() != Some(id.as_str()) {
                return Err(managed_field(
                    ID_FIELD,
                    Problem::Mismatch {
                        expected: id.to_string(),
                    },
                ));
            }
        }

        let requested = match patch.get_mut("terms") {
            Some(Value::Object(terms)) => terms.remove("status"),
            _ => None,
        };
        let requested = match requested {
            None => None,
            Some(Value::String(label)) => match ListingStatus::parse(&label) {
                Some(status) => Some(status),
                None => {
                    return Err(managed_field(
                        STATUS_PATH,
                        Problem::NotAllowed {
                            allowed: &ListingStatus::ALL,
                        },
                    ))
                }
            },
            Some(_) => {
                return Err(managed_field(
                    STATUS_PATH,
                    Problem::WrongType { expected: "string" },
                ))
            }
        };

        let mut record = self.write_guarded(id, |existing| {
            for path in ["type", "landlord_id", "terms.created", "terms.expires"] {
                if let Some(value) = crate::store::lookup(&patch, path) {
                    if crate::store::lookup(existing, path) != Some(value) {
                        return Err(managed_field(path, Problem::Managed));
                    }
                }
            }
            let mut merged = existing.clone();
            merge(&mut merged, patch.clone());
            Ok(self
                .schemas
                .validate(SchemaKind::Listing, &merged, Validation::STRICT)?)
        })?;

        if let Some(next) = requested {
            let current = self.decode(&record)?.terms.status;
            if next != current {
                record = self.transition(id, next)?;
            }
        }

        info!(listing = %id, "listing updated");
        Ok(record)
    }

    /// Move an open listing to `closed` or `expired`. Expiring also expires its
    /// pending applications.
    pub fn transition(&self, id: &RecordId, next: ListingStatus) -> Result<Record, MarketError> {
        let now = self.clock.now();
        let record = self.get(id)?;
        let current = self.decode(&record)?.terms.status;
        if !current.can_transition_to(next) {
            return Err(MarketError::listing_transition(current, next));
        }

        let record = self.swap_status(&record, current, next)?;
        info!(listing = %id, from = %current, to = %next, "listing transitioned");

        if next == ListingStatus::Expired {
            let expired = settle_pending(
                self.store.as_ref(),
                self.read_retries,
                id,
                ApplicationStatus::Expired,
                None,
                now,
            )?;
            info!(listing = %id, applications = expired, "pending applications expired");
        }
        Ok(record)
    }

    /// Expire every open listing whose expiry has passed and cascade to its
    /// pending applications. Listings are processed independently.
    pub fn expire_overdue(&self) -> Result<ExpiryReport, MarketError> {
        let now = self.clock.now();
        let filter = Filter::all().eq(STATUS_PATH, ListingStatus::Open.label());
        let open = read_with_retry(self.read_retries, || self.store.find(LISTINGS, &filter))?;

        let mut report = ExpiryReport::default();
        for record in open {
            match self.expire_one(&record, now) {
                Ok(Some(Lapse::Expired { applications })) => {
                    report.expired.push(record.id.clone());
                    report.applications_expired += applications;
                }
                Ok(Some(Lapse::Closed { applications })) => {
                    report.closed.push(record.id.clone());
                    report.applications_rejected += applications;
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(listing = %record.id, %error, "listing expiry failed");
                    report.failures.push(SweepFailure::new(record.id.clone(), &error));
                }
            }
        }

        info!(
            expired = report.expired.len(),
            applications = report.applications_expired,
            closed = report.closed.len(),
            failures = report.failures.len(),
            "expiry sweep finished"
        );
        Ok(report)
    }

    pub fn delete(&self, id: &RecordId) -> Result<Record, MarketError> {
        let existing = self.get(id)?;
        self.store
            .delete_one(LISTINGS, id)
            .map_err(|error| MarketError::from_store("listing", id, error))?;
        info!(listing = %id, "listing deleted");
        Ok(existing)
    }

    fn expire_one(&self, record: &Record, now: DateTime<Utc>) -> Result<Option<Lapse>, MarketError> {
        let state = self.decode(record)?;
        if !state.is_overdue(now) {
            return Ok(None);
        }

        // An accept that stopped before closing the listing still owns it.
        let holder = read_with_retry(self.read_retries, || {
            self.store.find(
                APPLICATIONS,
                &Filter::all().eq(ACCEPTED_KEY_FIELD, record.id.to_string()),
            )
        })?;
        if let Some(accepted) = holder.first() {
            match close_listing(self.store.as_ref(), self.read_retries, &record.id) {
                Ok(_) => {}
                Err(StoreError::GuardMismatch { .. }) => return Ok(None),
                Err(other) => return Err(MarketError::from_store("listing", &record.id, other)),
            }
            let rejected = settle_pending(
                self.store.as_ref(),
                self.read_retries,
                &record.id,
                ApplicationStatus::Rejected,
                Some(&accepted.id),
                now,
            )?;
            info!(listing = %record.id, application = %accepted.id, rejected, "overdue listing closed for its accepted application");
            return Ok(Some(Lapse::Closed {
                applications: rejected,
            }));
        }

        match self.swap_status(record, ListingStatus::Open, ListingStatus::Expired) {
            Ok(_) => {}
            Err(MarketError::InvalidTransition { .. }) => return Ok(None),
            Err(error) => return Err(error),
        }

        let expired = settle_pending(
            self.store.as_ref(),
            self.read_retries,
            &record.id,
            ApplicationStatus::Expired,
            None,
            now,
        )?;
        Ok(Some(Lapse::Expired {
            applications: expired,
        }))
    }

    /// Compare-and-swap the status; a concurrent change surfaces as the
    /// transition that is no longer legal.
    fn swap_status(
        &self,
        record: &Record,
        current: ListingStatus,
        next: ListingStatus,
    ) -> Result<Record, MarketError> {
        let mut document = record.fields.clone();
        if let Some(Value::Object(terms)) = document.get_mut("terms") {
            terms.insert(
                "status".to_string(),
                Value::String(next.label().to_string()),
            );
        }

        let guard = Guard::new(STATUS_PATH, current.label());
        match self
            .store
            .compare_and_swap(LISTINGS, &record.id, &guard, document)
        {
            Ok(updated) => Ok(updated),
            Err(StoreError::GuardMismatch { .. }) => {
                let latest = self.get(&record.id)?;
                let status = self.decode(&latest)?.terms.status;
                Err(MarketError::listing_transition(status, next))
            }
            Err(other) => Err(MarketError::from_store("listing", &record.id, other)),
        }
    }

    /// Rebuild and write the document under a guard on its current status,
    /// retrying once if a concurrent transition landed in between.
    fn write_guarded<F>(&self, id: &RecordId, build: F) -> Result<Record, MarketError>
    where
        F: Fn(&Document) -> Result<Document, MarketError>,
    {
        let mut last = MarketError::StoreUnavailable("listing kept changing".to_string());
        for _ in 0..GUARDED_WRITE_ATTEMPTS {
            let existing = self.get(id)?;
            let status = self.decode(&existing)?.terms.status;
            let document = build(&existing.fields)?;
            let guard = Guard::new(STATUS_PATH, status.label());
            match self.store.compare_and_swap(LISTINGS, id, &guard, document) {
                Ok(record) => return Ok(record),
                Err(StoreError::GuardMismatch { field }) => {
                    last = MarketError::StoreUnavailable(format!("concurrent update on `{field}`"));
                }
                Err(other) => return Err(MarketError::from_store("listing", id, other)),
            }
        }
        Err(last)
    }

    fn decode(&self, record: &Record) -> Result<ListingState, MarketError> {
        record
            .decode()
            .map_err(|source| MarketError::malformed("listing", &record.id, source))
    }
}

fn managed_field(path: &str, problem: Problem) -> MarketError {
    ValidationError::single("listing update", path, problem).into()
}
