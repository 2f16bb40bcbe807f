use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::MarketplaceConfig;
use crate::store::{
    read_with_retry, Document, DocumentStore, Filter, Guard, Record, RecordId, StoreError,
};

use super::clock::{stamp, Clock};
use super::domain::{
    active_key, ApplicationState, ApplicationStatus, ListingState, ListingStatus,
    ACCEPTED_KEY_FIELD, ACTIVE_KEY_FIELD, APPLICATIONS, LISTINGS,
};
use super::error::MarketError;
use super::schema::{Problem, SchemaCatalog, SchemaKind, Validation, ValidationError};

/// Submission and status transitions of rental applications.
///
/// Accepting is a three step compare-and-swap sequence: accept the application,
/// close its listing, reject the pending siblings. Each step is guarded, so a
/// concurrent writer makes the step fail instead of being overwritten. A crash
/// between steps leaves an accepted application on an open listing (or pending
/// siblings on a closed one), which [`super::Reconciler`] detects and finishes.
pub struct ApplicationService<S> {
    store: Arc<S>,
    schemas: Arc<SchemaCatalog>,
    clock: Arc<dyn Clock>,
    read_retries: u8,
}

impl<S> ApplicationService<S>
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
            read_retries: config.read_retries,
        }
    }

    /// Validate an inbound `{user_id, landlord_id, listing_id}` payload and submit it.
    pub fn create_from_payload(&self, payload: &Document) -> Result<Record, MarketError> {
        let draft =
            self.schemas
                .validate(SchemaKind::ApplicationDraft, payload, Validation::PERMISSIVE)?;
        let id = |field: &str| {
            RecordId(
                draft
                    .get(field)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )
        };
        self.create(&id("user_id"), &id("landlord_id"), &id("listing_id"))
    }

    /// Submit a pending application against an open listing.
    pub fn create(
        &self,
        user_id: &RecordId,
        landlord_id: &RecordId,
        listing_id: &RecordId,
    ) -> Result<Record, MarketError> {
        let now = self.clock.now();
        let listing = self.listing(listing_id)?;
        if listing.landlord_id != *landlord_id {
            return Err(ValidationError::single(
                "application payload",
                "landlord_id",
                Problem::Mismatch {
                    expected: listing.landlord_id.to_string(),
                },
            )
            .into());
        }
        if !listing.accepts_applications(now) {
            return Err(unavailable(listing_id, &listing, now));
        }

        let key = active_key(user_id, listing_id);
        let duplicate = || MarketError::DuplicateApplication {
            user_id: user_id.clone(),
            listing_id: listing_id.clone(),
        };
        let active = read_with_retry(self.read_retries, || {
            self.store
                .find(APPLICATIONS, &Filter::all().eq(ACTIVE_KEY_FIELD, key.clone()))
        })?;
        if !active.is_empty() {
            return Err(duplicate());
        }

        let mut document = Document::new();
        document.insert("user_id".to_string(), Value::String(user_id.to_string()));
        document.insert(
            "landlord_id".to_string(),
            Value::String(landlord_id.to_string()),
        );
        document.insert(
            "listing_id".to_string(),
            Value::String(listing_id.to_string()),
        );
        document.insert(
            "status".to_string(),
            Value::String(ApplicationStatus::Pending.label().to_string()),
        );
        document.insert("creation_time".to_string(), stamp(now));
        document.insert("last_updated".to_string(), stamp(now));
        document.insert(ACTIVE_KEY_FIELD.to_string(), Value::String(key));
        let document = self
            .schemas
            .validate(SchemaKind::Application, &document, Validation::STRICT)?;

        match self.store.insert(APPLICATIONS, document) {
            Ok(record) => {
                info!(application = %record.id, listing = %listing_id, user = %user_id, "application submitted");
                Ok(record)
            }
            Err(StoreError::Conflict { .. }) => Err(duplicate()),
            Err(other) => Err(other.into()),
        }
    }

    /// Accepts `user_id`, `landlord_id`, `listing_id` and `status`.
    pub fn list(&self, query: &Document) -> Result<Vec<Record>, MarketError> {
        let query = self
            .schemas
            .validate(SchemaKind::ApplicationQuery, query, Validation::STRICT)?;
        let filter = Filter::from_document(&query);
        Ok(read_with_retry(self.read_retries, || {
            self.store.find(APPLICATIONS, &filter)
        })?)
    }

    pub fn get(&self, id: &RecordId) -> Result<Record, MarketError> {
        read_with_retry(self.read_retries, || self.store.get(APPLICATIONS, id))
            .map_err(|error| MarketError::from_store("application", id, error))
    }

    /// `{ "status": ... }` dispatched to the matching transition.
    pub fn update(&self, id: &RecordId, payload: &Document) -> Result<Record, MarketError> {
        let patch = self
            .schemas
            .validate(SchemaKind::ApplicationPatch, payload, Validation::STRICT)?;
        let requested = patch
            .get("status")
            .and_then(Value::as_str)
            .and_then(ApplicationStatus::parse)
            .ok_or_else(|| {
                ValidationError::single(
                    "application update",
                    "status",
                    Problem::NotAllowed {
                        allowed: &ApplicationStatus::ALL,
                    },
                )
            })?;

        match requested {
            ApplicationStatus::Accepted => self.accept(id),
            ApplicationStatus::Rejected => self.reject(id),
            ApplicationStatus::Ceased => self.cease(id),
            ApplicationStatus::Pending | ApplicationStatus::Expired => {
                let current = self.state(&self.get(id)?)?.status;
                Err(MarketError::application_transition(current, requested))
            }
        }
    }

    pub fn delete(&self, id: &RecordId) -> Result<Record, MarketError> {
        let existing = self.get(id)?;
        self.store
            .delete_one(APPLICATIONS, id)
            .map_err(|error| MarketError::from_store("application", id, error))?;
        info!(application = %id, "application deleted");
        Ok(existing)
    }

    /// Accept a pending application, close its listing and reject every other
    /// pending application on that listing.
    pub fn accept(&self, id: &RecordId) -> Result<Record, MarketError> {
        let now = self.clock.now();
        let record = self.get(id)?;
        let application = self.state(&record)?;
        if application.status != ApplicationStatus::Pending {
            return Err(MarketError::application_transition(
                application.status,
                ApplicationStatus::Accepted,
            ));
        }

        let listing_id = &application.listing_id;
        let listing = self.listing(listing_id)?;
        if !listing.accepts_applications(now) {
            return Err(unavailable(listing_id, &listing, now));
        }

        let accepted = match self.swap(&record, ApplicationStatus::Pending, ApplicationStatus::Accepted, now)
        {
            Ok(accepted) => accepted,
            Err(StoreError::Conflict { .. }) => {
                return Err(MarketError::ListingUnavailable {
                    listing_id: listing_id.clone(),
                    status: ListingStatus::Closed.label(),
                })
            }
            Err(StoreError::GuardMismatch { .. }) => {
                let current = self.state(&self.get(id)?)?.status;
                return Err(MarketError::application_transition(
                    current,
                    ApplicationStatus::Accepted,
                ));
            }
            Err(other) => return Err(MarketError::from_store("application", id, other)),
        };

        match close_listing(self.store.as_ref(), self.read_retries, listing_id) {
            Ok(_) => {}
            Err(StoreError::GuardMismatch { .. }) => {
                let status = self
                    .listing(listing_id)
                    .map(|listing| listing.terms.status)
                    .ok();
                if status == Some(ListingStatus::Closed) && self.holds_acceptance(id, listing_id)? {
                    // A sweep closed the listing on this accept's behalf.
                    debug!(application = %id, listing = %listing_id, "listing already closed for this accept");
                } else {
                    self.compensate(&accepted, now);
                    return Err(MarketError::ListingUnavailable {
                        listing_id: listing_id.clone(),
                        status: status.unwrap_or(ListingStatus::Closed).label(),
                    });
                }
            }
            Err(other) => {
                warn!(
                    application = %id,
                    listing = %listing_id,
                    error = %other,
                    "application accepted but listing still open; reconciliation will close it"
                );
                return Err(MarketError::from_store("listing", listing_id, other));
            }
        }

        let rejected = settle_pending(
            self.store.as_ref(),
            self.read_retries,
            listing_id,
            ApplicationStatus::Rejected,
            Some(id),
            now,
        )
        .map_err(|error| {
            warn!(
                application = %id,
                listing = %listing_id,
                %error,
                "listing closed but siblings not all rejected; reconciliation will finish"
            );
            error
        })?;

        info!(application = %id, listing = %listing_id, rejected, "application accepted");
        Ok(accepted)
    }

    pub fn reject(&self, id: &RecordId) -> Result<Record, MarketError> {
        self.transition(id, ApplicationStatus::Rejected)
    }

    /// Withdraw a pending application or end an accepted tenancy.
    pub fn cease(&self, id: &RecordId) -> Result<Record, MarketError> {
        self.transition(id, ApplicationStatus::Ceased)
    }

    fn transition(&self, id: &RecordId, next: ApplicationStatus) -> Result<Record, MarketError> {
        let now = self.clock.now();
        let record = self.get(id)?;
        let current = self.state(&record)?.status;
        if !current.can_transition_to(next) {
            return Err(MarketError::application_transition(current, next));
        }

        match self.swap(&record, current, next, now) {
            Ok(updated) => {
                info!(application = %id, from = %current, to = %next, "application transitioned");
                Ok(updated)
            }
            Err(StoreError::GuardMismatch { .. }) => {
                let latest = self.state(&self.get(id)?)?.status;
                Err(MarketError::application_transition(latest, next))
            }
            Err(other) => Err(MarketError::from_store("application", id, other)),
        }
    }

    fn swap(
        &self,
        record: &Record,
        current: ApplicationStatus,
        next: ApplicationStatus,
        now: DateTime<Utc>,
    ) -> Result<Record, StoreError> {
        self.store.compare_and_swap(
            APPLICATIONS,
            &record.id,
            &Guard::new("status", current.label()),
            transitioned(&record.fields, next, now),
        )
    }

    /// Undo step one of an accept whose listing moved on underneath it.
    fn compensate(&self, accepted: &Record, now: DateTime<Utc>) {
        let mut document = transitioned(&accepted.fields, ApplicationStatus::Pending, now);
        if let Ok(application) = self.state(accepted) {
            document.insert(
                ACTIVE_KEY_FIELD.to_string(),
                Value::String(active_key(&application.user_id, &application.listing_id)),
            );
        }

        let guard = Guard::new("status", ApplicationStatus::Accepted.label());
        match self
            .store
            .compare_and_swap(APPLICATIONS, &accepted.id, &guard, document)
        {
            Ok(_) => debug!(application = %accepted.id, "accept rolled back"),
            Err(error) => warn!(
                application = %accepted.id,
                %error,
                "could not roll back accept on unavailable listing"
            ),
        }
    }

    /// Whether `id` is still the accepted application holding `listing_id`.
    fn holds_acceptance(&self, id: &RecordId, listing_id: &RecordId) -> Result<bool, MarketError> {
        let record = self.get(id)?;
        Ok(record.get(ACCEPTED_KEY_FIELD).and_then(Value::as_str) == Some(listing_id.as_str()))
    }

    fn listing(&self, listing_id: &RecordId) -> Result<ListingState, MarketError> {
        let record = read_with_retry(self.read_retries, || self.store.get(LISTINGS, listing_id))
            .map_err(|error| MarketError::from_store("listing", listing_id, error))?;
        record
            .decode()
            .map_err(|source| MarketError::malformed("listing", listing_id, source))
    }

    fn state(&self, record: &Record) -> Result<ApplicationState, MarketError> {
        record
            .decode()
            .map_err(|source| MarketError::malformed("application", &record.id, source))
    }
}

fn unavailable(listing_id: &RecordId, listing: &ListingState, now: DateTime<Utc>) -> MarketError {
    let status = if listing.is_overdue(now) {
        ListingStatus::Expired
    } else {
        listing.terms.status
    };
    MarketError::ListingUnavailable {
        listing_id: listing_id.clone(),
        status: status.label(),
    }
}

/// Application document after moving to `next`: the active key is dropped once
/// terminal, the accepted key is present exactly while accepted.
pub(crate) fn transitioned(
    fields: &Document,
    next: ApplicationStatus,
    now: DateTime<Utc>,
) -> Document {
    let mut document = fields.clone();
    document.insert(
        "status".to_string(),
        Value::String(next.label().to_string()),
    );
    document.insert("last_updated".to_string(), stamp(now));
    if !next.is_active() {
        document.remove(ACTIVE_KEY_FIELD);
    }
    match (next, fields.get("listing_id")) {
        (ApplicationStatus::Accepted, Some(listing_id)) => {
            document.insert(ACCEPTED_KEY_FIELD.to_string(), listing_id.clone());
        }
        _ => {
            document.remove(ACCEPTED_KEY_FIELD);
        }
    }
    document
}

/// Close an open listing under a status guard.
pub(crate) fn close_listing<S>(
    store: &S,
    read_retries: u8,
    listing_id: &RecordId,
) -> Result<Record, StoreError>
where
    S: DocumentStore + ?Sized,
{
    let record = read_with_retry(read_retries, || store.get(LISTINGS, listing_id))?;
    let mut document = record.fields.clone();
    if let Some(Value::Object(terms)) = document.get_mut("terms") {
        terms.insert(
            "status".to_string(),
            Value::String(ListingStatus::Closed.label().to_string()),
        );
    }
    let guard = Guard::new("terms.status", ListingStatus::Open.label());
    store.compare_and_swap(LISTINGS, listing_id, &guard, document)
}

/// Move every pending application on `listing_id` (other than `except`) to `to`.
///
/// Each application is swapped under a `pending` guard; one that changed in the
/// meantime is left alone. Returns how many were moved. Safe to re-run.
pub(crate) fn settle_pending<S>(
    store: &S,
    read_retries: u8,
    listing_id: &RecordId,
    to: ApplicationStatus,
    except: Option<&RecordId>,
    now: DateTime<Utc>,
) -> Result<usize, MarketError>
where
    S: DocumentStore + ?Sized,
{
    let filter = Filter::all()
        .eq("listing_id", listing_id.to_string())
        .eq("status", ApplicationStatus::Pending.label());
    let pending = read_with_retry(read_retries, || store.find(APPLICATIONS, &filter))?;
    let guard = Guard::new("status", ApplicationStatus::Pending.label());

    let mut settled = 0;
    for record in pending {
        if except == Some(&record.id) {
            continue;
        }
        match store.compare_and_swap(
            APPLICATIONS,
            &record.id,
            &guard,
            transitioned(&record.fields, to, now),
        ) {
            Ok(_) => settled += 1,
            Err(StoreError::GuardMismatch { .. } | StoreError::NotFound) => {
                debug!(application = %record.id, "application moved on before settling");
            }
            Err(other) => return Err(other.into()),
        }
    }
    Ok(settled)
}
