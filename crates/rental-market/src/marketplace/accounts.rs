use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::MarketplaceConfig;
use crate::store::{
    merge, read_with_retry, Document, DocumentStore, Filter, Record, RecordId, StoreError, ID_FIELD,
};

use super::clock::{stamp, Clock};
use super::domain::{AccountKind, IDENTITY_FIELD};
use super::eligibility::{identity_claim, EligibilityChecker, IdentityConflict};
use super::error::MarketError;
use super::schema::{Problem, SchemaCatalog, SchemaKind, Validation, ValidationError};

/// Result of an account creation: new record, or the one already holding the identity.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountOutcome {
    Created(Record),
    Existing(Record),
}

impl AccountOutcome {
    pub fn record(&self) -> &Record {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Create, read, update and delete for one account population.
pub struct AccountService<S> {
    kind: AccountKind,
    store: Arc<S>,
    schemas: Arc<SchemaCatalog>,
    checker: EligibilityChecker<S>,
    clock: Arc<dyn Clock>,
    read_retries: u8,
}

impl<S> AccountService<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(
        kind: AccountKind,
        store: Arc<S>,
        schemas: Arc<SchemaCatalog>,
        clock: Arc<dyn Clock>,
        config: &MarketplaceConfig,
    ) -> Self {
        let checker = EligibilityChecker::new(store.clone(), config.minimum_age, config.read_retries);
        Self {
            kind,
            store,
            schemas,
            checker,
            clock,
            read_retries: config.read_retries,
        }
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    /// Validate, check eligibility and uniqueness, then persist a normalized record.
    ///
    /// A payload whose identity claim is already registered returns the stored
    /// record instead of failing, whether the pre-check or the unique index caught it.
    pub fn create(&self, payload: &Document) -> Result<AccountOutcome, MarketError> {
        let candidate =
            self.schemas
                .validate(SchemaKind::AccountDraft, payload, Validation::PERMISSIVE)?;
        let now = self.clock.now();
        self.checker.ensure_eligible(&candidate, now)?;

        match self.checker.ensure_unique(self.kind, &candidate) {
            Ok(()) => {}
            Err(IdentityConflict::Taken { identity, existing }) => {
                debug!(account = self.kind.label(), %identity, "returning existing account");
                return Ok(AccountOutcome::Existing(*existing));
            }
            Err(IdentityConflict::Store(error)) => return Err(error.into()),
        }

        let identity = identity_claim(&candidate).unwrap_or_default();
        let mut document = candidate;
        document.insert("phone_verified".to_string(), Value::Bool(false));
        document.insert("identity_verified".to_string(), Value::Bool(false));
        document.insert("created".to_string(), stamp(now));
        document.insert("last_updated".to_string(), stamp(now));
        let document = self
            .schemas
            .validate(SchemaKind::Account, &document, Validation::STRICT)?;

        match self.store.insert(self.kind.collection(), document) {
            Ok(record) => {
                info!(account = self.kind.label(), id = %record.id, "account created");
                Ok(AccountOutcome::Created(record))
            }
            Err(StoreError::Conflict { .. }) => {
                warn!(
                    account = self.kind.label(),
                    %identity,
                    "identity registered concurrently; returning existing account"
                );
                self.find_by_identity(&identity).map(AccountOutcome::Existing)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// All records matching every `field = value` pair of `filter`; empty means all.
    pub fn list(&self, filter: &Document) -> Result<Vec<Record>, MarketError> {
        let filter = Filter::from_document(filter);
        let collection = self.kind.collection();
        Ok(read_with_retry(self.read_retries, || {
            self.store.find(collection, &filter)
        })?)
    }

    pub fn get(&self, id: &RecordId) -> Result<Record, MarketError> {
        read_with_retry(self.read_retries, || self.store.get(self.kind.collection(), id))
            .map_err(|error| MarketError::from_store(self.kind.label(), id, error))
    }

    /// Merge `payload` over the stored record and replace it once the result validates.
    pub fn update(&self, id: &RecordId, payload: &Document) -> Result<Record, MarketError> {
        let existing = self.get(id)?;

        let mut patch = payload.clone();
        if let Some(claimed) = patch.remove(ID_FIELD) {
            if claimed.as_str() != Some(id.as_str()) {
                return Err(ValidationError::single(
                    "account",
                    ID_FIELD,
                    Problem::Mismatch {
                        expected: id.to_string(),
                    },
                )
                .into());
            }
        }

        let mut merged = existing.fields.clone();
        merge(&mut merged, patch);
        if let Some(created) = existing.fields.get("created") {
            merged.insert("created".to_string(), created.clone());
        }
        let now = self.clock.now();
        merged.insert("last_updated".to_string(), stamp(now));

        let document = self
            .schemas
            .validate(SchemaKind::Account, &merged, Validation::STRICT)?;
        self.checker.ensure_eligible(&document, now)?;

        let identity = identity_claim(&document).unwrap_or_default();
        let record = self
            .store
            .update_one(self.kind.collection(), id, document)
            .map_err(|error| match error {
                StoreError::Conflict { .. } => MarketError::Conflict {
                    entity: self.kind.label(),
                    identity,
                },
                other => MarketError::from_store(self.kind.label(), id, other),
            })?;
        info!(account = self.kind.label(), id = %record.id, "account updated");
        Ok(record)
    }

    /// Remove the record permanently, returning what was stored.
    pub fn delete(&self, id: &RecordId) -> Result<Record, MarketError> {
        let existing = self.get(id)?;
        self.store
            .delete_one(self.kind.collection(), id)
            .map_err(|error| MarketError::from_store(self.kind.label(), id, error))?;
        info!(account = self.kind.label(), %id, "account deleted");
        Ok(existing)
    }

    fn find_by_identity(&self, identity: &str) -> Result<Record, MarketError> {
        let filter = Filter::all().eq(IDENTITY_FIELD, identity);
        read_with_retry(self.read_retries, || {
            self.store.find_one(self.kind.collection(), &filter)
        })
        .map_err(|error| match error {
            StoreError::NotFound => MarketError::Conflict {
                entity: self.kind.label(),
                identity: identity.to_string(),
            },
            other => other.into(),
        })
    }
}
