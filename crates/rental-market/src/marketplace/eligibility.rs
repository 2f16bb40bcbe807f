use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::store::{read_with_retry, Document, DocumentStore, Filter, Record, StoreError};

use super::domain::{AccountKind, IDENTITY_FIELD};
use super::error::MarketError;
use super::schema::{parse_date, Problem, ValidationError};

/// Outcome of the uniqueness pre-check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentityConflict {
    #[error("identity `{identity}` is already registered as `{}`", .existing.id)]
    Taken {
        identity: String,
        existing: Box<Record>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Advisory checks run before an account is written.
///
/// The uniqueness check only produces a friendly answer early; the unique index
/// on the identity field is what actually rejects a racing duplicate insert.
pub struct EligibilityChecker<S> {
    store: Arc<S>,
    minimum_age: u32,
    read_retries: u8,
}

impl<S> EligibilityChecker<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, minimum_age: u32, read_retries: u8) -> Self {
        Self {
            store,
            minimum_age,
            read_retries,
        }
    }

    pub fn ensure_unique(&self, kind: AccountKind, candidate: &Document) -> Result<(), IdentityConflict> {
        let Some(identity) = identity_claim(candidate) else {
            return Ok(());
        };

        let filter = Filter::all().eq(IDENTITY_FIELD, identity.clone());
        match read_with_retry(self.read_retries, || {
            self.store.find_one(kind.collection(), &filter)
        }) {
            Ok(existing) => Err(IdentityConflict::Taken {
                identity,
                existing: Box::new(existing),
            }),
            Err(StoreError::NotFound) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    pub fn ensure_eligible(&self, candidate: &Document, now: DateTime<Utc>) -> Result<(), MarketError> {
        let birth_date = candidate
            .get("details")
            .and_then(|details| details.get("birth_date"))
            .and_then(|value| value.as_str())
            .and_then(parse_date)
            .ok_or_else(|| {
                ValidationError::single("account payload", "details.birth_date", Problem::InvalidDate)
            })?;

        let age = age_on(birth_date, now.date_naive());
        if age < self.minimum_age {
            return Err(MarketError::Ineligible {
                age,
                minimum: self.minimum_age,
            });
        }
        Ok(())
    }
}

/// The canonical identity claim of an account document, if present.
pub fn identity_claim(document: &Document) -> Option<String> {
    match document.get(IDENTITY_FIELD)? {
        serde_json::Value::String(value) => Some(value.clone()),
        serde_json::Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

/// Whole years elapsed between `birth` and `today`; zero for future dates.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}
