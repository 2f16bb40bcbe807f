use serde::Serialize;

use crate::store::{RecordId, StoreError};

use super::domain::{ApplicationStatus, ListingStatus};
use super::schema::ValidationError;

/// Closed set of outcomes a lifecycle operation can fail with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error(transparent)]
    BadRequest(#[from] ValidationError),
    #[error("a {entity} with identity `{identity}` already exists")]
    Conflict {
        entity: &'static str,
        identity: String,
    },
    #[error("account holder is {age} years old; the minimum is {minimum}")]
    Ineligible { age: u32, minimum: u32 },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("listing `{listing_id}` is {status} and not taking applications")]
    ListingUnavailable {
        listing_id: RecordId,
        status: &'static str,
    },
    #[error("user `{user_id}` already has an active application for listing `{listing_id}`")]
    DuplicateApplication {
        user_id: RecordId,
        listing_id: RecordId,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("stored {entity} `{id}` is malformed: {reason}")]
    MalformedRecord {
        entity: &'static str,
        id: RecordId,
        reason: String,
    },
}

/// Stable discriminant handed to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Conflict,
    Ineligible,
    NotFound,
    InvalidTransition,
    ListingUnavailable,
    DuplicateApplication,
    StoreUnavailable,
    MalformedRecord,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::Ineligible => "ineligible",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
            Self::ListingUnavailable => "listing_unavailable",
            Self::DuplicateApplication => "duplicate_application",
            Self::StoreUnavailable => "store_unavailable",
            Self::MalformedRecord => "malformed_record",
        }
    }
}

impl MarketError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Ineligible { .. } => ErrorKind::Ineligible,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ListingUnavailable { .. } => ErrorKind::ListingUnavailable,
            Self::DuplicateApplication { .. } => ErrorKind::DuplicateApplication,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::MalformedRecord { .. } => ErrorKind::MalformedRecord,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: &RecordId) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn listing_transition(from: ListingStatus, to: ListingStatus) -> Self {
        Self::InvalidTransition {
            entity: "listing",
            from: from.label(),
            to: to.label(),
        }
    }

    pub(crate) fn application_transition(from: ApplicationStatus, to: ApplicationStatus) -> Self {
        Self::InvalidTransition {
            entity: "application",
            from: from.label(),
            to: to.label(),
        }
    }

    pub(crate) fn malformed(entity: &'static str, id: &RecordId, source: serde_json::Error) -> Self {
        Self::MalformedRecord {
            entity,
            id: id.clone(),
            reason: source.to_string(),
        }
    }

    /// Translate a store failure for a call site addressing a single record.
    pub(crate) fn from_store(entity: &'static str, id: &RecordId, error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::not_found(entity, id),
            other => Self::from(other),
        }
    }
}

/// Fallback translation; call sites with a more specific meaning map explicitly.
impl From<StoreError> for MarketError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            StoreError::NotFound => Self::NotFound {
                entity: "record",
                id: String::new(),
            },
            StoreError::Conflict { collection, field } => Self::Conflict {
                entity: "record",
                identity: format!("{collection}.{field}"),
            },
            StoreError::GuardMismatch { field } => {
                Self::StoreUnavailable(format!("concurrent update on `{field}`"))
            }
        }
    }
}
