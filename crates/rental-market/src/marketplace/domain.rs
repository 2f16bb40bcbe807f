use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::RecordId;

pub const USERS: &str = "users";
pub const LANDLORDS: &str = "landlords";
pub const LISTINGS: &str = "listings";
pub const APPLICATIONS: &str = "applications";

/// Constant `type` tag carried by every stored listing.
pub const LISTING_TYPE: &str = "rental";

/// Field holding the identity claim used for account uniqueness.
pub const IDENTITY_FIELD: &str = "oauth_id";
/// Set to `{user_id}:{listing_id}` while an application is active; uniquely indexed.
pub const ACTIVE_KEY_FIELD: &str = "active_key";
/// Set to the listing id while an application is accepted; uniquely indexed.
pub const ACCEPTED_KEY_FIELD: &str = "accepted_key";

/// The two account populations. They share a record shape but not a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    User,
    Landlord,
}

impl AccountKind {
    pub const fn collection(self) -> &'static str {
        match self {
            Self::User => USERS,
            Self::Landlord => LANDLORDS,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Landlord => "landlord",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Open,
    Closed,
    Expired,
}

impl ListingStatus {
    pub const ALL: [&'static str; 3] = ["open", "closed", "expired"];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// `closed` and `expired` are terminal; only an open listing may move.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Closed) | (Self::Open, Self::Expired)
        )
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    /// Withdrawn or cancelled by a party, or an accepted tenancy that ended.
    Ceased,
    /// The listing lapsed while the application was still pending.
    Expired,
}

impl ApplicationStatus {
    pub const ALL: [&'static str; 5] = ["pending", "accepted", "rejected", "ceased", "expired"];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ceased => "ceased",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "ceased" => Some(Self::Ceased),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Accepted | Self::Rejected | Self::Ceased | Self::Expired
            ) | (Self::Accepted, Self::Ceased)
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle fields of a stored listing; other attributes stay in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingState {
    pub landlord_id: RecordId,
    pub terms: ListingTerms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTerms {
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub status: ListingStatus,
}

impl ListingState {
    /// Open and not yet past its expiry, whether or not a sweep has run.
    pub fn accepts_applications(&self, now: DateTime<Utc>) -> bool {
        self.terms.status == ListingStatus::Open && self.terms.expires > now
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.terms.status == ListingStatus::Open && self.terms.expires <= now
    }
}

/// Lifecycle fields of a stored application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub user_id: RecordId,
    pub landlord_id: RecordId,
    pub listing_id: RecordId,
    pub status: ApplicationStatus,
    pub creation_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

pub fn active_key(user_id: &RecordId, listing_id: &RecordId) -> String {
    format!("{user_id}:{listing_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_transitions_only_leave_open() {
        assert!(ListingStatus::Open.can_transition_to(ListingStatus::Closed));
        assert!(ListingStatus::Open.can_transition_to(ListingStatus::Expired));
        assert!(!ListingStatus::Closed.can_transition_to(ListingStatus::Open));
        assert!(!ListingStatus::Closed.can_transition_to(ListingStatus::Expired));
        assert!(!ListingStatus::Expired.can_transition_to(ListingStatus::Closed));
        assert!(!ListingStatus::Open.can_transition_to(ListingStatus::Open));
    }

    #[test]
    fn application_transitions_match_lifecycle() {
        use ApplicationStatus::*;

        for next in [Accepted, Rejected, Ceased, Expired] {
            assert!(Pending.can_transition_to(next), "pending -> {next}");
        }
        assert!(Accepted.can_transition_to(Ceased));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Accepted.can_transition_to(Expired));
        for terminal in [Rejected, Ceased, Expired] {
            for next in [Pending, Accepted, Rejected, Ceased, Expired] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn labels_round_trip_through_parse() {
        for label in ApplicationStatus::ALL {
            assert_eq!(ApplicationStatus::parse(label).map(|s| s.label()), Some(label));
        }
        for label in ListingStatus::ALL {
            assert_eq!(ListingStatus::parse(label).map(|s| s.label()), Some(label));
        }
        assert_eq!(ApplicationStatus::parse("withdrawn"), None);
    }
}
