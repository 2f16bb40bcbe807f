use crate::marketplace::domain::{ApplicationStatus, ListingStatus, LISTING_TYPE};
use crate::store::Document;

use super::{FieldKind, FieldRule, Schema, SchemaDefinitionError, ValidationError, Validation};

const SEX: &[&str] = &["male", "female", "other"];
const BEDROOMS: &[&str] = &["single", "double", "shared"];
const BATHROOMS: &[&str] = &["ensuite", "shared"];
const DWELLINGS: &[&str] = &["studio", "apartment", "house"];
const TARGET_TENANTS: &[&str] = &["individual", "couple"];
const PLANS: &[&str] = &["entry", "medium", "deluxe"];
const BER_RATINGS: &[&str] = &[
    "A1", "A2", "A3", "B1", "B2", "B3", "C1", "C2", "C3", "D1", "D2", "E1", "E2", "F", "G",
    "Exempt",
];
const FACILITIES: [&str; 7] = [
    "dryer",
    "washing_machine",
    "central_heating",
    "parking",
    "pets",
    "wifi",
    "garden",
];
const LISTING_TYPES: &[&str] = &[LISTING_TYPE];
/// Smallest image set a stored listing may carry.
pub const MIN_LISTING_IMAGES: usize = 4;

/// Contracts known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// Inbound account payload.
    AccountDraft,
    /// Stored account record.
    Account,
    ListingDraft,
    Listing,
    ListingQuery,
    ApplicationDraft,
    Application,
    ApplicationQuery,
    /// `{ "status": ... }` body of an application update.
    ApplicationPatch,
}

/// Immutable set of schemas, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    account_draft: Schema,
    account: Schema,
    listing_draft: Schema,
    listing: Schema,
    listing_query: Schema,
    application_draft: Schema,
    application: Schema,
    application_query: Schema,
    application_patch: Schema,
}

impl SchemaCatalog {
    pub fn build() -> Result<Self, SchemaDefinitionError> {
        let catalog = Self {
            account_draft: account(false),
            account: account(true),
            listing_draft: listing(false),
            listing: listing(true),
            listing_query: Schema::new(
                "listing query",
                vec![
                    FieldRule::optional("landlord_id", FieldKind::Identifier),
                    FieldRule::optional("status", FieldKind::OneOf(&ListingStatus::ALL)),
                ],
            ),
            application_draft: application(false),
            application: application(true),
            application_query: Schema::new(
                "application query",
                vec![
                    FieldRule::optional("user_id", FieldKind::Identifier),
                    FieldRule::optional("landlord_id", FieldKind::Identifier),
                    FieldRule::optional("listing_id", FieldKind::Identifier),
                    FieldRule::optional("status", FieldKind::OneOf(&ApplicationStatus::ALL)),
                ],
            ),
            application_patch: Schema::new(
                "application update",
                vec![FieldRule::required(
                    "status",
                    FieldKind::OneOf(&ApplicationStatus::ALL),
                )],
            ),
        };

        for kind in SchemaKind::ALL {
            catalog.schema(kind).check()?;
        }
        Ok(catalog)
    }

    pub fn schema(&self, kind: SchemaKind) -> &Schema {
        match kind {
            SchemaKind::AccountDraft => &self.account_draft,
            SchemaKind::Account => &self.account,
            SchemaKind::ListingDraft => &self.listing_draft,
            SchemaKind::Listing => &self.listing,
            SchemaKind::ListingQuery => &self.listing_query,
            SchemaKind::ApplicationDraft => &self.application_draft,
            SchemaKind::Application => &self.application,
            SchemaKind::ApplicationQuery => &self.application_query,
            SchemaKind::ApplicationPatch => &self.application_patch,
        }
    }

    pub fn validate(
        &self,
        kind: SchemaKind,
        document: &Document,
        options: Validation,
    ) -> Result<Document, ValidationError> {
        self.schema(kind).validate(document, options)
    }
}

impl SchemaKind {
    pub const ALL: [Self; 9] = [
        Self::AccountDraft,
        Self::Account,
        Self::ListingDraft,
        Self::Listing,
        Self::ListingQuery,
        Self::ApplicationDraft,
        Self::Application,
        Self::ApplicationQuery,
        Self::ApplicationPatch,
    ];
}

fn account(stored: bool) -> Schema {
    let mut fields = vec![
        FieldRule::required(
            "details",
            FieldKind::Object(Schema::new(
                "account details",
                vec![
                    FieldRule::required("forename", FieldKind::Text),
                    FieldRule::required("surname", FieldKind::Text),
                    FieldRule::required("birth_date", FieldKind::Date),
                    FieldRule::required("sex", FieldKind::OneOf(SEX)),
                ],
            )),
        ),
        FieldRule::optional(
            "contact",
            FieldKind::Object(Schema::new(
                "account contact",
                vec![
                    FieldRule::optional("email", FieldKind::Text),
                    FieldRule::optional("phone", FieldKind::Text),
                ],
            )),
        ),
        FieldRule::required("oauth_id", FieldKind::Identifier),
    ];

    if stored {
        fields.extend([
            FieldRule::required("phone_verified", FieldKind::Boolean),
            FieldRule::required("identity_verified", FieldKind::Boolean),
            FieldRule::required("created", FieldKind::Timestamp),
            FieldRule::required("last_updated", FieldKind::Timestamp),
        ]);
        Schema::new("account", fields)
    } else {
        Schema::new("account payload", fields)
    }
}

fn listing(stored: bool) -> Schema {
    let address = Schema::new(
        "listing address",
        ["house_number", "street", "area", "city", "county", "eircode"]
            .into_iter()
            .map(|name| FieldRule::required(name, FieldKind::Text))
            .collect(),
    );
    let details = Schema::new(
        "listing details",
        vec![
            FieldRule::required("dwelling", FieldKind::OneOf(DWELLINGS)),
            FieldRule::required("description", FieldKind::Text),
            FieldRule::required("lease_length_months", FieldKind::Number { min: Some(1.0) }),
            FieldRule::required(
                "target_tenant",
                FieldKind::list(FieldKind::OneOf(TARGET_TENANTS), 1, true),
            ),
        ],
    );
    let facilities = Schema::new(
        "listing facilities",
        FACILITIES
            .into_iter()
            .map(|name| FieldRule::required(name, FieldKind::Boolean))
            .collect(),
    );

    let mut terms = vec![
        FieldRule::required("deposit", FieldKind::Number { min: Some(1.0) }),
        FieldRule::required("rent", FieldKind::Number { min: Some(1.0) }),
        FieldRule::required("plan", FieldKind::OneOf(PLANS)),
        FieldRule::required("owner_occupied", FieldKind::Boolean),
        FieldRule::required("furnished", FieldKind::Boolean),
        FieldRule::required("ber", FieldKind::OneOf(BER_RATINGS)),
    ];
    if stored {
        terms.extend([
            FieldRule::required("created", FieldKind::Timestamp),
            FieldRule::required("expires", FieldKind::Timestamp),
            FieldRule::required("status", FieldKind::OneOf(&ListingStatus::ALL)),
        ]);
    }

    let images = FieldKind::list(FieldKind::Text, MIN_LISTING_IMAGES, true);
    let mut fields = vec![
        FieldRule::required("landlord_id", FieldKind::Identifier),
        FieldRule::required("address", FieldKind::Object(address)),
        FieldRule::required("details", FieldKind::Object(details)),
        FieldRule::required("facilities", FieldKind::Object(facilities)),
        FieldRule::required(
            "bedrooms",
            FieldKind::list(FieldKind::OneOf(BEDROOMS), 1, false),
        ),
        FieldRule::required(
            "bathrooms",
            FieldKind::list(FieldKind::OneOf(BATHROOMS), 1, false),
        ),
        if stored {
            FieldRule::required("images", images)
        } else {
            FieldRule::optional("images", images)
        },
        FieldRule::required(
            "terms",
            FieldKind::Object(Schema::new("listing terms", terms)),
        ),
    ];
    if stored {
        fields.push(FieldRule::required("type", FieldKind::OneOf(LISTING_TYPES)));
        return Schema::new("listing", fields);
    }
    Schema::new("listing payload", fields)
}

fn application(stored: bool) -> Schema {
    let mut fields = vec![
        FieldRule::required("user_id", FieldKind::Identifier),
        FieldRule::required("landlord_id", FieldKind::Identifier),
        FieldRule::required("listing_id", FieldKind::Identifier),
    ];
    if !stored {
        return Schema::new("application payload", fields);
    }

    fields.extend([
        FieldRule::required("status", FieldKind::OneOf(&ApplicationStatus::ALL)),
        FieldRule::required("creation_time", FieldKind::Timestamp),
        FieldRule::required("last_updated", FieldKind::Timestamp),
        FieldRule::optional("active_key", FieldKind::Text),
        FieldRule::optional("accepted_key", FieldKind::Text),
    ]);
    Schema::new("application", fields)
}
