use serde_json::json;

use super::common::*;
use crate::marketplace::schema::{
    FieldKind, FieldRule, Problem, Schema, SchemaCatalog, SchemaDefinitionError, SchemaKind,
    Validation,
};

fn catalog() -> SchemaCatalog {
    SchemaCatalog::build().expect("schemas are well formed")
}

#[test]
fn catalog_builds_every_kind() {
    let catalog = catalog();
    for kind in SchemaKind::ALL {
        assert!(!catalog.schema(kind).name().is_empty());
    }
}

#[test]
fn reports_every_missing_required_field() {
    let payload = document(json!({ "details": { "forename": "Emma" } }));

    let error = catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::PERMISSIVE)
        .expect_err("incomplete payload is rejected");

    for path in [
        "details.surname",
        "details.birth_date",
        "details.sex",
        "oauth_id",
    ] {
        assert!(error.has(path), "missing {path} in {:?}", error.paths());
    }
    assert!(error
        .issues
        .iter()
        .all(|issue| issue.problem == Problem::Missing));
}

#[test]
fn first_issue_mode_stops_after_one() {
    let payload = document(json!({}));

    let error = catalog()
        .validate(
            SchemaKind::AccountDraft,
            &payload,
            Validation::PERMISSIVE.first_issue(),
        )
        .expect_err("empty payload is rejected");

    assert_eq!(error.issues.len(), 1);
}

#[test]
fn permissive_mode_drops_unknown_fields() {
    let mut payload = account_payload("google-1");
    payload.insert("favourite_colour".to_string(), json!("teal"));
    payload.insert("details".to_string(), json!({
        "forename": "Emma",
        "surname": "Sheeran",
        "birth_date": "1994-05-12",
        "sex": "female",
        "nickname": "Em"
    }));

    let cleaned = catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::PERMISSIVE)
        .expect("noise is tolerated");

    assert!(!cleaned.contains_key("favourite_colour"));
    assert!(cleaned["details"].get("nickname").is_none());
}

#[test]
fn strict_mode_reports_unknown_fields() {
    let mut payload = account_payload("google-1");
    payload.insert("favourite_colour".to_string(), json!("teal"));

    let error = catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::STRICT)
        .expect_err("unknown field is rejected");

    assert_eq!(error.paths(), vec!["favourite_colour"]);
    assert_eq!(error.issues[0].problem, Problem::UnknownField);
}

#[test]
fn identifiers_are_canonicalised_to_strings() {
    let mut payload = account_payload("unused");
    payload.insert("oauth_id".to_string(), json!(1048576));

    let cleaned = catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::PERMISSIVE)
        .expect("integer identifiers are accepted");

    assert_eq!(cleaned["oauth_id"], json!("1048576"));
}

#[test]
fn listing_rules_cover_enums_lists_and_minimums() {
    let mut payload = listing_payload();
    payload.insert("landlord_id".to_string(), json!("landlord-1"));
    payload.insert("bedrooms".to_string(), json!([]));
    payload.insert("bathrooms".to_string(), json!(["jacuzzi"]));
    payload.insert("images".to_string(), json!(["a", "b", "a", "c"]));
    payload["terms"]["rent"] = json!(0);

    let error = catalog()
        .validate(SchemaKind::ListingDraft, &payload, Validation::PERMISSIVE)
        .expect_err("invalid listing is rejected");

    let problem = |path: &str| {
        error
            .issues
            .iter()
            .find(|issue| issue.path == path)
            .map(|issue| issue.problem.clone())
    };
    assert_eq!(problem("bedrooms"), Some(Problem::TooFewItems { minimum: 1 }));
    assert!(matches!(
        problem("bathrooms[0]"),
        Some(Problem::NotAllowed { .. })
    ));
    assert_eq!(problem("images[2]"), Some(Problem::DuplicateItem));
    assert_eq!(
        problem("terms.rent"),
        Some(Problem::BelowMinimum { minimum: 1.0 })
    );
}

#[test]
fn null_counts_as_absent() {
    let mut payload = account_payload("google-1");
    payload.insert("contact".to_string(), json!(null));
    assert!(catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::STRICT)
        .is_ok());

    payload.insert("oauth_id".to_string(), json!(null));
    let error = catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::STRICT)
        .expect_err("required null is missing");
    assert_eq!(error.paths(), vec!["oauth_id"]);
}

#[test]
fn wrong_types_and_bad_dates_are_reported() {
    let payload = document(json!({
        "details": {
            "forename": 7,
            "surname": "",
            "birth_date": "12/05/1994",
            "sex": "female"
        },
        "oauth_id": true
    }));

    let error = catalog()
        .validate(SchemaKind::AccountDraft, &payload, Validation::PERMISSIVE)
        .expect_err("malformed payload is rejected");

    assert!(error.has("details.forename"));
    assert!(error.has("details.surname"));
    assert!(error.has("details.birth_date"));
    assert!(error.has("oauth_id"));
    assert!(!error.has("details.sex"));
}

#[test]
fn malformed_schema_definitions_are_detected() {
    let duplicated = Schema::new(
        "broken",
        vec![
            FieldRule::required("name", FieldKind::Text),
            FieldRule::optional("name", FieldKind::Text),
        ],
    );
    assert!(matches!(
        duplicated.check(),
        Err(SchemaDefinitionError::DuplicateField { .. })
    ));

    let empty_choice = Schema::new(
        "broken",
        vec![FieldRule::required("status", FieldKind::OneOf(&[]))],
    );
    assert!(matches!(
        empty_choice.check(),
        Err(SchemaDefinitionError::EmptyChoice { .. })
    ));
}
