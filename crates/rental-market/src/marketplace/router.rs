use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::error;

use crate::store::{Document, DocumentStore, Record, RecordId};

use super::domain::{AccountKind, ListingStatus};
use super::error::{ErrorKind, MarketError};
use super::listings::ExpiryReport;
use super::reconcile::ReconcileReport;
use super::schema::{Problem, ValidationError};
use super::Marketplace;

type Market<S> = Arc<Marketplace<S>>;
type Reply<T> = Result<Json<T>, MarketError>;

/// Router exposing the marketplace under `/api/v1`.
pub fn marketplace_router<S>(marketplace: Arc<Marketplace<S>>) -> Router
where
    S: DocumentStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/users",
            post(create_account::<S, UserRoute>).get(list_accounts::<S, UserRoute>),
        )
        .route(
            "/api/v1/users/:id",
            get(get_account::<S, UserRoute>)
                .put(update_account::<S, UserRoute>)
                .delete(delete_account::<S, UserRoute>),
        )
        .route(
            "/api/v1/landlords",
            post(create_account::<S, LandlordRoute>).get(list_accounts::<S, LandlordRoute>),
        )
        .route(
            "/api/v1/landlords/:id",
            get(get_account::<S, LandlordRoute>)
                .put(update_account::<S, LandlordRoute>)
                .delete(delete_account::<S, LandlordRoute>),
        )
        .route(
            "/api/v1/listings",
            post(create_listing::<S>).get(list_listings::<S>),
        )
        .route(
            "/api/v1/listings/:id",
            get(get_listing::<S>)
                .put(update_listing::<S>)
                .delete(delete_listing::<S>),
        )
        .route("/api/v1/listings/:id/close", post(close_listing::<S>))
        .route(
            "/api/v1/applications",
            post(create_application::<S>).get(list_applications::<S>),
        )
        .route(
            "/api/v1/applications/:id",
            get(get_application::<S>)
                .put(update_application::<S>)
                .delete(delete_application::<S>),
        )
        .route(
            "/api/v1/applications/:id/accept",
            post(accept_application::<S>),
        )
        .route(
            "/api/v1/applications/:id/reject",
            post(reject_application::<S>),
        )
        .route("/api/v1/applications/:id/cease", post(cease_application::<S>))
        .route("/api/v1/maintenance/expire", post(expire_overdue::<S>))
        .route("/api/v1/maintenance/reconcile", post(reconcile::<S>))
        .with_state(marketplace)
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(error = %self, kind = kind.label(), "marketplace request failed");
        }

        let mut payload = json!({
            "error": kind.label(),
            "message": self.to_string(),
        });
        if let MarketError::BadRequest(validation) = &self {
            payload["issues"] = serde_json::to_value(&validation.issues).unwrap_or(Value::Null);
        }
        (status, Json(payload)).into_response()
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Ineligible => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict
        | ErrorKind::InvalidTransition
        | ErrorKind::ListingUnavailable
        | ErrorKind::DuplicateApplication => StatusCode::CONFLICT,
        ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::MalformedRecord => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Selects the account population a generic account handler serves.
pub(crate) trait AccountRoute {
    const KIND: AccountKind;
}

pub(crate) struct UserRoute;
pub(crate) struct LandlordRoute;

impl AccountRoute for UserRoute {
    const KIND: AccountKind = AccountKind::User;
}

impl AccountRoute for LandlordRoute {
    const KIND: AccountKind = AccountKind::Landlord;
}

fn query_document(params: HashMap<String, String>) -> Document {
    params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

pub(crate) async fn create_account<S, K>(
    State(market): State<Market<S>>,
    Json(payload): Json<Document>,
) -> Result<(StatusCode, Json<Record>), MarketError>
where
    S: DocumentStore + 'static,
    K: AccountRoute,
{
    let outcome = market.accounts(K::KIND).create(&payload)?;
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into_record())))
}

pub(crate) async fn list_accounts<S, K>(
    State(market): State<Market<S>>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply<Vec<Record>>
where
    S: DocumentStore + 'static,
    K: AccountRoute,
{
    Ok(Json(market.accounts(K::KIND).list(&query_document(params))?))
}

pub(crate) async fn get_account<S, K>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
    K: AccountRoute,
{
    Ok(Json(market.accounts(K::KIND).get(&RecordId(id))?))
}

pub(crate) async fn update_account<S, K>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
    Json(payload): Json<Document>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
    K: AccountRoute,
{
    Ok(Json(market.accounts(K::KIND).update(&RecordId(id), &payload)?))
}

pub(crate) async fn delete_account<S, K>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
    K: AccountRoute,
{
    Ok(Json(market.accounts(K::KIND).delete(&RecordId(id))?))
}

pub(crate) async fn create_listing<S>(
    State(market): State<Market<S>>,
    Json(payload): Json<Document>,
) -> Result<(StatusCode, Json<Record>), MarketError>
where
    S: DocumentStore + 'static,
{
    let landlord_id = match payload.get("landlord_id") {
        Some(Value::String(id)) if !id.is_empty() => RecordId(id.clone()),
        Some(Value::Number(id)) => RecordId(id.to_string()),
        Some(_) => {
            return Err(ValidationError::single(
                "listing payload",
                "landlord_id",
                Problem::WrongType {
                    expected: "string or integer",
                },
            )
            .into())
        }
        None => {
            return Err(
                ValidationError::single("listing payload", "landlord_id", Problem::Missing).into(),
            )
        }
    };
    let record = market.listings.create(&landlord_id, &payload)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn list_listings<S>(
    State(market): State<Market<S>>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply<Vec<Record>>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.listings.list(&query_document(params))?))
}

pub(crate) async fn get_listing<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.listings.get(&RecordId(id))?))
}

pub(crate) async fn update_listing<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
    Json(payload): Json<Document>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.listings.update(&RecordId(id), &payload)?))
}

pub(crate) async fn delete_listing<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.listings.delete(&RecordId(id))?))
}

pub(crate) async fn close_listing<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(
        market
            .listings
            .transition(&RecordId(id), ListingStatus::Closed)?,
    ))
}

pub(crate) async fn create_application<S>(
    State(market): State<Market<S>>,
    Json(payload): Json<Document>,
) -> Result<(StatusCode, Json<Record>), MarketError>
where
    S: DocumentStore + 'static,
{
    let record = market.applications.create_from_payload(&payload)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub(crate) async fn list_applications<S>(
    State(market): State<Market<S>>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply<Vec<Record>>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.list(&query_document(params))?))
}

pub(crate) async fn get_application<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.get(&RecordId(id))?))
}

pub(crate) async fn update_application<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
    Json(payload): Json<Document>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.update(&RecordId(id), &payload)?))
}

pub(crate) async fn delete_application<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.delete(&RecordId(id))?))
}

pub(crate) async fn accept_application<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.accept(&RecordId(id))?))
}

pub(crate) async fn reject_application<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.reject(&RecordId(id))?))
}

pub(crate) async fn cease_application<S>(
    State(market): State<Market<S>>,
    Path(id): Path<String>,
) -> Reply<Record>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.applications.cease(&RecordId(id))?))
}

pub(crate) async fn expire_overdue<S>(State(market): State<Market<S>>) -> Reply<ExpiryReport>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.listings.expire_overdue()?))
}

pub(crate) async fn reconcile<S>(State(market): State<Market<S>>) -> Reply<ReconcileReport>
where
    S: DocumentStore + 'static,
{
    Ok(Json(market.reconciler.reconcile()?))
}
