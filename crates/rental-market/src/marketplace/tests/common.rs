use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::config::MarketplaceConfig;
use crate::marketplace::clock::{Clock, FixedClock};
use crate::marketplace::domain::{ApplicationStatus, ListingStatus};
use crate::marketplace::schema::SchemaCatalog;
use crate::marketplace::Marketplace;
use crate::store::{
    Document, DocumentStore, Filter, Guard, InMemoryStore, Record, RecordId, StoreError,
};

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .expect("valid instant")
}

pub(super) fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub(super) fn account_payload(oauth_id: &str) -> Document {
    document(json!({
        "details": {
            "forename": "Emma",
            "surname": "Sheeran",
            "birth_date": "1994-05-12",
            "sex": "female"
        },
        "contact": { "email": "emma@example.ie" },
        "oauth_id": oauth_id
    }))
}

pub(super) fn listing_payload() -> Document {
    document(json!({
        "address": {
            "house_number": "12",
            "street": "Harcourt Street",
            "area": "Saint Kevin's",
            "city": "Dublin",
            "county": "Dublin",
            "eircode": "D02 XY45"
        },
        "details": {
            "dwelling": "apartment",
            "description": "Bright two bed near the Green",
            "lease_length_months": 12,
            "target_tenant": ["couple"]
        },
        "facilities": {
            "dryer": true,
            "washing_machine": true,
            "central_heating": true,
            "parking": false,
            "pets": false,
            "wifi": true,
            "garden": false
        },
        "bedrooms": ["double", "single"],
        "bathrooms": ["ensuite"],
        "terms": {
            "deposit": 1800,
            "rent": 1800,
            "plan": "medium",
            "owner_occupied": false,
            "furnished": true,
            "ber": "B2"
        }
    }))
}

pub(super) struct Harness<S = InMemoryStore> {
    pub store: Arc<S>,
    pub clock: Arc<FixedClock>,
    pub market: Marketplace<S>,
}

pub(super) fn harness() -> Harness {
    harness_with(Arc::new(InMemoryStore::new()))
}

pub(super) fn harness_with<S>(store: Arc<S>) -> Harness<S>
where
    S: DocumentStore + 'static,
{
    harness_configured(store, &MarketplaceConfig::default())
}

pub(super) fn harness_configured<S>(store: Arc<S>, config: &MarketplaceConfig) -> Harness<S>
where
    S: DocumentStore + 'static,
{
    let clock = Arc::new(FixedClock::new(start()));
    let schemas = Arc::new(SchemaCatalog::build().expect("schemas are well formed"));
    let shared: Arc<dyn Clock> = clock.clone();
    let market = Marketplace::new(store.clone(), schemas, shared, config);
    market.ensure_indexes().expect("indexes created");
    Harness {
        store,
        clock,
        market,
    }
}

/// Marketplace over a fresh in-memory store, shared the way the router holds it.
pub(super) fn shared_market() -> (Arc<Marketplace<InMemoryStore>>, Arc<FixedClock>) {
    let Harness { clock, market, .. } = harness();
    (Arc::new(market), clock)
}

impl<S> Harness<S>
where
    S: DocumentStore + 'static,
{
    pub fn user(&self, oauth_id: &str) -> RecordId {
        self.market
            .users
            .create(&account_payload(oauth_id))
            .expect("user created")
            .into_record()
            .id
    }

    pub fn landlord(&self, oauth_id: &str) -> RecordId {
        self.market
            .landlords
            .create(&account_payload(oauth_id))
            .expect("landlord created")
            .into_record()
            .id
    }

    pub fn listing(&self, landlord: &RecordId) -> RecordId {
        self.market
            .listings
            .create(landlord, &listing_payload())
            .expect("listing created")
            .id
    }

    pub fn apply(&self, user: &RecordId, landlord: &RecordId, listing: &RecordId) -> RecordId {
        self.market
            .applications
            .create(user, landlord, listing)
            .expect("application submitted")
            .id
    }

    pub fn application_status(&self, id: &RecordId) -> ApplicationStatus {
        self.market
            .applications
            .get(id)
            .expect("application exists")
            .get("status")
            .and_then(Value::as_str)
            .and_then(ApplicationStatus::parse)
            .expect("status is a known label")
    }

    pub fn listing_status(&self, id: &RecordId) -> ListingStatus {
        self.market
            .listings
            .get(id)
            .expect("listing exists")
            .get("terms.status")
            .and_then(Value::as_str)
            .and_then(ListingStatus::parse)
            .expect("status is a known label")
    }
}

type Interference = Box<dyn FnOnce(&InMemoryStore) + Send>;

/// Wraps the in-memory store to inject outages and concurrent writes.
#[derive(Default)]
pub(super) struct FlakyStore {
    inner: InMemoryStore,
    failing_reads: AtomicUsize,
    reads: AtomicUsize,
    down_for_writes: Mutex<Vec<String>>,
    before_write: Mutex<HashMap<String, Interference>>,
}

impl FlakyStore {
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// The next `count` reads fail with `Unavailable`.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_writes_to(&self, collection: &str) {
        self.down_for_writes
            .lock()
            .expect("flaky store mutex poisoned")
            .push(collection.to_string());
    }

    pub fn heal(&self) {
        self.down_for_writes
            .lock()
            .expect("flaky store mutex poisoned")
            .clear();
    }

    /// Run `action` against the real store right before the next insert or
    /// guarded write to `collection`, as a concurrent request would.
    pub fn interfere_before_write(
        &self,
        collection: &str,
        action: impl FnOnce(&InMemoryStore) + Send + 'static,
    ) {
        self.before_write
            .lock()
            .expect("flaky store mutex poisoned")
            .insert(collection.to_string(), Box::new(action));
    }

    fn read(&self) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected read outage".to_string()));
        }
        Ok(())
    }

    fn write(&self, collection: &str) -> Result<(), StoreError> {
        let down = self
            .down_for_writes
            .lock()
            .expect("flaky store mutex poisoned")
            .iter()
            .any(|name| name == collection);
        if down {
            return Err(StoreError::Unavailable(format!(
                "injected write outage on {collection}"
            )));
        }
        Ok(())
    }

    fn interfere(&self, collection: &str) {
        let interference = self
            .before_write
            .lock()
            .expect("flaky store mutex poisoned")
            .remove(collection);
        if let Some(action) = interference {
            action(&self.inner);
        }
    }
}

impl DocumentStore for FlakyStore {
    fn insert(&self, collection: &str, document: Document) -> Result<Record, StoreError> {
        self.write(collection)?;
        self.interfere(collection);
        self.inner.insert(collection, document)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.read()?;
        self.inner.find(collection, filter)
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Record, StoreError> {
        self.read()?;
        self.inner.find_one(collection, filter)
    }

    fn update_one(
        &self,
        collection: &str,
        id: &RecordId,
        document: Document,
    ) -> Result<Record, StoreError> {
        self.write(collection)?;
        self.inner.update_one(collection, id, document)
    }

    fn compare_and_swap(
        &self,
        collection: &str,
        id: &RecordId,
        guard: &Guard,
        document: Document,
    ) -> Result<Record, StoreError> {
        self.write(collection)?;
        self.interfere(collection);
        self.inner.compare_and_swap(collection, id, guard, document)
    }

    fn delete_one(&self, collection: &str, id: &RecordId) -> Result<(), StoreError> {
        self.write(collection)?;
        self.inner.delete_one(collection, id)
    }

    fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        self.inner.create_unique_index(collection, field)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
