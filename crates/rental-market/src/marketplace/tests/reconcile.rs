use std::sync::Arc;

use chrono::Duration;

use serde_json::json;

use super::common::*;
use crate::marketplace::domain::{ApplicationStatus, ListingStatus, APPLICATIONS, LISTINGS};
use crate::marketplace::error::ErrorKind;
use crate::store::{DocumentStore, Guard, RecordId};

fn stranded_accept() -> (Harness<FlakyStore>, RecordId, RecordId, RecordId) {
    let store = Arc::new(FlakyStore::default());
    let harness = harness_with(store.clone());
    let landlord = harness.landlord("landlord-1");
    let listing = harness.listing(&landlord);
    let first = harness.user("user-1");
    let second = harness.user("user-2");
    let chosen = harness.apply(&first, &landlord, &listing);
    let sibling = harness.apply(&second, &landlord, &listing);

    store.fail_writes_to(LISTINGS);
    let error = harness
        .market
        .applications
        .accept(&chosen)
        .expect_err("listing write fails");
    assert_eq!(error.kind(), ErrorKind::StoreUnavailable);
    store.heal();

    (harness, listing, chosen, sibling)
}

#[test]
fn finishes_an_accept_that_left_the_listing_open() {
    let (harness, listing, chosen, sibling) = stranded_accept();
    assert_eq!(harness.listing_status(&listing), ListingStatus::Open);
    assert_eq!(
        harness.application_status(&chosen),
        ApplicationStatus::Accepted
    );

    let report = harness.market.reconciler.reconcile().expect("repair runs");

    assert_eq!(report.listings_closed, vec![listing.clone()]);
    assert_eq!(report.applications_rejected, 1);
    assert!(report.failures.is_empty());
    assert_eq!(harness.listing_status(&listing), ListingStatus::Closed);
    assert_eq!(
        harness.application_status(&sibling),
        ApplicationStatus::Rejected
    );
    assert_eq!(
        harness.application_status(&chosen),
        ApplicationStatus::Accepted
    );

    let second = harness.market.reconciler.reconcile().expect("repair runs");
    assert!(second.is_clean());
}

#[test]
fn rejects_siblings_left_pending_on_a_closed_listing() {
    let (harness, listing, chosen, sibling) = stranded_accept();
    let mut fields = harness.market.listings.get(&listing).expect("stored").fields;
    fields["terms"]["status"] = json!("closed");
    harness
        .store
        .inner()
        .compare_and_swap(LISTINGS, &listing, &Guard::new("terms.status", "open"), fields)
        .expect("closed without cascade");

    let report = harness.market.reconciler.reconcile().expect("repair runs");

    assert!(report.listings_closed.is_empty());
    assert_eq!(report.applications_rejected, 1);
    assert_eq!(
        harness.application_status(&sibling),
        ApplicationStatus::Rejected
    );
    assert_eq!(
        harness.application_status(&chosen),
        ApplicationStatus::Accepted
    );
}

#[test]
fn expires_pending_applications_left_on_expired_listings() {
    let harness = harness();
    let landlord = harness.landlord("landlord-1");
    let listing = harness.listing(&landlord);
    let user = harness.user("user-1");
    let pending = harness.apply(&user, &landlord, &listing);

    // Expire the listing without its cascade, as an interrupted sweep would.
    let mut fields = harness.market.listings.get(&listing).expect("stored").fields;
    fields["terms"]["status"] = json!("expired");
    harness
        .store
        .update_one(LISTINGS, &listing, fields)
        .expect("expired without cascade");

    let report = harness.market.reconciler.reconcile().expect("repair runs");

    assert_eq!(report.applications_expired, 1);
    assert_eq!(
        harness.application_status(&pending),
        ApplicationStatus::Expired
    );
}

#[test]
fn leaves_manually_closed_listings_alone() {
    let harness = harness();
    let landlord = harness.landlord("landlord-1");
    let listing = harness.listing(&landlord);
    let user = harness.user("user-1");
    let pending = harness.apply(&user, &landlord, &listing);
    harness
        .market
        .listings
        .transition(&listing, ListingStatus::Closed)
        .expect("closed");

    let report = harness.market.reconciler.reconcile().expect("repair runs");

    assert!(report.is_clean());
    assert_eq!(
        harness.application_status(&pending),
        ApplicationStatus::Pending
    );
}

#[test]
fn malformed_applications_do_not_stop_the_pass() {
    let harness = harness();
    let landlord = harness.landlord("landlord-1");
    let listing = harness.listing(&landlord);
    let user = harness.user("user-1");
    let application = harness.apply(&user, &landlord, &listing);

    let mut fields = harness
        .market
        .applications
        .get(&application)
        .expect("stored")
        .fields;
    fields["status"] = json!("accepted");
    fields["creation_time"] = json!("yesterday");
    harness
        .store
        .update_one(APPLICATIONS, &application, fields)
        .expect("corrupted");

    let report = harness.market.reconciler.reconcile().expect("repair runs");
    assert!(report.is_clean());
    assert_eq!(harness.listing_status(&listing), ListingStatus::Open);
}

#[test]
fn overdue_listing_with_a_stranded_accept_is_closed_not_expired() {
    let (harness, listing, chosen, sibling) = stranded_accept();
    harness.clock.advance(Duration::days(22));

    let report = harness.market.listings.expire_overdue().expect("sweep runs");

    assert!(report.expired.is_empty());
    assert_eq!(report.closed, vec![listing.clone()]);
    assert_eq!(report.applications_rejected, 1);
    assert_eq!(harness.listing_status(&listing), ListingStatus::Closed);
    assert_eq!(
        harness.application_status(&chosen),
        ApplicationStatus::Accepted
    );
    assert_eq!(
        harness.application_status(&sibling),
        ApplicationStatus::Rejected
    );

    let repair = harness.market.reconciler.reconcile().expect("repair runs");
    assert!(repair.is_clean());
}
