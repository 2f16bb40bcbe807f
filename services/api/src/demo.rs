use crate::infra::{build_marketplace, parse_instant, SharedMarketplace};
use crate::maintenance::run_pass;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use rental_market::config::{MarketplaceConfig, MAX_LISTING_WINDOW_DAYS};
use rental_market::error::AppError;
use rental_market::marketplace::{Clock, FixedClock};
use rental_market::store::{Document, Record, RecordId};
use serde_json::{json, Value};
use std::sync::Arc;

const SURNAMES: &[&str] = &["Doyle", "Kavanagh", "Nolan", "Brennan", "Moran", "Quinn"];

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Instant the scripted letting starts (YYYY-MM-DD or RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_instant)]
    pub(crate) start: Option<DateTime<Utc>>,
    /// Number of prospective tenants applying to the featured listing.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=6))]
    pub(crate) applicants: u8,
    /// Days a listing stays open before the expiry sweep closes it.
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_LISTING_WINDOW_DAYS))]
    pub(crate) window_days: Option<i64>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        start,
        applicants,
        window_days,
    } = args;

    let mut config = MarketplaceConfig::default();
    if let Some(days) = window_days {
        config.listing_window_days = days;
    }
    let clock = Arc::new(FixedClock::new(start.unwrap_or_else(Utc::now)));
    let shared: Arc<dyn Clock> = clock.clone();
    let market = build_marketplace(&config, shared)?;

    println!("Rental marketplace demo");
    println!("- started at {}", clock.now().to_rfc3339());
    println!("- listings stay open for {} days", config.listing_window_days);

    let landlord = market
        .landlords
        .create(&account("demo-landlord", "Aisling", "Fitzgerald"))?
        .into_record();
    let featured = market.listings.create(&landlord.id, &listing("Two bed over the harbour"))?;
    let quiet = market.listings.create(&landlord.id, &listing("Studio off the square"))?;
    println!("\nLandlord {} published two listings", landlord.id);
    print_listing(&featured);
    print_listing(&quiet);

    let mut applications = Vec::new();
    for (index, surname) in SURNAMES.iter().take(usize::from(applicants)).enumerate() {
        let oauth_id = format!("demo-tenant-{}", index + 1);
        let tenant = market
            .users
            .create(&account(&oauth_id, "Tenant", surname))?
            .into_record();
        let application = market
            .applications
            .create(&tenant.id, &landlord.id, &featured.id)?;
        applications.push(application.id);
    }
    let lone_tenant = market
        .users
        .create(&account("demo-tenant-quiet", "Oisin", "Barry"))?
        .into_record();
    let lapsing = market
        .applications
        .create(&lone_tenant.id, &landlord.id, &quiet.id)?;
    println!(
        "\n{} applications on the featured listing, 1 on the quiet one",
        applications.len()
    );

    clock.advance(Duration::days(2));
    let chosen = applications.len() / 2;
    market.applications.accept(&applications[chosen])?;
    println!("\nLandlord accepted application {}", applications[chosen]);
    print_applications(&market, &applications)?;
    print_listing(&market.listings.get(&featured.id)?);

    clock.advance(Duration::days(config.listing_window_days));
    println!("\nAdvanced to {}", clock.now().to_rfc3339());
    let summary = run_pass(&market);
    println!(
        "- sweep expired {} listing(s) and {} application(s)",
        summary.listings_expired, summary.applications_expired
    );
    print_listing(&market.listings.get(&quiet.id)?);
    print_applications(&market, &[lapsing.id])?;

    Ok(())
}

fn print_listing(record: &Record) {
    println!(
        "  listing {} [{}] expires {}",
        record.id,
        text(record, "terms.status"),
        text(record, "terms.expires")
    );
}

fn print_applications(market: &SharedMarketplace, ids: &[RecordId]) -> Result<(), AppError> {
    for id in ids {
        let record = market.applications.get(id)?;
        println!("  application {} [{}]", record.id, text(&record, "status"));
    }
    Ok(())
}

fn text<'a>(record: &'a Record, path: &str) -> &'a str {
    record.get(path).and_then(Value::as_str).unwrap_or("-")
}

fn object(value: Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

fn account(oauth_id: &str, forename: &str, surname: &str) -> Document {
    object(json!({
        "details": {
            "forename": forename,
            "surname": surname,
            "birth_date": "1991-04-03",
            "sex": "other"
        },
        "oauth_id": oauth_id
    }))
}

fn listing(description: &str) -> Document {
    object(json!({
        "address": {
            "house_number": "3",
            "street": "Harbour Row",
            "area": "Cobh",
            "city": "Cork",
            "county": "Cork",
            "eircode": "P24 K2C8"
        },
        "details": {
            "dwelling": "apartment",
            "description": description,
            "lease_length_months": 12,
            "target_tenant": ["individual", "couple"]
        },
        "facilities": {
            "dryer": true,
            "washing_machine": true,
            "central_heating": true,
            "parking": true,
            "pets": false,
            "wifi": true,
            "garden": false
        },
        "bedrooms": ["double", "single"],
        "bathrooms": ["ensuite", "shared"],
        "terms": {
            "deposit": 1650,
            "rent": 1650,
            "plan": "entry",
            "owner_occupied": false,
            "furnished": true,
            "ber": "B3"
        }
    }))
}
