//! Lifecycle and consistency engine for a property-rental marketplace.
//!
//! Accounts (users and landlords), rental listings and rental applications are
//! persisted through the [`store::DocumentStore`] port and governed by the
//! managers under [`marketplace`].

pub mod config;
pub mod error;
pub mod marketplace;
pub mod store;
pub mod telemetry;
