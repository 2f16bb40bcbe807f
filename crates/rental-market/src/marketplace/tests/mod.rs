mod common;
mod reconcile;
mod schema;
