mod cli;
mod demo;
mod infra;
mod maintenance;
mod routes;
mod server;

use rental_market::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
