//! Standalone migration runner for the collector database.
//!
//! Reads `DATABASE_URL`, for example `sqlite://data/fieldclimate.db?mode=rwc`.
//! The collector applies pending migrations itself on startup, so this binary
//! is only needed for `status`, `down` or `fresh`.

use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    cli::run_cli(migration::Migrator).await;
}
