use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::Config;

/// Shared state of the read-only API.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: Arc<Config>) -> Self {
        Self { db, config }
    }
}
