//! Shared handler state.

use beacon_db::Database;
use beacon_sync::SyncService;

/// Handed to every route; both fields are cheap handle clones.
#[derive(Clone)]
pub struct AppState {
    pub service: SyncService,
    pub db: Database,
}

impl AppState {
    pub fn new(service: SyncService, db: Database) -> Self {
        AppState { service, db }
    }
}
