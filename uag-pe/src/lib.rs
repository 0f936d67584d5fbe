//! uag-pe library interface
//!
//! Exposes the prediction engine's components for integration testing.

pub mod api;
pub mod batching;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uag_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Bus carrying the domain events the orchestrator consumes
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new().merge(api::health_routes()).with_state(state)
}
