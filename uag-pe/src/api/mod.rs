//! HTTP endpoints exposed by the prediction engine
//!
//! The user-facing CRUD API lives in another service; only operational
//! endpoints are served here.

pub mod health;

pub use health::health_routes;
