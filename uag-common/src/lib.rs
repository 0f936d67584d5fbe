//! Shared library for the UAG (University Admission Guidance) services
//!
//! Provides the common error type, the domain event bus, configuration
//! loading, and database initialization used by the prediction engine.

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
