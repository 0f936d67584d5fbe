//! Database access shared across UAG services

pub mod init;

pub use init::{init_database, init_memory_database};
