pub mod types;
pub mod database;
pub mod registry;
pub mod config;
pub mod error;
pub mod stats;
