//! Volunteer rota backend.
//!
//! Helper records in a document store, Azure AD bearer-token protection for
//! every API route except health, and file-based snapshots of the store with
//! restore, retention and a cron schedule.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

pub use config::AppConfig;
pub use error::AppError;
