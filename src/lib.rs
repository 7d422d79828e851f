pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod observability;
pub mod store;
