/// Database configuration and connection management
pub mod database;

/// Event seeding configuration from config.toml
pub mod events;

/// Ledger retry settings from environment variables
pub mod ledger;
