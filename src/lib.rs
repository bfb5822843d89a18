// Error taxonomy shared across the crate
pub mod error;

// Secret cipher and encrypted credential storage
pub mod credentials;

// Credential resolution (user key vs system default)
pub mod resolver;

// Configuration loading
pub mod config;

// Caller identity extraction
pub mod auth;

// HTTP API
pub mod api;
