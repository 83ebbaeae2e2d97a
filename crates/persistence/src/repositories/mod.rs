//! Repository implementations for database operations.

pub mod manager_settings;

pub use manager_settings::{store_error, ManagerSettingsRepository};
