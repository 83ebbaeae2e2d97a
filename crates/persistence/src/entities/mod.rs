//! Entity definitions (database row mappings).

pub mod manager_settings;

pub use manager_settings::ManagerSettingsEntity;
