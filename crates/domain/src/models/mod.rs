//! Domain models for hiding-data settings.

pub mod health;
pub mod manager_settings;
pub mod policy;

pub use health::ServiceHealth;
pub use manager_settings::{
    ListSettingsRequest, ManagerSettings, SaveSettingsRequest, SettingsKey,
};
pub use policy::{EntityModes, Mode, ModeKind, Policy};
