//! Domain services for hiding-data settings.
//!
//! Services contain business logic that operates on domain models.

pub mod memory_store;
pub mod settings;

pub use memory_store::MemorySettingsStore;
pub use settings::{
    SettingsError, SettingsService, SettingsStore, StoreError, DEFAULT_CONFLICT_RETRY_LIMIT,
};
