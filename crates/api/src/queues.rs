//! Queue names shared by the gateway and the settings worker.

pub const SETTINGS_SAVE: &str = "settings.save";
pub const SETTINGS_GET: &str = "settings.get";
pub const SETTINGS_DELETE: &str = "settings.delete";
pub const SETTINGS_LIST: &str = "settings.list";
pub const SETTINGS_HEALTH: &str = "settings.health";

/// Every queue served by the settings worker.
pub const ALL: [&str; 5] = [
    SETTINGS_SAVE,
    SETTINGS_GET,
    SETTINGS_DELETE,
    SETTINGS_LIST,
    SETTINGS_HEALTH,
];
