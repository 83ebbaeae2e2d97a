//! Access policy models.
//!
//! A policy is the settings document stored per manager. It is made of
//! independent restriction groups, each expressed as a [`Mode`].

use serde::{Deserialize, Serialize};

/// How a restriction group treats its value list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    /// Hide the listed values.
    Blacklist,
    /// Hide everything except the listed values.
    Whitelist,
    /// Do not restrict; `values` is ignored.
    #[default]
    None,
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeKind::Blacklist => write!(f, "blacklist"),
            ModeKind::Whitelist => write!(f, "whitelist"),
            ModeKind::None => write!(f, "none"),
        }
    }
}

/// A single restriction group: a kind plus an unordered list of tokens.
///
/// Tokens are opaque (menu section names, pipeline ids, field ids, tags)
/// and kept as raw JSON values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mode {
    #[serde(alias = "kind")]
    pub mode: ModeKind,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

impl Mode {
    pub fn new(mode: ModeKind, values: Vec<serde_json::Value>) -> Self {
        Self { mode, values }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Whether this group restricts anything at all.
    pub fn is_restrictive(&self) -> bool {
        self.mode != ModeKind::None
    }
}

/// Per-entity restriction groups (leads, contacts, companies).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityModes {
    #[serde(default)]
    pub leads: Mode,
    #[serde(default)]
    pub contacts: Mode,
    #[serde(default)]
    pub companies: Mode,
}

/// Full access policy for one manager.
///
/// Every group defaults to [`ModeKind::None`], so `{}` is a valid policy
/// that restricts nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Restrictions on menu sections.
    #[serde(default)]
    pub menu: Mode,
    /// Restrictions on pipelines, by pipeline id.
    #[serde(default)]
    pub pipelines: Mode,
    /// Per-entity field visibility restrictions.
    #[serde(default)]
    pub fields: EntityModes,
    /// Per-entity restrictions driven by tags.
    #[serde(default)]
    pub tags_logic: EntityModes,
}
