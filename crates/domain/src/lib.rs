//! Domain layer for the hiding-data backend.
//!
//! This crate contains:
//! - Domain models (access policy, manager settings records, queue requests)
//! - The settings service and its storage abstraction
//! - Domain error types

pub mod models;
pub mod services;
