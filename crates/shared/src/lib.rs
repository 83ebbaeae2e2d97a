//! Shared utilities for the hiding-data backend.
//!
//! Common validation logic used by request types in the domain crate.

pub mod validation;
