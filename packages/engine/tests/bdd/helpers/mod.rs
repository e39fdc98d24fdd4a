//! Shared helpers for the BDD step definitions.

pub mod regulation_loader;
pub mod value_conversion;
