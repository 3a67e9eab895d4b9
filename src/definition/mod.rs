//! Declaration records consumed by the engine
//!
//! These are the shapes the upstream parser produces for template, custom and
//! constraint declarations. The engine never parses template source text; it
//! only stores, resolves and validates these records.

pub mod types;

pub use types::*;
