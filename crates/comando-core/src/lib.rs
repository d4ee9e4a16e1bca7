//! # comando-core
//!
//! Core types, traits, and defaults shared by the Comando Central edge
//! router and notification dispatch services.
//!
//! This crate provides the foundational data structures and trait
//! definitions the other crates depend on.

pub mod defaults;
pub mod error;
pub mod ids;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use ids::new_v7;
pub use models::*;
pub use traits::*;
