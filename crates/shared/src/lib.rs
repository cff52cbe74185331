//! LusoTown Shared Types and Utilities
//!
//! Closed enumerations for membership tiers and rate-limited features, plus
//! database helpers shared by the LusoTown services.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
