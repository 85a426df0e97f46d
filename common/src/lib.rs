//! fxwallet Common Types
//!
//! This crate contains shared types used across the fxwallet workspace,
//! including identifiers, currency metadata, the currency registry contract
//! and timing constants.

pub mod identifiers;
pub mod monetary;
pub mod registry;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use registry::*;
pub use error::*;
pub use time::*;
