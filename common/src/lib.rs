//! Ratefeed Common Types
//!
//! This crate contains the value types shared by the rate feed: currency
//! codes, quote snapshots, historical series, fiat amount formatting and the
//! clock used for refresh scheduling.

pub mod format;
pub mod monetary;
pub mod time;

pub use format::*;
pub use monetary::*;
pub use time::*;
