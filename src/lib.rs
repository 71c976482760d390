//! # IronQuant
//! Daily advisory engine for a small basket of exchange-traded funds.
//!
//! Each cycle derives a technical indicator snapshot per instrument, runs it
//! through a layered circuit-breaker risk policy, fuses the quantitative score
//! with an external qualitative adjustment, and records the resulting decision
//! in a durable signal/position ledger.

pub use crate::utils::error::{Error, Result};

pub mod advisory;
pub mod config;
pub mod decision;
pub mod engine;
pub mod indicators;
pub mod ledger;
pub mod market_data;
pub mod report;
pub mod risk;
pub mod utils;
