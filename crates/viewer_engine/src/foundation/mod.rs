//! Foundation module - low-level utilities
//!
//! - Math type aliases and projection helpers
//! - Logging initialization

pub mod logging;
pub mod math;
