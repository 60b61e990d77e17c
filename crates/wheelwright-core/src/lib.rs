//! Wheelwright Core
//!
//! Core domain types, the step condition grammar, and error handling for
//! Wheelwright. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod artifact;
pub mod condition;
pub mod error;
pub mod ids;
pub mod interpolate;
pub mod job;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
